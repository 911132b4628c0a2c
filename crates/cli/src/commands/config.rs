use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use launchpad_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let governance = &config.governance;
    vec![
        field("database.url", config.database.url.clone(), &["LAUNCHPAD_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["LAUNCHPAD_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["LAUNCHPAD_DATABASE_TIMEOUT_SECS"],
        ),
        field("llm.provider", format!("{:?}", config.llm.provider), &["LAUNCHPAD_LLM_PROVIDER"]),
        field("llm.model", config.llm.model.clone(), &["LAUNCHPAD_LLM_MODEL"]),
        field(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["LAUNCHPAD_LLM_BASE_URL"],
        ),
        field(
            "llm.api_key",
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
            &["LAUNCHPAD_LLM_API_KEY"],
        ),
        field("llm.max_tokens", config.llm.max_tokens.to_string(), &["LAUNCHPAD_LLM_MAX_TOKENS"]),
        field("llm.max_retries", config.llm.max_retries.to_string(), &["LAUNCHPAD_LLM_MAX_RETRIES"]),
        field(
            "governance.rate_limit.limit",
            governance.rate_limit.limit.to_string(),
            &["LAUNCHPAD_RATE_LIMIT"],
        ),
        field(
            "governance.rate_limit.window_minutes",
            governance.rate_limit.window_minutes.to_string(),
            &["LAUNCHPAD_RATE_LIMIT_WINDOW_MINUTES"],
        ),
        field(
            "governance.token_budget.daily_limit",
            governance.token_budget.daily_limit.to_string(),
            &["LAUNCHPAD_TOKEN_BUDGET_DAILY_LIMIT"],
        ),
        field(
            "governance.daily_requests.limit",
            governance.daily_requests.limit.to_string(),
            &["LAUNCHPAD_DAILY_REQUEST_LIMIT"],
        ),
        field(
            "governance.storage.limit_bytes",
            governance.storage.limit_bytes.to_string(),
            &["LAUNCHPAD_STORAGE_LIMIT_BYTES"],
        ),
        field(
            "governance.rate_limit.fail_open",
            governance.rate_limit.fail_open.to_string(),
            &["LAUNCHPAD_GOVERNANCE_FAIL_OPEN"],
        ),
        field(
            "governance.store_retry.max_attempts",
            governance.store_retry.max_attempts.to_string(),
            &["LAUNCHPAD_STORE_RETRY_MAX_ATTEMPTS"],
        ),
        field(
            "governance.sweep.retention_hours",
            governance.sweep.retention_hours.to_string(),
            &[],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["LAUNCHPAD_LOGGING_LEVEL", "LAUNCHPAD_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LAUNCHPAD_LOGGING_FORMAT", "LAUNCHPAD_LOG_FORMAT"],
        ),
    ]
}

fn field(key_path: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key_path, value, env_keys }
}

fn detect_config_path() -> Option<PathBuf> {
    ["launchpad.toml", "config/launchpad.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_resolve_through_tables() {
        let doc: Value = "[governance.rate_limit]\nlimit = 3\n".parse().expect("toml");
        assert!(contains_path(&doc, "governance.rate_limit.limit"));
        assert!(!contains_path(&doc, "governance.rate_limit.window_minutes"));
    }

    #[test]
    fn file_keys_are_attributed_to_the_file() {
        let doc: Value = "[database]\nurl = \"sqlite::memory:\"\n".parse().expect("toml");
        let source = field_source("database.url", &[], Some(&doc), None);
        assert_eq!(source, "file (config file)");
        assert_eq!(field_source("logging.level", &[], Some(&doc), None), "default");
    }
}
