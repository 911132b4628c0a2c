use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "launchpad.toml";
pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub governance: GovernanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GovernanceConfig {
    pub rate_limit: RateLimitConfig,
    pub token_budget: TokenBudgetConfig,
    pub daily_requests: DailyRequestsConfig,
    pub storage: StorageConfig,
    pub store_retry: StoreRetryConfig,
    pub sweep: SweepConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window_minutes: u64,
    pub fail_open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenBudgetConfig {
    pub daily_limit: u64,
    pub fail_open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyRequestsConfig {
    pub limit: u64,
    pub fail_open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    pub limit_bytes: u64,
    pub fail_open: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepConfig {
    pub batch_size: usize,
    pub retention_hours: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub fail_open: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://launchpad.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                max_tokens: 2048,
                temperature: 0.7,
                timeout_secs: 60,
                max_retries: 3,
                retry_base_delay_ms: 1000,
            },
            governance: GovernanceConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig { limit: 100, window_minutes: 1, fail_open: true },
            token_budget: TokenBudgetConfig { daily_limit: 100_000, fail_open: true },
            daily_requests: DailyRequestsConfig { limit: 1_000, fail_open: true },
            storage: StorageConfig { limit_bytes: 5 * GIB, fail_open: true },
            store_retry: StoreRetryConfig { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 2_000 },
            sweep: SweepConfig { batch_size: 25, retention_hours: 24 },
        }
    }
}

impl GovernanceConfig {
    pub fn set_fail_open(&mut self, fail_open: bool) {
        self.rate_limit.fail_open = fail_open;
        self.token_budget.fail_open = fail_open;
        self.daily_requests.fail_open = fail_open;
        self.storage.fail_open = fail_open;
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(governance) = patch.governance {
            self.governance.apply_patch(governance);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LAUNCHPAD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LAUNCHPAD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_number("LAUNCHPAD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_number("LAUNCHPAD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LAUNCHPAD_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_number("LAUNCHPAD_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_TEMPERATURE") {
            self.llm.temperature = parse_number("LAUNCHPAD_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_number("LAUNCHPAD_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_number("LAUNCHPAD_LLM_MAX_RETRIES", &value)?;
        }

        let governance = &mut self.governance;
        if let Some(value) = read_env("LAUNCHPAD_RATE_LIMIT") {
            governance.rate_limit.limit = parse_number("LAUNCHPAD_RATE_LIMIT", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_RATE_LIMIT_WINDOW_MINUTES") {
            governance.rate_limit.window_minutes =
                parse_number("LAUNCHPAD_RATE_LIMIT_WINDOW_MINUTES", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_TOKEN_BUDGET_DAILY_LIMIT") {
            governance.token_budget.daily_limit =
                parse_number("LAUNCHPAD_TOKEN_BUDGET_DAILY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_DAILY_REQUEST_LIMIT") {
            governance.daily_requests.limit = parse_number("LAUNCHPAD_DAILY_REQUEST_LIMIT", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_STORAGE_LIMIT_BYTES") {
            governance.storage.limit_bytes = parse_number("LAUNCHPAD_STORAGE_LIMIT_BYTES", &value)?;
        }
        if let Some(value) = read_env("LAUNCHPAD_GOVERNANCE_FAIL_OPEN") {
            governance.set_fail_open(parse_bool("LAUNCHPAD_GOVERNANCE_FAIL_OPEN", &value)?);
        }
        if let Some(value) = read_env("LAUNCHPAD_STORE_RETRY_MAX_ATTEMPTS") {
            governance.store_retry.max_attempts =
                parse_number("LAUNCHPAD_STORE_RETRY_MAX_ATTEMPTS", &value)?;
        }

        let log_level =
            read_env("LAUNCHPAD_LOGGING_LEVEL").or_else(|| read_env("LAUNCHPAD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LAUNCHPAD_LOGGING_FORMAT").or_else(|| read_env("LAUNCHPAD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(fail_open) = overrides.fail_open {
            self.governance.set_fail_open(fail_open);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_governance(&self.governance)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl GovernanceConfig {
    fn apply_patch(&mut self, patch: GovernancePatch) {
        if let Some(rate_limit) = patch.rate_limit {
            if let Some(limit) = rate_limit.limit {
                self.rate_limit.limit = limit;
            }
            if let Some(window_minutes) = rate_limit.window_minutes {
                self.rate_limit.window_minutes = window_minutes;
            }
            if let Some(fail_open) = rate_limit.fail_open {
                self.rate_limit.fail_open = fail_open;
            }
        }

        if let Some(token_budget) = patch.token_budget {
            if let Some(daily_limit) = token_budget.daily_limit {
                self.token_budget.daily_limit = daily_limit;
            }
            if let Some(fail_open) = token_budget.fail_open {
                self.token_budget.fail_open = fail_open;
            }
        }

        if let Some(daily_requests) = patch.daily_requests {
            if let Some(limit) = daily_requests.limit {
                self.daily_requests.limit = limit;
            }
            if let Some(fail_open) = daily_requests.fail_open {
                self.daily_requests.fail_open = fail_open;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(limit_bytes) = storage.limit_bytes {
                self.storage.limit_bytes = limit_bytes;
            }
            if let Some(fail_open) = storage.fail_open {
                self.storage.fail_open = fail_open;
            }
        }

        if let Some(store_retry) = patch.store_retry {
            if let Some(max_attempts) = store_retry.max_attempts {
                self.store_retry.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = store_retry.base_delay_ms {
                self.store_retry.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = store_retry.max_delay_ms {
                self.store_retry.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(sweep) = patch.sweep {
            if let Some(batch_size) = sweep.batch_size {
                self.sweep.batch_size = batch_size;
            }
            if let Some(retention_hours) = sweep.retention_hours {
                self.sweep.retention_hours = retention_hours;
            }
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation("llm.max_tokens must be greater than zero".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_governance(governance: &GovernanceConfig) -> Result<(), ConfigError> {
    let limits = [
        ("governance.rate_limit.limit", governance.rate_limit.limit),
        ("governance.rate_limit.window_minutes", governance.rate_limit.window_minutes),
        ("governance.token_budget.daily_limit", governance.token_budget.daily_limit),
        ("governance.daily_requests.limit", governance.daily_requests.limit),
        ("governance.storage.limit_bytes", governance.storage.limit_bytes),
    ];
    for (key, value) in limits {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{key} must be greater than zero")));
        }
    }

    let retry = &governance.store_retry;
    if retry.max_attempts == 0 || retry.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "governance.store_retry.max_attempts must be in range 1..=10".to_string(),
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::Validation(
            "governance.store_retry.base_delay_ms must not exceed max_delay_ms".to_string(),
        ));
    }

    if governance.sweep.batch_size == 0 || governance.sweep.batch_size > 100 {
        return Err(ConfigError::Validation(
            "governance.sweep.batch_size must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    governance: Option<GovernancePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GovernancePatch {
    rate_limit: Option<RateLimitPatch>,
    token_budget: Option<TokenBudgetPatch>,
    daily_requests: Option<DailyRequestsPatch>,
    storage: Option<StoragePatch>,
    store_retry: Option<StoreRetryPatch>,
    sweep: Option<SweepPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    limit: Option<u64>,
    window_minutes: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenBudgetPatch {
    daily_limit: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyRequestsPatch {
    limit: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    limit_bytes: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreRetryPatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SweepPatch {
    batch_size: Option<usize>,
    retention_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat, GIB};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_free_tier_limits() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let governance = &config.governance;

        ensure(governance.rate_limit.limit == 100, "rate limit defaults to 100 per window")?;
        ensure(governance.rate_limit.window_minutes == 1, "rate limit window defaults to 1 minute")?;
        ensure(governance.token_budget.daily_limit == 100_000, "token budget defaults to 100k")?;
        ensure(governance.daily_requests.limit == 1_000, "daily requests default to 1000")?;
        ensure(governance.storage.limit_bytes == 5 * GIB, "storage defaults to 5 GiB")?;
        ensure(governance.rate_limit.fail_open, "governors fail open by default")?;
        ensure(config.llm.max_tokens == 2048, "max tokens defaults to 2048")?;
        ensure(config.llm.max_retries == 3, "llm retries default to 3")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LAUNCHPAD_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("launchpad.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "anthropic"
api_key = "${TEST_LAUNCHPAD_API_KEY}"
model = "claude-sonnet"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Anthropic, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_LAUNCHPAD_API_KEY"]);
        result
    }

    #[test]
    fn governance_section_is_read_from_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("launchpad.toml");
        fs::write(
            &path,
            r#"
[governance.rate_limit]
limit = 2
window_minutes = 5
fail_open = false

[governance.storage]
limit_bytes = 1024

[governance.sweep]
batch_size = 10
"#,
        )
        .map_err(|err| err.to_string())?;

        let config = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.governance.rate_limit.limit == 2, "rate limit should come from file")?;
        ensure(config.governance.rate_limit.window_minutes == 5, "window should come from file")?;
        ensure(!config.governance.rate_limit.fail_open, "fail_open should come from file")?;
        ensure(config.governance.token_budget.fail_open, "untouched governors keep defaults")?;
        ensure(config.governance.storage.limit_bytes == 1024, "storage limit should come from file")?;
        ensure(config.governance.sweep.batch_size == 10, "sweep batch size should come from file")
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAUNCHPAD_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LAUNCHPAD_RATE_LIMIT", "7");
        env::set_var("LAUNCHPAD_GOVERNANCE_FAIL_OPEN", "false");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("launchpad.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[governance.rate_limit]
limit = 3

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    fail_open: Some(true),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.governance.rate_limit.limit == 7, "env rate limit should win over file")?;
            ensure(config.governance.storage.fail_open, "override fail_open should win over env")
        })();

        clear_vars(&[
            "LAUNCHPAD_DATABASE_URL",
            "LAUNCHPAD_RATE_LIMIT",
            "LAUNCHPAD_GOVERNANCE_FAIL_OPEN",
        ]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAUNCHPAD_LOG_LEVEL", "warn");
        env::set_var("LAUNCHPAD_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["LAUNCHPAD_LOG_LEVEL", "LAUNCHPAD_LOG_FORMAT"]);
        result
    }

    #[test]
    fn invalid_env_number_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAUNCHPAD_STORAGE_LIMIT_BYTES", "five gigs");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected env override failure".to_string()),
            Err(error) => ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. } if key == "LAUNCHPAD_STORAGE_LIMIT_BYTES"
                ),
                "error should name the offending variable",
            ),
        };

        clear_vars(&["LAUNCHPAD_STORAGE_LIMIT_BYTES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAUNCHPAD_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["LAUNCHPAD_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn zero_limits_are_rejected() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.governance.daily_requests.limit = 0;

        let has_message = matches!(
            config.validate(),
            Err(ConfigError::Validation(ref message)) if message.contains("governance.daily_requests.limit")
        );
        ensure(has_message, "validation failure should name the zero limit")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAUNCHPAD_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["LAUNCHPAD_LLM_API_KEY"]);
        result
    }
}
