use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use launchpad_cli::commands::{check, config, doctor, migrate, parse, sweep, usage};
use launchpad_core::domain::agent::AgentKind;
use serde_json::Value;

const PLAN_RESPONSE: &str = r#"Sure! Here's your plan:
```json
{"executionPlan": [{"taskId": "t1", "title": "Draft pitch deck", "priority": "high",
  "owner": "founder", "deadline": "2026-03-12", "estimatedHours": 4, "dependencies": []}],
 "alerts": [], "metrics": {"totalTasks": 1, "highPriorityCount": 1, "blockedCount": 0, "estimatedWeeklyHours": 4}}
```"#;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("LAUNCHPAD_DATABASE_URL", "sqlite::memory:"), ("LAUNCHPAD_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_for_invalid_logging_level() {
    with_env(&[("LAUNCHPAD_LOGGING_LEVEL", "chatty")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn parse_accepts_fenced_plan_response() {
    let result = parse::run_with_input(AgentKind::ExecutionPlanner, PLAN_RESPONSE);
    assert_eq!(result.exit_code, 0, "{}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["data"]["success"], true);
    assert_eq!(payload["data"]["data"]["kind"], "execution_plan");
}

#[test]
fn parse_rejects_response_without_json() {
    let result = parse::run_with_input(AgentKind::GrantScout, "I could not find any grants, sorry.");
    assert_eq!(result.exit_code, 1);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "invalid");
    assert!(payload["message"].as_str().unwrap_or_default().contains("rejected at extraction stage"));
    assert_eq!(payload["data"]["success"], false);
    assert!(!payload["data"]["errors"].as_array().map(Vec::is_empty).unwrap_or(true));
}

#[test]
fn parse_reads_response_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("response.txt");
    fs::write(&path, PLAN_RESPONSE).expect("write response");

    let result = parse::run("plan", Some(&path));
    assert_eq!(result.exit_code, 0, "{}", result.output);

    let unknown = parse::run("pitch", Some(&path));
    assert_eq!(unknown.exit_code, 2);
    assert_eq!(parse_payload(&unknown.output)["error_class"], "invalid_argument");

    let missing = parse::run("plan", Some(&dir.path().join("absent.txt")));
    assert_eq!(missing.exit_code, 2);
    let payload = parse_payload(&missing.output);
    assert_eq!(payload["error_class"], "input");
    assert!(payload["message"].as_str().unwrap_or_default().contains("failed to read response from"));
}

#[test]
fn check_denies_once_rate_limit_is_reached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("LAUNCHPAD_DATABASE_URL", url.as_str()), ("LAUNCHPAD_RATE_LIMIT", "1")], || {
        let first = check::run("founder-1");
        assert_eq!(first.exit_code, 0, "{}", first.output);
        assert_eq!(parse_payload(&first.output)["status"], "ok");

        let second = check::run("founder-1");
        assert_eq!(second.exit_code, 1, "{}", second.output);
        let payload = parse_payload(&second.output);
        assert_eq!(payload["status"], "denied");
        assert_eq!(payload["data"]["deniedBy"], "rate_limit");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("Rate limit exceeded"));

        // A different subject has its own counters.
        assert_eq!(check::run("founder-2").exit_code, 0);
    });
}

#[test]
fn usage_reports_all_quotas_without_consuming() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("LAUNCHPAD_DATABASE_URL", url.as_str())], || {
        assert_eq!(check::run("founder-1").exit_code, 0);

        let first = parse_payload(&usage::run("founder-1").output);
        let second = parse_payload(&usage::run("founder-1").output);
        assert_eq!(first["status"], "ok");
        assert_eq!(first["data"], second["data"]);

        let quotas = first["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(quotas.len(), 4);
        let rate = quotas.iter().find(|quota| quota["quota"] == "rate_limit").expect("rate limit");
        assert_eq!(rate["currentUsage"], 1);
    });
}

#[test]
fn sweep_reports_per_quota_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("LAUNCHPAD_DATABASE_URL", url.as_str())], || {
        assert_eq!(check::run("founder-1").exit_code, 0);

        let result = sweep::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        let reports = payload["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(reports.len(), 4);
        // Fresh windows are inside the retention period.
        assert!(reports.iter().all(|report| report["deleted"] == 0));
    });
}

#[test]
fn doctor_reports_unmigrated_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("LAUNCHPAD_DATABASE_URL", url.as_str())], || {
        let (output, passed) = doctor::run(true);
        assert!(!passed);

        let report = parse_payload(&output);
        let status = |name: &str| {
            report["checks"]
                .as_array()
                .and_then(|checks| checks.iter().find(|check| check["name"] == name))
                .map(|check| check["status"].clone())
        };
        assert_eq!(status("config_validation"), Some(Value::from("pass")));
        assert_eq!(status("database_connectivity"), Some(Value::from("pass")));
        assert_eq!(status("migrations"), Some(Value::from("fail")));

        assert_eq!(migrate::run().exit_code, 0);
        let (_, passed) = doctor::run(true);
        assert!(passed);
    });
}

#[test]
fn config_attributes_env_sources() {
    with_env(&[("LAUNCHPAD_RATE_LIMIT", "7"), ("LAUNCHPAD_LOG_LEVEL", "debug")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);
        assert!(result
            .output
            .contains("- governance.rate_limit.limit = 7 (source: env (LAUNCHPAD_RATE_LIMIT))"));
        assert!(result.output.contains("- logging.level = debug (source: env (LAUNCHPAD_LOG_LEVEL))"));
        assert!(result.output.contains("- llm.api_key = <unset> (source: default)"));
    });
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("launchpad.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LAUNCHPAD_DATABASE_URL",
        "LAUNCHPAD_DATABASE_MAX_CONNECTIONS",
        "LAUNCHPAD_DATABASE_TIMEOUT_SECS",
        "LAUNCHPAD_LLM_PROVIDER",
        "LAUNCHPAD_LLM_API_KEY",
        "LAUNCHPAD_LLM_BASE_URL",
        "LAUNCHPAD_LLM_MODEL",
        "LAUNCHPAD_LLM_MAX_TOKENS",
        "LAUNCHPAD_LLM_TEMPERATURE",
        "LAUNCHPAD_LLM_TIMEOUT_SECS",
        "LAUNCHPAD_LLM_MAX_RETRIES",
        "LAUNCHPAD_RATE_LIMIT",
        "LAUNCHPAD_RATE_LIMIT_WINDOW_MINUTES",
        "LAUNCHPAD_TOKEN_BUDGET_DAILY_LIMIT",
        "LAUNCHPAD_DAILY_REQUEST_LIMIT",
        "LAUNCHPAD_STORAGE_LIMIT_BYTES",
        "LAUNCHPAD_GOVERNANCE_FAIL_OPEN",
        "LAUNCHPAD_STORE_RETRY_MAX_ATTEMPTS",
        "LAUNCHPAD_LOGGING_LEVEL",
        "LAUNCHPAD_LOGGING_FORMAT",
        "LAUNCHPAD_LOG_LEVEL",
        "LAUNCHPAD_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
