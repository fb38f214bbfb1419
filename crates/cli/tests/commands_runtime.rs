use std::env;
use std::sync::{Mutex, MutexGuard, OnceLock};

use serde_json::Value;
use switchboard_cli::commands::run::RunArgs;
use switchboard_cli::commands::{config, doctor, run};

const KEYS: [&str; 8] = [
    "SWITCHBOARD_WORKFLOW_MAX_TURNS",
    "SWITCHBOARD_WORKFLOW_ENTRY_HANDLER",
    "SWITCHBOARD_LLM_API_KEY",
    "SWITCHBOARD_LLM_MODEL",
    "SWITCHBOARD_LOGGING_LEVEL",
    "SWITCHBOARD_LOGGING_FORMAT",
    "SWITCHBOARD_LOG_LEVEL",
    "SWITCHBOARD_LOG_FORMAT",
];

/// Holds the env lock and restores the touched variables on drop.
struct EnvGuard {
    previous: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env(vars: &[(&str, &str)]) -> EnvGuard {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let lock = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let previous = KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();
    for key in KEYS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    EnvGuard { previous, _lock: lock }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn args(message: &str) -> RunArgs {
    RunArgs { message: message.to_string(), ..RunArgs::default() }
}

#[tokio::test]
async fn run_resolves_upgrade_request_offline() {
    let _env = with_env(&[]);

    let result = run::run(RunArgs { json: true, ..args("I want to upgrade to premium") }).await;
    assert_eq!(result.exit_code, 0, "expected successful workflow run");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "run");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["result"]["status"], "resolved");
    assert_eq!(payload["result"]["handler_history"], serde_json::json!(["router", "billing"]));
    assert_eq!(payload["result"]["primary_intent"], "billing_upgrade");
}

#[tokio::test]
async fn run_without_json_omits_result_payload() {
    let _env = with_env(&[]);

    let result = run::run(args("hello")).await;
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert!(payload.get("result").is_none());
    let message = payload["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("[resolved]"));
}

#[tokio::test]
async fn run_honours_customer_and_conversation_ids() {
    let _env = with_env(&[]);

    let result = run::run(RunArgs {
        customer_id: Some("cust-7".to_string()),
        conversation_id: Some("conv-cli".to_string()),
        json: true,
        ..args("how do I set up a webhook integration")
    })
    .await;

    let payload = parse_payload(&result.output);
    assert_eq!(payload["result"]["customer_id"], "cust-7");
    assert_eq!(payload["result"]["conversation_id"], "conv-cli");
}

#[tokio::test]
async fn run_rejects_blank_message() {
    let _env = with_env(&[]);

    let result = run::run(args("   ")).await;
    assert_eq!(result.exit_code, 3, "expected invalid input code");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "invalid_input");
}

#[tokio::test]
async fn run_reports_config_failure() {
    let _env = with_env(&[("SWITCHBOARD_WORKFLOW_MAX_TURNS", "zero")]);

    let result = run::run(args("hello")).await;
    assert_eq!(result.exit_code, 2, "expected config validation failure code");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "config_validation");
}

#[tokio::test]
async fn run_with_single_turn_budget_escalates() {
    let _env = with_env(&[]);

    let result =
        run::run(RunArgs { max_turns: Some(1), json: true, ..args("I want to upgrade to premium") })
            .await;
    let payload = parse_payload(&result.output);

    assert_eq!(payload["result"]["status"], "escalated");
    assert_eq!(payload["result"]["escalation_reason"], "turn budget exceeded");
    assert_eq!(payload["result"]["handler_history"], serde_json::json!(["router", "escalation"]));
}

#[test]
fn config_reports_sources_and_redacts_secrets() {
    let _env = with_env(&[
        ("SWITCHBOARD_WORKFLOW_MAX_TURNS", "4"),
        ("SWITCHBOARD_LLM_API_KEY", "sk-very-secret"),
    ]);

    let output = config::run();

    assert!(output.contains("- workflow.max_turns = 4 (source: env (SWITCHBOARD_WORKFLOW_MAX_TURNS))"));
    assert!(output.contains("- workflow.entry_handler = router (source: default)"));
    assert!(output.contains("- llm.api_key = sk-*** (source: env (SWITCHBOARD_LLM_API_KEY); reserved:"));
    assert!(output.contains("- llm.model = support-large (source: default; reserved:"));
    assert!(!output.contains("very-secret"));
}

#[test]
fn config_attributes_log_level_alias() {
    let _env = with_env(&[("SWITCHBOARD_LOG_LEVEL", "debug")]);

    let output = config::run();
    assert!(output.contains("- logging.level = debug (source: env (SWITCHBOARD_LOG_LEVEL))"));
}

#[tokio::test]
async fn doctor_passes_with_default_config() {
    let _env = with_env(&[]);

    let output = doctor::run(true).await;
    let report = parse_payload(&output);

    assert_eq!(report["overall_status"], "pass");
    let names = report["checks"]
        .as_array()
        .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    assert_eq!(names, vec!["config_validation", "handler_registry", "offline_workflow"]);
}

#[tokio::test]
async fn doctor_flags_unknown_entry_handler() {
    let _env = with_env(&[("SWITCHBOARD_WORKFLOW_ENTRY_HANDLER", "triage")]);

    let output = doctor::run(false).await;
    assert!(output.starts_with("doctor: one or more readiness checks failed"));
    assert!(output.contains("- [fail] handler_registry: missing handlers: triage"));
}
