use serde::Serialize;
use switchboard_agent::handlers::builtin_registry;
use switchboard_agent::runtime::WorkflowRuntime;
use switchboard_core::config::{LoadOptions, SwitchboardConfig};
use switchboard_core::routing::table::BUILTIN_HANDLERS;

use super::{escape_json, offline};

const PROBE_MESSAGE: &str = "I want to upgrade to premium";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub async fn run(json_output: bool) -> String {
    let report = build_report().await;

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

async fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match SwitchboardConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_handler_registry(&config));
            checks.push(check_offline_workflow(&config).await);
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["handler_registry", "offline_workflow"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_handler_registry(config: &SwitchboardConfig) -> DoctorCheck {
    let registry = builtin_registry(config, offline::collaborators(config));

    let mut missing = BUILTIN_HANDLERS
        .iter()
        .filter(|name| **name != config.workflow.escalation_handler.as_str())
        .filter(|name| !registry.contains(name))
        .map(|name| name.to_string())
        .collect::<Vec<_>>();
    for configured in [&config.workflow.entry_handler, &config.workflow.escalation_handler] {
        if !registry.contains(configured) && !missing.contains(configured) {
            missing.push(configured.clone());
        }
    }

    if missing.is_empty() {
        DoctorCheck {
            name: "handler_registry",
            status: CheckStatus::Pass,
            details: format!("registered handlers: {}", registry.names().join(", ")),
        }
    } else {
        DoctorCheck {
            name: "handler_registry",
            status: CheckStatus::Fail,
            details: format!("missing handlers: {}", missing.join(", ")),
        }
    }
}

async fn check_offline_workflow(config: &SwitchboardConfig) -> DoctorCheck {
    let runtime = WorkflowRuntime::from_config(config, offline::collaborators(config));

    match runtime.run_workflow(PROBE_MESSAGE, None).await {
        Ok(result) if result.status == "resolved" => DoctorCheck {
            name: "offline_workflow",
            status: CheckStatus::Pass,
            details: format!("probe resolved via {}", result.handler_history.join(" > ")),
        },
        Ok(result) => DoctorCheck {
            name: "offline_workflow",
            status: CheckStatus::Fail,
            details: format!(
                "probe ended as {} ({})",
                result.status,
                if result.escalation_reason.is_empty() {
                    "no reason given"
                } else {
                    result.escalation_reason.as_str()
                }
            ),
        },
        Err(error) => DoctorCheck {
            name: "offline_workflow",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
