use anyhow::{Context, Result};
use switchboard_agent::runtime::{EngineError, WorkflowRuntime};
use switchboard_core::config::{ConfigOverrides, LoadOptions, SwitchboardConfig};
use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::lifecycle::ConversationContext;
use switchboard_core::result::WorkflowResult;

use super::{offline, CommandResult};

#[derive(Clone, Debug, Default)]
pub struct RunArgs {
    pub message: String,
    pub customer_id: Option<String>,
    pub conversation_id: Option<String>,
    pub max_turns: Option<u32>,
    pub json: bool,
}

pub async fn run(args: RunArgs) -> CommandResult {
    let config = match SwitchboardConfig::load(LoadOptions {
        overrides: ConfigOverrides { max_turns: args.max_turns, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), 2);
        }
    };

    match execute(&config, &args).await {
        Ok(result) => render(&result, args.json),
        Err(error) => match error.downcast_ref::<EngineError>() {
            Some(engine_error @ EngineError::InvalidInput(_)) => {
                CommandResult::failure("run", "invalid_input", engine_error.user_message(), 3)
            }
            Some(engine_error) => CommandResult::failure(
                "run",
                "workflow_failure",
                format!("{} ({engine_error})", engine_error.user_message()),
                4,
            ),
            None => CommandResult::failure("run", "workflow_failure", format!("{error:#}"), 4),
        },
    }
}

async fn execute(config: &SwitchboardConfig, args: &RunArgs) -> Result<WorkflowResult> {
    let runtime = WorkflowRuntime::from_config(config, offline::collaborators(config));
    let context = ConversationContext {
        conversation_id: args.conversation_id.clone().map(ConversationId),
        customer_id: args.customer_id.clone(),
        ..ConversationContext::default()
    };

    let result = runtime
        .run_workflow(&args.message, Some(context))
        .await
        .context("workflow run failed")?;
    Ok(result)
}

fn render(result: &WorkflowResult, json: bool) -> CommandResult {
    let summary = format!(
        "[{}] {} (handlers: {})",
        result.status,
        result.response_text,
        result.handler_history.join(" > ")
    );

    if !json {
        return CommandResult::success("run", summary);
    }

    match serde_json::to_value(result) {
        Ok(value) => CommandResult::success_with("run", summary, Some(value)),
        Err(error) => CommandResult::failure("run", "serialization", error.to_string(), 5),
    }
}
