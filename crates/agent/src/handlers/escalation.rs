use async_trait::async_trait;
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::routing::table::ESCALATION;

use super::{Handler, HandlerError};

pub const HANDOFF_RESPONSE: &str = "I'm connecting you with a member of our support team. They \
have the full conversation and will follow up with you shortly.";

const DEFAULT_REASON: &str = "escalation requested";

/// Hands the conversation to a person. Always terminal, never calls out.
pub struct EscalationHandler {
    name: String,
}

impl Default for EscalationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EscalationHandler {
    pub fn new() -> Self {
        Self::named(ESCALATION)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Handler for EscalationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        state.begin_final_turn(&self.name);

        let reason = state
            .escalation_reason
            .clone()
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        state.record_tool("human_handoff");
        state.respond(HANDOFF_RESPONSE, 1.0, &self.name);
        state.escalate(reason);
        Ok(state)
    }
}
