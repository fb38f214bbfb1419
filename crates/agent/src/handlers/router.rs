use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::domain::intent::Intent;
use switchboard_core::routing::escalation::{EscalationDecision, EscalationPolicy};
use switchboard_core::routing::table::{RouteTarget, RoutingTable, ESCALATION, ROUTER};
use tracing::debug;

use super::{Handler, HandlerError};
use crate::classifier::{ClassificationError, IntentClassifier};
use crate::llm::LlmClient;

const GREETING_RESPONSE: &str =
    "Hello! I can help with billing, technical issues, product usage and integrations. What do you need?";

const GENERAL_SYSTEM_PROMPT: &str = "You are a friendly customer support assistant. Answer the \
customer's question briefly. If you are unsure, say that a support specialist can follow up.";

/// Classifies the latest message and decides where the conversation goes.
pub struct RouterHandler {
    classifier: Arc<dyn IntentClassifier>,
    llm: Arc<dyn LlmClient>,
    policy: EscalationPolicy,
    routes: RoutingTable,
    escalation_handler: String,
    max_tokens: u32,
}

impl RouterHandler {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        llm: Arc<dyn LlmClient>,
        policy: EscalationPolicy,
        routes: RoutingTable,
    ) -> Self {
        Self {
            classifier,
            llm,
            policy,
            routes,
            escalation_handler: ESCALATION.to_string(),
            max_tokens: 512,
        }
    }

    pub fn with_escalation_handler(mut self, name: impl Into<String>) -> Self {
        self.escalation_handler = name.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn hand_off(&self, state: &mut ConversationState, reason: String) {
        state.should_escalate = true;
        state.escalation_reason = Some(reason);
        state.route_to(self.escalation_handler.clone());
    }

    async fn answer_directly(
        &self,
        mut state: ConversationState,
        intent: Intent,
    ) -> Result<ConversationState, HandlerError> {
        if intent == Intent::Greeting {
            state.respond(GREETING_RESPONSE, 1.0, ROUTER);
            state.resolve();
            return Ok(state);
        }

        let question = state.latest_user_message().unwrap_or_default().to_string();
        let answer = self.llm.complete(GENERAL_SYSTEM_PROMPT, &question, self.max_tokens).await?;
        state.record_tool("llm_completion");
        if answer.trim().is_empty() {
            self.hand_off(&mut state, "no direct answer available".to_string());
            return Ok(state);
        }

        let confidence = state.intent_confidence;
        state.respond(answer.trim(), confidence, ROUTER);
        state.resolve();
        Ok(state)
    }
}

#[async_trait]
impl Handler for RouterHandler {
    fn name(&self) -> &str {
        ROUTER
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        state.begin_turn(ROUTER);

        let message = state.latest_user_message().unwrap_or_default().to_string();
        let classification = match self.classifier.classify(&message).await {
            Ok(classification) => classification,
            Err(ClassificationError::Service(error)) => return Err(error.into()),
            Err(error) => {
                self.hand_off(&mut state, format!("intent classification failed: {error}"));
                return Ok(state);
            }
        };

        state.record_tool("intent_classifier");
        state.primary_intent = Some(classification.intent);
        state.intent_confidence = classification.confidence;
        state.sentiment = classification.sentiment;
        state.entities.extend(classification.entities);

        debug!(
            event_name = "router.classified",
            conversation_id = %state.conversation_id,
            intent = classification.intent.as_str(),
            confidence = classification.confidence,
            sentiment = classification.sentiment,
            "message classified"
        );

        if let EscalationDecision::Escalate { reason, .. } = self.policy.evaluate(&state) {
            self.hand_off(&mut state, reason);
            return Ok(state);
        }

        match self.routes.route(classification.intent) {
            RouteTarget::Handler(handler) => {
                state.route_to(handler);
                Ok(state)
            }
            RouteTarget::Direct => self.answer_directly(state, classification.intent).await,
            RouteTarget::Escalate => {
                self.hand_off(
                    &mut state,
                    format!("{} requests are handled by a person", classification.intent),
                );
                Ok(state)
            }
        }
    }
}
