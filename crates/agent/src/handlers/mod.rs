//! The handler contract and the built-in support handlers.
//!
//! Every handler takes ownership of the conversation state, records its turn,
//! and returns the state either routed onward (`next_handler` set) or in a
//! terminal status. Handlers never see a state that failed validation.

pub mod escalation;
pub mod router;
pub mod specialist;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::domain::conversation::ConversationState;
use thiserror::Error;

use crate::classifier::IntentClassifier;
use crate::knowledge::KnowledgeBase;
use crate::llm::{LlmClient, LlmError};
use crate::middleware;

pub use escalation::EscalationHandler;
pub use router::RouterHandler;
pub use specialist::SpecialistHandler;

/// Reply used whenever no handler could produce an answer.
pub const FALLBACK_RESPONSE: &str = "I'm sorry, I couldn't complete your request. A member of our \
support team will follow up with you shortly.";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handler execution failed: {0}")]
    Execution(String),
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    #[error("collaborator failed: {0}")]
    Collaborator(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Collaborator(_))
    }
}

impl From<LlmError> for HandlerError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Transient(message) => Self::Collaborator(message),
            LlmError::Timeout(elapsed) => Self::Timeout(elapsed),
            LlmError::Rejected(message) => Self::Execution(format!("completion rejected: {message}")),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, state: ConversationState) -> Result<ConversationState, HandlerError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: Handler + 'static,
    {
        self.register_arc(Arc::new(handler));
    }

    /// Registers under the handler's own name, replacing any previous entry.
    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// External capabilities shared by the built-in handlers.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub classifier: Arc<dyn IntentClassifier>,
}

/// Registers router, the four specialists and escalation, each wrapped in the
/// middleware chain the configuration asks for.
pub fn builtin_registry(config: &SwitchboardConfig, collaborators: Collaborators) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let max_tokens = config.llm.max_tokens;

    let router = RouterHandler::new(
        collaborators.classifier.clone(),
        collaborators.llm.clone(),
        config.escalation_policy(),
        config.routing_table(),
    )
    .with_escalation_handler(config.workflow.escalation_handler.clone())
    .with_max_tokens(max_tokens);
    registry.register_arc(middleware::wrap(Arc::new(router), &config.middleware, false));

    for specialist in [
        SpecialistHandler::billing(collaborators.llm.clone(), collaborators.knowledge.clone()),
        SpecialistHandler::technical(collaborators.llm.clone(), collaborators.knowledge.clone()),
        SpecialistHandler::usage(collaborators.llm.clone(), collaborators.knowledge.clone()),
        SpecialistHandler::integration(collaborators.llm.clone(), collaborators.knowledge.clone()),
    ] {
        let specialist = specialist
            .with_search_limit(config.knowledge.search_limit)
            .with_max_tokens(max_tokens);
        registry.register_arc(middleware::wrap(Arc::new(specialist), &config.middleware, true));
    }

    let escalation = EscalationHandler::named(config.workflow.escalation_handler.clone());
    registry.register_arc(middleware::wrap(Arc::new(escalation), &config.middleware, false));

    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use switchboard_core::config::SwitchboardConfig;
    use switchboard_core::routing::table::BUILTIN_HANDLERS;

    use super::{builtin_registry, Collaborators, EscalationHandler, HandlerError, HandlerRegistry};
    use crate::classifier::KeywordIntentClassifier;
    use crate::knowledge::InMemoryKnowledgeBase;
    use crate::llm::{LlmError, ScriptedLlmClient};

    #[test]
    fn retryable_errors_are_transient_collaborator_failures() {
        assert!(HandlerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(HandlerError::Collaborator("down".to_string()).is_retryable());
        assert!(!HandlerError::Execution("bug".to_string()).is_retryable());
    }

    #[test]
    fn llm_errors_map_onto_handler_errors() {
        assert_eq!(
            HandlerError::from(LlmError::Transient("busy".to_string())),
            HandlerError::Collaborator("busy".to_string())
        );
        assert!(!HandlerError::from(LlmError::Rejected("nope".to_string())).is_retryable());
    }

    #[test]
    fn registry_replaces_handlers_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(EscalationHandler::new());
        registry.register(EscalationHandler::new());

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("escalation"));
        assert!(registry.get("billing").is_none());
    }

    #[test]
    fn builtin_registry_covers_every_builtin_handler() {
        let collaborators = Collaborators {
            llm: Arc::new(ScriptedLlmClient::always("ok")),
            knowledge: Arc::new(InMemoryKnowledgeBase::seeded()),
            classifier: Arc::new(KeywordIntentClassifier::new()),
        };
        let registry = builtin_registry(&SwitchboardConfig::default(), collaborators);

        for name in BUILTIN_HANDLERS {
            assert!(registry.contains(name), "missing handler {name}");
        }
        assert_eq!(registry.len(), BUILTIN_HANDLERS.len());
    }
}
