use std::sync::Arc;

use serde_json::{json, Map, Value};
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::domain::conversation::{ConversationState, ConversationStatus};
use switchboard_core::errors::{InvalidStateError, RoutingError};
use switchboard_core::history::StateHistory;
use switchboard_core::lifecycle::{ConversationContext, StateManager};
use switchboard_core::result::{ResultHandler, WorkflowResult};
use switchboard_core::routing::escalation::{
    EscalationDecision, EscalationPolicy, TURN_BUDGET_EXCEEDED,
};
use switchboard_core::routing::table::{ESCALATION, ROUTER};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::handlers::{builtin_registry, Collaborators, HandlerError, HandlerRegistry, FALLBACK_RESPONSE};
use crate::store::ConversationStore;

pub const UNRESOLVED_TERMINATION: &str = "handler terminated without resolution";

const CANCELLED_RESPONSE: &str = "Your request was cancelled before it could be completed.";

/// Failures that escape a workflow run. Everything else is converted into an
/// escalated result before it reaches the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow input: {0}")]
    InvalidInput(InvalidStateError),
    #[error("handler `{handler}` broke the state contract: {source}")]
    ContractViolation {
        handler: String,
        #[source]
        source: InvalidStateError,
    },
    #[error("workflow produced an invalid result: {0}")]
    InvalidResult(InvalidStateError),
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(_) => {
                "Please send a message describing what you need help with.".to_string()
            }
            Self::ContractViolation { .. } | Self::InvalidResult(_) => {
                "Something went wrong while handling your request. Please try again later."
                    .to_string()
            }
        }
    }
}

/// Drives one conversation through the registered handlers until it reaches
/// a terminal state, the turn budget runs out, or the caller cancels.
pub struct WorkflowRuntime {
    registry: HandlerRegistry,
    state_manager: StateManager,
    result_handler: ResultHandler,
    policy: EscalationPolicy,
    store: Option<Arc<dyn ConversationStore>>,
    entry_handler: String,
    escalation_handler: String,
    allow_revisits: bool,
}

impl WorkflowRuntime {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            state_manager: StateManager::default(),
            result_handler: ResultHandler::default(),
            policy: EscalationPolicy::default(),
            store: None,
            entry_handler: ROUTER.to_string(),
            escalation_handler: ESCALATION.to_string(),
            allow_revisits: false,
        }
    }

    /// Runtime with the built-in handlers, wired as `config` describes.
    pub fn from_config(config: &SwitchboardConfig, collaborators: Collaborators) -> Self {
        Self::new(builtin_registry(config, collaborators)).configured(config)
    }

    /// Applies workflow and escalation settings without touching the registry.
    pub fn configured(mut self, config: &SwitchboardConfig) -> Self {
        self.state_manager = StateManager::new(config.workflow.max_turns);
        self.policy = config.escalation_policy();
        self.entry_handler = config.workflow.entry_handler.clone();
        self.escalation_handler = config.workflow.escalation_handler.clone();
        self.allow_revisits = config.workflow.allow_revisits;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Records every accepted state into `history`.
    pub fn with_history(mut self, history: StateHistory) -> Self {
        self.state_manager = self.state_manager.with_history(history);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        let history = self.state_manager.history().cloned();
        self.state_manager = StateManager::new(max_turns);
        if let Some(history) = history {
            self.state_manager = self.state_manager.with_history(history);
        }
        self
    }

    pub fn with_allow_revisits(mut self, allow_revisits: bool) -> Self {
        self.allow_revisits = allow_revisits;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub async fn run_workflow(
        &self,
        message: &str,
        context: Option<ConversationContext>,
    ) -> Result<WorkflowResult, EngineError> {
        self.run_workflow_with_cancellation(message, context, CancellationToken::new()).await
    }

    /// Like [`Self::run_workflow`], but stops before the next handler once
    /// `cancel` fires and reports the last validated state.
    pub async fn run_workflow_with_cancellation(
        &self,
        message: &str,
        context: Option<ConversationContext>,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, EngineError> {
        let mut state =
            self.state_manager.create_initial(message, context).map_err(EngineError::InvalidInput)?;

        info!(
            event_name = "workflow.started",
            conversation_id = %state.conversation_id,
            customer_id = %state.customer_id,
            entry_handler = %self.entry_handler,
            max_turns = state.max_turns,
            "workflow run started"
        );

        let mut next = Some(self.entry_handler.clone());
        let mut cancelled = false;

        while let Some(requested) = next.take() {
            if cancel.is_cancelled() {
                warn!(
                    event_name = "workflow.cancelled",
                    conversation_id = %state.conversation_id,
                    pending_handler = %requested,
                    turn_count = state.turn_count,
                    "workflow run cancelled between handlers"
                );
                cancelled = true;
                break;
            }

            let (checked, handler_name) = self.resolve_handler(state, requested)?;
            state = checked;
            state = self.invoke(state, &handler_name).await?;
            next = self.next_step(&mut state)?;
        }

        if !cancelled && !state.is_terminal() {
            state = self.finish_unresolved(state)?;
        }

        let mut result = self.result_handler.parse(&state);
        if cancelled {
            result.cancelled = true;
            if result.response_text.trim().is_empty() {
                result.response_text = CANCELLED_RESPONSE.to_string();
            }
        } else {
            self.result_handler.validate(&result).map_err(EngineError::InvalidResult)?;
            self.persist(&state, result.sanitized_state.clone()).await;
        }

        info!(
            event_name = "workflow.completed",
            conversation_id = %state.conversation_id,
            status = %state.status,
            turn_count = state.turn_count,
            handlers = %state.handler_history.join(">"),
            cancelled,
            "workflow run finished"
        );

        Ok(result)
    }

    /// Decides which handler actually runs for `requested`, diverting to the
    /// escalation handler when the budget is spent or the route is invalid.
    fn resolve_handler(
        &self,
        state: ConversationState,
        requested: String,
    ) -> Result<(ConversationState, String), EngineError> {
        if requested == self.escalation_handler {
            return Ok((state, requested));
        }

        if state.turn_budget_exhausted() {
            warn!(
                event_name = "workflow.turn_budget_exceeded",
                conversation_id = %state.conversation_id,
                requested_handler = %requested,
                turn_count = state.turn_count,
                max_turns = state.max_turns,
                "turn budget exhausted, forcing escalation"
            );
            let state = self.flag_escalation(state, TURN_BUDGET_EXCEEDED)?;
            return Ok((state, self.escalation_handler.clone()));
        }

        let routing_error = if !self.registry.contains(&requested) {
            Some(RoutingError::UnknownHandler(requested.clone()))
        } else if !self.allow_revisits && state.handler_history.contains(&requested) {
            Some(RoutingError::CycleDetected(requested.clone()))
        } else {
            None
        };

        match routing_error {
            Some(error) => {
                warn!(
                    event_name = "workflow.routing_error",
                    conversation_id = %state.conversation_id,
                    handler = error.handler(),
                    reason_code = error.reason_code(),
                    error = %error,
                    "invalid route, escalating"
                );
                let state = self.flag_escalation(state, &error.to_string())?;
                Ok((state, self.escalation_handler.clone()))
            }
            None => Ok((state, requested)),
        }
    }

    async fn invoke(
        &self,
        state: ConversationState,
        handler_name: &str,
    ) -> Result<ConversationState, EngineError> {
        let previous = state;
        let candidate = match self.registry.get(handler_name) {
            Some(handler) => {
                let mut input = previous.clone();
                input.next_handler = None;
                match handler.process(input).await {
                    Ok(candidate) => candidate,
                    Err(error) => self.recover_from_failure(&previous, handler_name, &error),
                }
            }
            None => {
                let error = HandlerError::Execution(format!("handler `{handler_name}` is not registered"));
                self.recover_from_failure(&previous, handler_name, &error)
            }
        };

        self.state_manager.accept(&previous, &candidate, handler_name).map_err(|source| {
            EngineError::ContractViolation { handler: handler_name.to_string(), source }
        })?;

        info!(
            event_name = "workflow.handler_completed",
            conversation_id = %candidate.conversation_id,
            handler = handler_name,
            turn_count = candidate.turn_count,
            status = %candidate.status,
            next_handler = candidate.next_handler.as_deref().unwrap_or("-"),
            "handler completed"
        );

        Ok(candidate)
    }

    /// Terminal escalated successor of `previous` for a handler that failed.
    fn recover_from_failure(
        &self,
        previous: &ConversationState,
        handler_name: &str,
        error: &HandlerError,
    ) -> ConversationState {
        warn!(
            event_name = "workflow.handler_failed",
            conversation_id = %previous.conversation_id,
            handler = handler_name,
            retryable = error.is_retryable(),
            error = %error,
            "handler failed, escalating"
        );

        let mut state = previous.clone();
        state.begin_final_turn(handler_name);
        state.respond(FALLBACK_RESPONSE, 0.0, handler_name);
        state.escalate(error.to_string());
        state
    }

    fn next_step(&self, state: &mut ConversationState) -> Result<Option<String>, EngineError> {
        if state.is_terminal() {
            if let Some(stray) = state.next_handler.take() {
                warn!(
                    event_name = "workflow.stray_route",
                    conversation_id = %state.conversation_id,
                    status = %state.status,
                    ignored_handler = %stray,
                    "terminal status set together with a next handler, terminating"
                );
            }
            return Ok(None);
        }

        let Some(next) = state.next_handler.clone() else {
            return Ok(None);
        };
        if next == self.escalation_handler {
            return Ok(Some(next));
        }

        match self.policy.evaluate(state) {
            EscalationDecision::Continue => Ok(Some(next)),
            EscalationDecision::Escalate { trigger, reason } => {
                info!(
                    event_name = "workflow.backstop_escalation",
                    conversation_id = %state.conversation_id,
                    reason_code = trigger.reason_code(),
                    requested_handler = %next,
                    "escalation policy overrides requested route"
                );
                let flagged = self.flag_escalation(state.clone(), &reason)?;
                *state = flagged;
                Ok(Some(self.escalation_handler.clone()))
            }
        }
    }

    fn finish_unresolved(&self, state: ConversationState) -> Result<ConversationState, EngineError> {
        warn!(
            event_name = "workflow.unresolved_termination",
            conversation_id = %state.conversation_id,
            handler = state.current_handler.as_deref().unwrap_or("-"),
            "handler ended the run without a terminal status"
        );

        let mut updates = Map::new();
        updates.insert("status".to_string(), json!(ConversationStatus::Escalated.as_str()));
        updates.insert("should_escalate".to_string(), Value::Bool(true));
        updates.insert("escalation_reason".to_string(), json!(UNRESOLVED_TERMINATION));
        if state.response_text.as_deref().map_or(true, |text| text.trim().is_empty()) {
            updates.insert("response_text".to_string(), json!(FALLBACK_RESPONSE));
        }

        self.state_manager
            .apply_updates(state, updates)
            .map_err(|source| EngineError::ContractViolation { handler: "workflow".to_string(), source })
    }

    fn flag_escalation(
        &self,
        state: ConversationState,
        reason: &str,
    ) -> Result<ConversationState, EngineError> {
        let mut updates = Map::new();
        updates.insert("should_escalate".to_string(), Value::Bool(true));
        updates.insert("escalation_reason".to_string(), json!(reason));

        self.state_manager
            .apply_updates(state, updates)
            .map_err(|source| EngineError::ContractViolation { handler: "workflow".to_string(), source })
    }

    async fn persist(&self, state: &ConversationState, snapshot: Value) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(error) = store.persist(&state.conversation_id, snapshot).await {
            warn!(
                event_name = "store.persist_failed",
                conversation_id = %state.conversation_id,
                error = %error,
                "could not persist conversation snapshot"
            );
        }
    }
}
