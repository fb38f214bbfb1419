//! State lifecycle management.
//!
//! [`StateManager`] is the only place a [`ConversationState`] is created, and
//! every mutation the runtime accepts goes through one of its validation
//! gates. It performs no I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::conversation::{
    ConversationId, ConversationState, Message, DEFAULT_MAX_TURNS,
};
use crate::errors::InvalidStateError;
use crate::history::StateHistory;

pub const DEFAULT_CUSTOMER_ID: &str = "anonymous";

/// Field-name keyed partial update applied by [`StateManager::apply_updates`].
pub type StateUpdates = Map<String, Value>;

/// Resumption context supplied alongside an incoming message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationContext {
    pub conversation_id: Option<ConversationId>,
    pub customer_id: Option<String>,
    pub customer_metadata: BTreeMap<String, Value>,
    pub max_turns: Option<u32>,
    pub prior_messages: Vec<Message>,
}

#[derive(Clone, Debug)]
pub struct StateManager {
    default_max_turns: u32,
    history: Option<StateHistory>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl StateManager {
    pub fn new(default_max_turns: u32) -> Self {
        Self { default_max_turns, history: None }
    }

    /// Enables snapshot tracking of every accepted state.
    pub fn with_history(mut self, history: StateHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&StateHistory> {
        self.history.as_ref()
    }

    pub fn create_initial(
        &self,
        message: &str,
        context: Option<ConversationContext>,
    ) -> Result<ConversationState, InvalidStateError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(InvalidStateError::new("message", "non-empty text", format!("{message:?}")));
        }

        let context = context.unwrap_or_default();
        let conversation_id = context.conversation_id.unwrap_or_else(ConversationId::generate);
        let customer_id = context
            .customer_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CUSTOMER_ID.to_string());

        let mut state = ConversationState::new(conversation_id, customer_id);
        state.max_turns = context.max_turns.unwrap_or(self.default_max_turns);
        state.customer_metadata = default_customer_metadata();
        state.customer_metadata.extend(context.customer_metadata);
        state.messages = context.prior_messages;
        state.messages.push(Message::user(trimmed));

        self.validate(&state)?;
        self.record("created", &state);
        Ok(state)
    }

    /// Merges `updates` into `state` field by field and re-validates.
    ///
    /// Unknown field names are logged and skipped. A value of the wrong shape,
    /// an invariant violation, or an illegal transition fails with the
    /// offending field.
    pub fn apply_updates(
        &self,
        state: ConversationState,
        updates: StateUpdates,
    ) -> Result<ConversationState, InvalidStateError> {
        let mut fields = match serde_json::to_value(&state) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(InvalidStateError::new("state", "an object", other.to_string()));
            }
            Err(error) => {
                return Err(InvalidStateError::new("state", "a serializable record", error.to_string()));
            }
        };

        for (field, value) in updates {
            if !fields.contains_key(&field) {
                warn!(
                    event_name = "state.unknown_update_field",
                    conversation_id = %state.conversation_id,
                    field = %field,
                    "ignoring unknown conversation state field"
                );
                continue;
            }

            fields.insert(field.clone(), value.clone());
            if let Err(error) =
                serde_json::from_value::<ConversationState>(Value::Object(fields.clone()))
            {
                return Err(InvalidStateError::new(
                    field.as_str(),
                    expected_shape(&field),
                    format!("{value} ({error})"),
                ));
            }
        }

        let updated: ConversationState = serde_json::from_value(Value::Object(fields))
            .map_err(|error| InvalidStateError::new("state", "a well-formed record", error.to_string()))?;

        self.validate(&updated)?;
        self.validate_transition(&state, &updated)?;
        self.record("updated", &updated);
        Ok(updated)
    }

    /// Validates `candidate` on its own, as a successor of `previous`, and as
    /// one turn taken by `handler`, then records it under the handler's name
    /// when history tracking is enabled.
    pub fn accept(
        &self,
        previous: &ConversationState,
        candidate: &ConversationState,
        handler: &str,
    ) -> Result<(), InvalidStateError> {
        self.validate(candidate)?;
        self.validate_transition(previous, candidate)?;
        self.validate_handler_step(previous, candidate, handler)?;
        self.record(handler, candidate);
        Ok(())
    }

    /// Fails with the first invariant violation, if any.
    pub fn validate(&self, state: &ConversationState) -> Result<(), InvalidStateError> {
        match self.violations(state).into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }

    /// Every invariant violation in `state`, in field order.
    pub fn violations(&self, state: &ConversationState) -> Vec<InvalidStateError> {
        let mut violations = Vec::new();

        if state.conversation_id.0.trim().is_empty() {
            violations.push(InvalidStateError::new(
                "conversation_id",
                "a non-empty identifier",
                format!("{:?}", state.conversation_id.0),
            ));
        }
        if !in_range(state.intent_confidence, 0.0, 1.0) {
            violations.push(InvalidStateError::new(
                "intent_confidence",
                "a number in [0, 1]",
                state.intent_confidence.to_string(),
            ));
        }
        if !in_range(state.sentiment, -1.0, 1.0) {
            violations.push(InvalidStateError::new(
                "sentiment",
                "a number in [-1, 1]",
                state.sentiment.to_string(),
            ));
        }
        if !in_range(state.response_confidence, 0.0, 1.0) {
            violations.push(InvalidStateError::new(
                "response_confidence",
                "a number in [0, 1]",
                state.response_confidence.to_string(),
            ));
        }
        if state.max_turns == 0 {
            violations.push(InvalidStateError::new(
                "max_turns",
                "greater than 0",
                state.max_turns.to_string(),
            ));
        }
        if state.turn_count > state.max_turns {
            violations.push(InvalidStateError::new(
                "turn_count",
                format!("at most max_turns ({})", state.max_turns),
                state.turn_count.to_string(),
            ));
        }

        violations
    }

    pub fn validate_transition(
        &self,
        old: &ConversationState,
        new: &ConversationState,
    ) -> Result<(), InvalidStateError> {
        if old.conversation_id != new.conversation_id {
            return Err(InvalidStateError::new(
                "conversation_id",
                format!("unchanged (`{}`)", old.conversation_id),
                format!("`{}`", new.conversation_id),
            ));
        }

        if new.turn_count < old.turn_count {
            return Err(InvalidStateError::new(
                "turn_count",
                format!("non-decreasing (>= {})", old.turn_count),
                new.turn_count.to_string(),
            ));
        }

        if !old.status.can_transition_to(new.status) {
            return Err(InvalidStateError::new(
                "status",
                format!("a legal transition from `{}`", old.status),
                format!("`{}`", new.status),
            ));
        }

        if !new.handler_history.starts_with(&old.handler_history) {
            return Err(InvalidStateError::new(
                "handler_history",
                format!("an append-only extension of {:?}", old.handler_history),
                format!("{:?}", new.handler_history),
            ));
        }

        if !new.messages.starts_with(&old.messages) {
            return Err(InvalidStateError::new(
                "messages",
                format!("an append-only extension of {} messages", old.messages.len()),
                format!("{} messages with rewritten history", new.messages.len()),
            ));
        }

        Ok(())
    }

    /// A handler turn appends exactly `handler` to the history and advances
    /// `turn_count` by one. A turn taken with the budget already spent may
    /// hold `turn_count` only if it ends the conversation.
    pub fn validate_handler_step(
        &self,
        old: &ConversationState,
        new: &ConversationState,
        handler: &str,
    ) -> Result<(), InvalidStateError> {
        let appended = new.handler_history.get(old.handler_history.len()..).unwrap_or_default();
        if appended.len() != 1 || appended[0] != handler {
            return Err(InvalidStateError::new(
                "handler_history",
                format!("exactly `{handler}` appended"),
                format!("{appended:?} appended"),
            ));
        }

        let advanced = new.turn_count == old.turn_count.saturating_add(1);
        let final_turn = old.turn_count >= old.max_turns
            && new.turn_count == old.turn_count
            && new.status.is_terminal();
        if !advanced && !final_turn {
            return Err(InvalidStateError::new(
                "turn_count",
                format!("{} after one turn", old.turn_count.saturating_add(1)),
                new.turn_count.to_string(),
            ));
        }

        Ok(())
    }

    fn record(&self, event: &str, state: &ConversationState) {
        if let Some(history) = &self.history {
            history.record(event, state);
        }
    }
}

fn default_customer_metadata() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("channel".to_string(), Value::from("chat")),
        ("language".to_string(), Value::from("en")),
        ("tier".to_string(), Value::from("standard")),
    ])
}

fn in_range(value: f64, min: f64, max: f64) -> bool {
    (min..=max).contains(&value)
}

fn expected_shape(field: &str) -> &'static str {
    match field {
        "intent_confidence" | "response_confidence" => "a number in [0, 1]",
        "sentiment" => "a number in [-1, 1]",
        "turn_count" | "max_turns" => "a non-negative integer",
        "status" => "one of active|resolved|escalated",
        "primary_intent" => "a known intent name or null",
        "should_escalate" => "a boolean",
        "entities" | "customer_metadata" => "an object",
        "messages" => "a list of messages",
        "knowledge_results" => "a list of knowledge articles",
        "handler_history" | "tools_used" => "a list of strings",
        "conversation_id" | "customer_id" => "a string",
        _ => "a string or null",
    }
}
