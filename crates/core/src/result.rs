//! Projection of a terminal conversation into the structured workflow result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::domain::conversation::{ConversationState, ConversationStatus, Message};
use crate::domain::intent::Intent;
use crate::errors::InvalidStateError;

pub const REDACTION_MARKER: &str = "[REDACTED]";
const SENSITIVE_KEY_FRAGMENTS: [&str; 7] =
    ["email", "phone", "card", "payment", "iban", "account_number", "billing_address"];

/// Flat record returned to callers of the runtime.
///
/// Every field defaults so a record rebuilt from storage deserializes even
/// when partial; [`ResultHandler::validate`] decides whether it is usable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowResult {
    pub conversation_id: String,
    pub customer_id: String,
    pub response_text: String,
    pub handler_history: Vec<String>,
    /// Empty string when the conversation was never classified.
    pub primary_intent: Option<String>,
    pub intent_confidence: f64,
    pub sentiment: f64,
    pub entities: BTreeMap<String, Value>,
    pub knowledge_articles: Vec<String>,
    pub response_confidence: f64,
    pub tools_used: Vec<String>,
    pub should_escalate: bool,
    pub escalation_reason: String,
    pub status: String,
    pub turn_count: u32,
    pub cancelled: bool,
    pub sanitized_state: Value,
}

impl WorkflowResult {
    pub fn is_escalated(&self) -> bool {
        self.status == ConversationStatus::Escalated.as_str()
    }
}

/// Lightweight subset for log and metric call sites.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub primary_intent: Option<String>,
    pub intent_confidence: f64,
    pub sentiment: f64,
    pub handler_history: Vec<String>,
    pub article_count: usize,
    pub turn_count: u32,
    pub status: String,
    pub should_escalate: bool,
}

#[derive(Clone, Debug)]
pub struct ResultHandler {
    transcript_window: usize,
}

impl Default for ResultHandler {
    fn default() -> Self {
        Self { transcript_window: 3 }
    }
}

impl ResultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, state: &ConversationState) -> WorkflowResult {
        WorkflowResult {
            conversation_id: state.conversation_id.0.clone(),
            customer_id: state.customer_id.clone(),
            response_text: state.response_text.clone().unwrap_or_default(),
            handler_history: state.handler_history.clone(),
            primary_intent: Some(
                state.primary_intent.map(|intent| intent.as_str().to_string()).unwrap_or_default(),
            ),
            intent_confidence: state.intent_confidence,
            sentiment: state.sentiment,
            entities: redact_map(&state.entities),
            knowledge_articles: state
                .knowledge_results
                .iter()
                .map(|article| article.title.clone())
                .collect(),
            response_confidence: state.response_confidence,
            tools_used: state.tools_used.clone(),
            should_escalate: state.should_escalate,
            escalation_reason: state.escalation_reason.clone().unwrap_or_default(),
            status: state.status.as_str().to_string(),
            turn_count: state.turn_count,
            cancelled: false,
            sanitized_state: self.sanitize(state),
        }
    }

    pub fn extract_metadata(&self, state: &ConversationState) -> ResultMetadata {
        ResultMetadata {
            primary_intent: state.primary_intent.map(|intent| intent.as_str().to_string()),
            intent_confidence: state.intent_confidence,
            sentiment: state.sentiment,
            handler_history: state.handler_history.clone(),
            article_count: state.knowledge_results.len(),
            turn_count: state.turn_count,
            status: state.status.as_str().to_string(),
            should_escalate: state.should_escalate,
        }
    }

    /// Second validation gate, independent of the live state checks because
    /// results may be rebuilt from persisted data.
    pub fn validate(&self, result: &WorkflowResult) -> Result<(), InvalidStateError> {
        if result.response_text.trim().is_empty() {
            warn!(
                event_name = "result.missing_response_text",
                conversation_id = %result.conversation_id,
                "workflow result carries no response text"
            );
        }

        if result.handler_history.is_empty() {
            return Err(InvalidStateError::new("handler_history", "at least one handler", "[]"));
        }

        match result.primary_intent.as_deref() {
            None => {
                return Err(InvalidStateError::new(
                    "primary_intent",
                    "present (empty when unclassified)",
                    "missing",
                ));
            }
            Some(intent) if !intent.is_empty() && Intent::parse(intent).is_none() => {
                return Err(InvalidStateError::new("primary_intent", "a known intent name", intent));
            }
            Some(_) => {}
        }

        if ConversationStatus::parse(&result.status).is_none() {
            return Err(InvalidStateError::new(
                "status",
                "one of active|resolved|escalated",
                format!("{:?}", result.status),
            ));
        }

        for (field, value, min) in [
            ("intent_confidence", result.intent_confidence, 0.0),
            ("response_confidence", result.response_confidence, 0.0),
            ("sentiment", result.sentiment, -1.0),
        ] {
            if !(min..=1.0).contains(&value) {
                return Err(InvalidStateError::new(
                    field,
                    format!("a number in [{min}, 1]"),
                    value.to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Storage- and log-safe copy of `state`.
    ///
    /// Articles collapse to a count plus titles, the transcript to its last few
    /// messages plus a total, and sensitive metadata keys are redacted. Pure
    /// function of its input.
    pub fn sanitize(&self, state: &ConversationState) -> Value {
        let skip = state.messages.len().saturating_sub(self.transcript_window);
        let recent = state.messages.iter().skip(skip).map(message_summary).collect::<Vec<_>>();
        let titles =
            state.knowledge_results.iter().map(|article| article.title.clone()).collect::<Vec<_>>();

        json!({
            "conversation_id": state.conversation_id.0,
            "customer_id": state.customer_id,
            "status": state.status.as_str(),
            "current_handler": state.current_handler,
            "handler_history": state.handler_history,
            "next_handler": state.next_handler,
            "primary_intent": state.primary_intent.map(|intent| intent.as_str()),
            "intent_confidence": state.intent_confidence,
            "sentiment": state.sentiment,
            "entities": redact_map(&state.entities),
            "customer_metadata": redact_map(&state.customer_metadata),
            "knowledge_results": { "count": titles.len(), "titles": titles },
            "messages": { "total": state.messages.len(), "recent": recent },
            "response_text": state.response_text,
            "response_confidence": state.response_confidence,
            "tools_used": state.tools_used,
            "should_escalate": state.should_escalate,
            "escalation_reason": state.escalation_reason,
            "turn_count": state.turn_count,
            "max_turns": state.max_turns,
        })
    }
}

fn message_summary(message: &Message) -> Value {
    json!({
        "role": message.role.as_str(),
        "content": message.content,
        "timestamp": message.timestamp.to_rfc3339(),
        "handler": message.handler,
    })
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|fragment| key.contains(fragment))
}

fn redact_map(map: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    map.iter().map(|(key, value)| (key.clone(), redact_entry(key, value))).collect()
}

fn redact_entry(key: &str, value: &Value) -> Value {
    if is_sensitive(key) {
        return Value::from(REDACTION_MARKER);
    }
    match value {
        Value::Object(nested) => Value::Object(
            nested
                .iter()
                .map(|(key, value)| (key.clone(), redact_entry(key, value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| redact_entry("", item)).collect()),
        other => other.clone(),
    }
}
