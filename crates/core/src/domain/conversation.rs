use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::intent::Intent;
use crate::domain::knowledge::KnowledgeArticle;

pub const DEFAULT_MAX_TURNS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Handler that produced the message; `None` for customer messages.
    pub handler: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp: Utc::now(), handler: None }
    }

    pub fn assistant(content: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            handler: Some(handler.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Resolved,
    Escalated,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }

    /// Terminal states are absorbing; staying in the same state is not a transition.
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, _) | (Self::Resolved, Self::Resolved) | (Self::Escalated, Self::Escalated)
        )
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record threaded through every handler of a workflow run.
///
/// Handlers receive it by value and hand it back; the runtime validates it
/// between invocations, so no handler ever observes an unvalidated record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub customer_id: String,

    pub messages: Vec<Message>,

    pub current_handler: Option<String>,
    pub handler_history: Vec<String>,
    pub next_handler: Option<String>,

    pub primary_intent: Option<Intent>,
    pub intent_confidence: f64,
    pub sentiment: f64,
    pub entities: BTreeMap<String, Value>,

    pub customer_metadata: BTreeMap<String, Value>,
    pub knowledge_results: Vec<KnowledgeArticle>,

    pub response_text: Option<String>,
    pub response_confidence: f64,
    pub tools_used: Vec<String>,

    pub should_escalate: bool,
    pub escalation_reason: Option<String>,
    pub status: ConversationStatus,
    pub turn_count: u32,
    pub max_turns: u32,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, customer_id: impl Into<String>) -> Self {
        Self {
            conversation_id,
            customer_id: customer_id.into(),
            messages: Vec::new(),
            current_handler: None,
            handler_history: Vec::new(),
            next_handler: None,
            primary_intent: None,
            intent_confidence: 0.0,
            sentiment: 0.0,
            entities: BTreeMap::new(),
            customer_metadata: BTreeMap::new(),
            knowledge_results: Vec::new(),
            response_text: None,
            response_confidence: 0.0,
            tools_used: Vec::new(),
            should_escalate: false,
            escalation_reason: None,
            status: ConversationStatus::Active,
            turn_count: 0,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn turn_budget_exhausted(&self) -> bool {
        self.turn_count >= self.max_turns
    }

    /// Bookkeeping every handler performs on entry.
    pub fn begin_turn(&mut self, handler: &str) {
        self.current_handler = Some(handler.to_string());
        self.handler_history.push(handler.to_string());
        self.turn_count = self.turn_count.saturating_add(1);
    }

    /// Like [`Self::begin_turn`] but never pushes `turn_count` past `max_turns`.
    /// Used by the escalation handler, which must stay valid when the budget
    /// is what forced the escalation.
    pub fn begin_final_turn(&mut self, handler: &str) {
        self.current_handler = Some(handler.to_string());
        self.handler_history.push(handler.to_string());
        self.turn_count = self.turn_count.saturating_add(1).min(self.max_turns);
    }

    pub fn respond(&mut self, text: impl Into<String>, confidence: f64, handler: &str) {
        let text = text.into();
        self.messages.push(Message::assistant(text.clone(), handler));
        self.response_text = Some(text);
        self.response_confidence = confidence;
    }

    pub fn route_to(&mut self, handler: impl Into<String>) {
        self.next_handler = Some(handler.into());
    }

    pub fn resolve(&mut self) {
        self.status = ConversationStatus::Resolved;
        self.next_handler = None;
    }

    pub fn escalate(&mut self, reason: impl Into<String>) {
        self.should_escalate = true;
        self.escalation_reason = Some(reason.into());
        self.status = ConversationStatus::Escalated;
        self.next_handler = None;
    }

    pub fn record_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|used| used == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationId, ConversationState, ConversationStatus, Message, Role};

    #[test]
    fn terminal_statuses_are_absorbing() {
        use ConversationStatus::{Active, Escalated, Resolved};

        assert!(Active.can_transition_to(Active));
        assert!(Active.can_transition_to(Resolved));
        assert!(Active.can_transition_to(Escalated));
        assert!(!Resolved.can_transition_to(Active));
        assert!(!Escalated.can_transition_to(Active));
        assert!(!Escalated.can_transition_to(Resolved));
        assert!(!Resolved.can_transition_to(Escalated));
    }

    #[test]
    fn final_turn_saturates_at_budget() {
        let mut state = ConversationState::new(ConversationId("c-1".to_string()), "cust");
        state.max_turns = 2;
        state.begin_turn("router");
        state.begin_turn("billing");
        state.begin_final_turn("escalation");

        assert_eq!(state.turn_count, 2);
        assert_eq!(state.handler_history, vec!["router", "billing", "escalation"]);
        assert_eq!(state.current_handler.as_deref(), Some("escalation"));
    }

    #[test]
    fn respond_appends_assistant_message() {
        let mut state = ConversationState::new(ConversationId("c-2".to_string()), "cust");
        state.messages.push(Message::user("hello"));
        state.respond("Hi there!", 0.9, "router");

        assert_eq!(state.response_text.as_deref(), Some("Hi there!"));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].role, Role::Assistant);
        assert_eq!(state.messages[1].handler.as_deref(), Some("router"));
        assert_eq!(state.latest_user_message(), Some("hello"));
    }
}
