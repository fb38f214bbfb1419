use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationState;

pub const TURN_BUDGET_EXCEEDED: &str = "turn budget exceeded";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    LowConfidence,
    TurnBudgetExceeded,
    NegativeSentiment,
    ExplicitRequest,
    GeneralInquiryPolicy,
}

impl EscalationTrigger {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::TurnBudgetExceeded => "turn_budget_exceeded",
            Self::NegativeSentiment => "negative_sentiment",
            Self::ExplicitRequest => "explicit_request",
            Self::GeneralInquiryPolicy => "general_inquiry_policy",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EscalationDecision {
    Continue,
    Escalate { trigger: EscalationTrigger, reason: String },
}

impl EscalationDecision {
    pub fn should_escalate(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub confidence_threshold: f64,
    pub negative_sentiment_threshold: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self { confidence_threshold: 0.5, negative_sentiment_threshold: -0.7 }
    }
}

impl EscalationPolicy {
    /// Escalate when any trigger fires. Confidence is only judged once an
    /// intent has been classified.
    pub fn evaluate(&self, state: &ConversationState) -> EscalationDecision {
        if state.primary_intent.is_some() && state.intent_confidence < self.confidence_threshold {
            return EscalationDecision::Escalate {
                trigger: EscalationTrigger::LowConfidence,
                reason: format!(
                    "intent confidence {:.2} is below the {:.2} threshold",
                    state.intent_confidence, self.confidence_threshold
                ),
            };
        }

        if state.turn_budget_exhausted() {
            return EscalationDecision::Escalate {
                trigger: EscalationTrigger::TurnBudgetExceeded,
                reason: TURN_BUDGET_EXCEEDED.to_string(),
            };
        }

        if state.sentiment < self.negative_sentiment_threshold {
            return EscalationDecision::Escalate {
                trigger: EscalationTrigger::NegativeSentiment,
                reason: format!(
                    "customer sentiment {:.2} is below the {:.2} threshold",
                    state.sentiment, self.negative_sentiment_threshold
                ),
            };
        }

        if state.should_escalate {
            return EscalationDecision::Escalate {
                trigger: EscalationTrigger::ExplicitRequest,
                reason: state
                    .escalation_reason
                    .clone()
                    .unwrap_or_else(|| "escalation requested by handler".to_string()),
            };
        }

        EscalationDecision::Continue
    }
}
