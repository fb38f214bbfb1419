use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use switchboard_core::domain::intent::Intent;
use thiserror::Error;

use crate::llm::{LlmClient, LlmError};

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub sentiment: f64,
    pub entities: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ClassificationError {
    #[error("classification service failed: {0}")]
    Service(#[from] LlmError),
    #[error("malformed classification: {0}")]
    Malformed(String),
    #[error("classification field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<Classification, ClassificationError>;
}

const CLASSIFIER_SYSTEM_PROMPT: &str = "You classify customer support messages. Reply with a \
single JSON object with the keys `intent`, `confidence` (0 to 1), `sentiment` (-1 to 1) and \
`entities` (an object). `intent` must be one of: billing_upgrade, billing_downgrade, \
billing_refund, billing_invoice, technical_bug, technical_error, technical_performance, \
usage_how_to, usage_feature_question, integration_setup, integration_api, \
account_management, greeting, general_inquiry.";

/// Asks the completion service for a JSON verdict.
pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    intent: String,
    confidence: f64,
    #[serde(default)]
    sentiment: f64,
    #[serde(default)]
    entities: Map<String, Value>,
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, message: &str) -> Result<Classification, ClassificationError> {
        let reply = self.llm.complete(CLASSIFIER_SYSTEM_PROMPT, message, self.max_tokens).await?;
        parse_verdict(&reply)
    }
}

/// Parses the first JSON object embedded in `reply`.
pub fn parse_verdict(reply: &str) -> Result<Classification, ClassificationError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Err(ClassificationError::Malformed("no JSON object in reply".to_string())),
    };

    let raw: RawVerdict = serde_json::from_str(body)
        .map_err(|error| ClassificationError::Malformed(error.to_string()))?;

    let intent = Intent::parse(&raw.intent)
        .ok_or_else(|| ClassificationError::Malformed(format!("unknown intent `{}`", raw.intent)))?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ClassificationError::OutOfRange { field: "confidence", value: raw.confidence });
    }
    if !(-1.0..=1.0).contains(&raw.sentiment) {
        return Err(ClassificationError::OutOfRange { field: "sentiment", value: raw.sentiment });
    }

    Ok(Classification {
        intent,
        confidence: raw.confidence,
        sentiment: raw.sentiment,
        entities: raw.entities.into_iter().collect(),
    })
}

/// Deterministic classifier used offline and in tests.
#[derive(Clone, Debug, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> Classification {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);

        let mut best: Option<(Intent, usize)> = None;
        let mut runner_up = 0usize;
        for (intent, keywords) in INTENT_KEYWORDS {
            let hits = keywords
                .iter()
                .filter(|keyword| matches_keyword(&normalized_text, &tokens, keyword))
                .count();
            match best {
                Some((_, best_hits)) if hits <= best_hits => runner_up = runner_up.max(hits),
                _ => {
                    runner_up = best.map_or(0, |(_, best_hits)| best_hits);
                    best = Some((*intent, hits));
                }
            }
        }

        let (intent, confidence) = match best {
            Some((intent, hits)) if hits > 0 => (intent, confidence_score(hits, runner_up)),
            _ => (Intent::GeneralInquiry, 0.6),
        };

        Classification {
            intent,
            confidence,
            sentiment: sentiment_score(&tokens),
            entities: extract_entities(text, &tokens),
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, message: &str) -> Result<Classification, ClassificationError> {
        Ok(self.classify_text(message))
    }
}

const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::BillingUpgrade, &["upgrade", "premium", "enterprise", "higher tier", "more seats"]),
    (Intent::BillingDowngrade, &["downgrade", "cheaper", "lower tier", "fewer seats"]),
    (Intent::BillingRefund, &["refund", "money back", "charged twice", "overcharged"]),
    (Intent::BillingInvoice, &["invoice", "receipt", "billing history", "vat"]),
    (Intent::TechnicalBug, &["bug", "broken", "doesn't work", "not working", "crash"]),
    (Intent::TechnicalError, &["error", "exception", "failed", "failure", "500"]),
    (Intent::TechnicalPerformance, &["slow", "latency", "timeout", "performance", "lag"]),
    (Intent::UsageHowTo, &["how do i", "how to", "how can i", "where do i", "tutorial"]),
    (Intent::UsageFeatureQuestion, &["feature", "does it support", "is there a way", "export"]),
    (Intent::IntegrationSetup, &["integrate", "integration", "webhook", "connect", "setup"]),
    (Intent::IntegrationApi, &["api", "endpoint", "sdk", "token", "rate limit"]),
    (Intent::AccountManagement, &["password", "account", "login", "username", "delete my"]),
    (Intent::Greeting, &["hello", "hi", "hey", "good morning", "good afternoon"]),
];

const NEGATIVE_WORDS: [&str; 12] = [
    "angry", "awful", "frustrated", "furious", "hate", "horrible", "ridiculous", "terrible",
    "unacceptable", "useless", "worst", "disappointed",
];

const POSITIVE_WORDS: [&str; 9] =
    ["appreciate", "awesome", "excellent", "great", "happy", "love", "please", "thank", "thanks"];

const PLAN_NAMES: [&str; 5] = ["starter", "basic", "pro", "premium", "enterprise"];

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| {
        !(character.is_ascii_alphanumeric() || matches!(character, '\'' | '@' | '.' | '$' | '_'))
    })
    .map(|token| token.trim_matches('.').to_string())
    .filter(|token| !token.is_empty())
    .collect()
}

fn matches_keyword(normalized_text: &str, tokens: &[String], keyword: &str) -> bool {
    if keyword.contains(' ') || keyword.contains('\'') {
        normalized_text.contains(keyword)
    } else {
        tokens.iter().any(|token| token == keyword)
    }
}

fn confidence_score(hits: usize, runner_up: usize) -> f64 {
    let base = 0.6 + 0.15 * hits as f64;
    let contested = if runner_up >= hits { 0.2 } else { 0.0 };
    (base - contested).clamp(0.0, 0.95)
}

fn sentiment_score(tokens: &[String]) -> f64 {
    let negative = tokens.iter().filter(|token| NEGATIVE_WORDS.contains(&token.as_str())).count();
    let positive = tokens.iter().filter(|token| POSITIVE_WORDS.contains(&token.as_str())).count();
    let raw = (positive as f64 - negative as f64) * 0.35;
    raw.clamp(-1.0, 1.0)
}

fn extract_entities(text: &str, tokens: &[String]) -> BTreeMap<String, Value> {
    let mut entities = BTreeMap::new();

    if let Some(plan) = tokens.iter().find(|token| PLAN_NAMES.contains(&token.as_str())) {
        entities.insert("plan".to_string(), Value::String(plan.clone()));
    }

    let amount = tokens
        .iter()
        .filter_map(|token| token.strip_prefix('$'))
        .find_map(|raw| raw.trim_end_matches(',').parse::<f64>().ok());
    if let Some(amount) = amount {
        entities.insert("amount".to_string(), Value::from(amount));
    }

    let email = text
        .split_whitespace()
        .map(|word| word.trim_matches(|character: char| matches!(character, ',' | ';' | '<' | '>')))
        .map(|word| word.trim_end_matches('.'))
        .find(|word| looks_like_email(word));
    if let Some(email) = email {
        entities.insert("email".to_string(), Value::String(email.to_string()));
    }

    if let Some(code) = extract_error_code(tokens) {
        entities.insert("error_code".to_string(), Value::String(code));
    }

    entities
}

fn looks_like_email(word: &str) -> bool {
    match word.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

fn extract_error_code(tokens: &[String]) -> Option<String> {
    let coded = tokens.iter().find(|token| {
        token.len() >= 3
            && token.starts_with('e')
            && token[1..].chars().all(|character| character.is_ascii_digit())
    });
    if let Some(code) = coded {
        return Some(code.to_ascii_uppercase());
    }

    tokens.windows(2).find_map(|window| match window {
        [context, code]
            if matches!(context.as_str(), "error" | "status" | "code")
                && code.len() == 3
                && code.chars().all(|character| character.is_ascii_digit()) =>
        {
            Some(code.clone())
        }
        _ => None,
    })
}
