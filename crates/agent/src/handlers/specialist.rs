use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::domain::knowledge::KnowledgeArticle;
use switchboard_core::routing::table::{BILLING, INTEGRATION, TECHNICAL, USAGE};
use tracing::warn;

use super::{Handler, HandlerError, FALLBACK_RESPONSE};
use crate::knowledge::KnowledgeBase;
use crate::llm::{LlmClient, LlmError};

const BILLING_PROMPT: &str = "You are a billing support specialist. Explain plan changes, \
refunds and invoices precisely and never promise credits that policy does not allow.";
const TECHNICAL_PROMPT: &str = "You are a technical support engineer. Diagnose the reported \
problem step by step and mention any error code the customer gave.";
const USAGE_PROMPT: &str = "You are a product expert. Explain how to accomplish the task in \
short numbered steps.";
const INTEGRATION_PROMPT: &str = "You are an integrations engineer. Explain API and webhook \
setup clearly, including authentication requirements.";

/// A terminal responder for one support area: searches the knowledge base,
/// asks the completion service for an answer grounded in what it found, and
/// resolves the conversation.
pub struct SpecialistHandler {
    name: &'static str,
    system_prompt: &'static str,
    llm: Arc<dyn LlmClient>,
    knowledge: Arc<dyn KnowledgeBase>,
    search_limit: usize,
    max_tokens: u32,
}

impl SpecialistHandler {
    pub fn new(
        name: &'static str,
        system_prompt: &'static str,
        llm: Arc<dyn LlmClient>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Self {
        Self { name, system_prompt, llm, knowledge, search_limit: 3, max_tokens: 512 }
    }

    pub fn billing(llm: Arc<dyn LlmClient>, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self::new(BILLING, BILLING_PROMPT, llm, knowledge)
    }

    pub fn technical(llm: Arc<dyn LlmClient>, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self::new(TECHNICAL, TECHNICAL_PROMPT, llm, knowledge)
    }

    pub fn usage(llm: Arc<dyn LlmClient>, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self::new(USAGE, USAGE_PROMPT, llm, knowledge)
    }

    pub fn integration(llm: Arc<dyn LlmClient>, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self::new(INTEGRATION, INTEGRATION_PROMPT, llm, knowledge)
    }

    pub fn with_search_limit(mut self, search_limit: usize) -> Self {
        self.search_limit = search_limit;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn lookup(&self, state: &ConversationState, query: &str) -> Vec<KnowledgeArticle> {
        match self.knowledge.search(query, Some(self.name), self.search_limit).await {
            Ok(articles) => articles,
            Err(error) => {
                warn!(
                    event_name = "specialist.knowledge_unavailable",
                    conversation_id = %state.conversation_id,
                    handler = self.name,
                    error = %error,
                    "continuing without knowledge articles"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Handler for SpecialistHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        state.begin_turn(self.name);

        let query = state.latest_user_message().unwrap_or_default().to_string();
        let articles = self.lookup(&state, &query).await;
        state.record_tool("knowledge_search");

        let prompt = build_prompt(&query, &articles, &state);
        let answer = match self.llm.complete(self.system_prompt, &prompt, self.max_tokens).await {
            Ok(answer) => answer,
            Err(LlmError::Rejected(message)) => {
                state.knowledge_results = articles;
                state.respond(FALLBACK_RESPONSE, 0.0, self.name);
                state.escalate(format!("{} answer unavailable: {message}", self.name));
                return Ok(state);
            }
            Err(error) => return Err(error.into()),
        };
        state.record_tool("llm_completion");

        let answer = answer.trim();
        if answer.is_empty() {
            state.knowledge_results = articles;
            state.respond(FALLBACK_RESPONSE, 0.0, self.name);
            state.escalate(format!("{} produced an empty answer", self.name));
            return Ok(state);
        }

        let confidence = response_confidence(&articles);
        state.knowledge_results = articles;
        state.respond(answer, confidence, self.name);
        state.resolve();
        Ok(state)
    }
}

fn build_prompt(query: &str, articles: &[KnowledgeArticle], state: &ConversationState) -> String {
    let mut prompt = format!("Customer message:\n{query}\n");

    if !state.entities.is_empty() {
        let details = state
            .entities
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!("\nDetails mentioned:\n{details}\n"));
    }

    if articles.is_empty() {
        prompt.push_str("\nNo help-center articles matched; answer from general knowledge.\n");
    } else {
        prompt.push_str("\nRelevant help-center articles:\n");
        for article in articles {
            prompt.push_str(&format!("## {}\n{}\n", article.title, article.content));
        }
    }

    prompt
}

/// Grounded answers earn more confidence than ungrounded ones.
fn response_confidence(articles: &[KnowledgeArticle]) -> f64 {
    let best = articles.iter().map(|article| article.relevance_score).fold(0.0_f64, f64::max);
    (0.6 + 0.35 * best).clamp(0.0, 1.0)
}
