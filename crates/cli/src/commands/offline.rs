//! Collaborators for running workflows without network access.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchboard_agent::classifier::KeywordIntentClassifier;
use switchboard_agent::handlers::Collaborators;
use switchboard_agent::knowledge::InMemoryKnowledgeBase;
use switchboard_agent::llm::{LlmClient, LlmError, TimeoutLlmClient};
use switchboard_core::config::SwitchboardConfig;

const NO_ARTICLE_REPLY: &str = "Thanks for reaching out. I've noted the details of your request \
and our team will make sure it gets resolved.";

/// Answers from the first help-center article embedded in the prompt.
#[derive(Clone, Debug, Default)]
pub struct ArticleDigestLlm;

#[async_trait]
impl LlmClient for ArticleDigestLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let mut sections = user_prompt.split("\n## ").skip(1);
        let reply = match sections.next() {
            Some(section) => {
                let (title, body) = section.split_once('\n').unwrap_or((section, ""));
                format!("{}: {}", title.trim(), body.trim())
            }
            None => NO_ARTICLE_REPLY.to_string(),
        };

        // Roughly four characters per token.
        let budget = usize::try_from(max_tokens).unwrap_or(usize::MAX).saturating_mul(4);
        Ok(reply.chars().take(budget).collect())
    }
}

pub fn collaborators(config: &SwitchboardConfig) -> Collaborators {
    let llm = TimeoutLlmClient::new(ArticleDigestLlm, Duration::from_secs(config.llm.timeout_secs));
    let knowledge =
        InMemoryKnowledgeBase::seeded().with_min_relevance(config.knowledge.min_relevance);

    Collaborators {
        llm: Arc::new(llm),
        knowledge: Arc::new(knowledge),
        classifier: Arc::new(KeywordIntentClassifier::new()),
    }
}
