use serde::{Deserialize, Serialize};

/// A ranked knowledge-base hit attached to a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArticle {
    pub title: String,
    pub content: String,
    pub relevance_score: f64,
}

impl KnowledgeArticle {
    pub fn new(title: impl Into<String>, content: impl Into<String>, relevance_score: f64) -> Self {
        Self { title: title.into(), content: content.into(), relevance_score }
    }
}
