use std::collections::BTreeSet;

use async_trait::async_trait;
use switchboard_core::domain::knowledge::KnowledgeArticle;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum KnowledgeError {
    #[error("knowledge search unavailable: {0}")]
    Unavailable(String),
}

/// Ranked article lookup. An empty result is a valid answer.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeArticle>, KnowledgeError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeEntry {
    pub title: String,
    pub content: String,
    pub category: String,
}

impl KnowledgeEntry {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self { title: title.into(), content: content.into(), category: category.into() }
    }
}

/// Scores entries by the share of query terms found in title or content.
#[derive(Clone, Debug, Default)]
pub struct InMemoryKnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    min_relevance: f64,
}

impl InMemoryKnowledgeBase {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries, min_relevance: 0.0 }
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }

    /// A small support catalogue covering each specialist category.
    pub fn seeded() -> Self {
        Self::new(vec![
            KnowledgeEntry::new(
                "Upgrading your plan",
                "Open Settings > Billing and choose Change plan. Upgrades to premium or \
                 enterprise take effect immediately and are prorated on the next invoice.",
                "billing",
            ),
            KnowledgeEntry::new(
                "Requesting a refund",
                "Refunds for annual plans are available within 30 days of the charge. \
                 Submit the request from the Billing page with the invoice number.",
                "billing",
            ),
            KnowledgeEntry::new(
                "Downloading invoices",
                "Every invoice is available as a PDF under Settings > Billing > Invoices.",
                "billing",
            ),
            KnowledgeEntry::new(
                "Troubleshooting error codes",
                "Error codes starting with E5 indicate a server fault and are retried \
                 automatically. Codes starting with E4 mean the request needs changes.",
                "technical",
            ),
            KnowledgeEntry::new(
                "Improving dashboard performance",
                "Slow dashboards usually come from very wide date ranges. Narrow the range \
                 or enable cached reports.",
                "technical",
            ),
            KnowledgeEntry::new(
                "Exporting reports",
                "Use the Export button on any report to download CSV or PDF. Scheduled \
                 exports are available on premium plans.",
                "usage",
            ),
            KnowledgeEntry::new(
                "Setting up webhooks",
                "Create a webhook under Settings > Integrations, paste the endpoint URL and \
                 select the events to deliver.",
                "integration",
            ),
            KnowledgeEntry::new(
                "API authentication",
                "API requests authenticate with a bearer token generated under Settings > \
                 API keys. Tokens can be rotated at any time.",
                "integration",
            ),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn score(&self, entry: &KnowledgeEntry, terms: &BTreeSet<String>) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let haystack = tokenize(&format!("{} {}", entry.title, entry.content));
        let hits = terms.iter().filter(|term| haystack.contains(*term)).count();
        hits as f64 / terms.len() as f64
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeArticle>, KnowledgeError> {
        let terms = tokenize(query);
        let mut ranked = self
            .entries
            .iter()
            .filter(|entry| category.map_or(true, |category| entry.category == category))
            .map(|entry| (self.score(entry, &terms), entry))
            .filter(|(score, _)| *score > 0.0 && *score >= self.min_relevance)
            .collect::<Vec<_>>();

        ranked.sort_by(|left, right| {
            right.0.total_cmp(&left.0).then_with(|| left.1.title.cmp(&right.1.title))
        });

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(score, entry)| KnowledgeArticle::new(&entry.title, &entry.content, score))
            .collect())
    }
}

const STOP_WORDS: [&str; 16] = [
    "a", "an", "and", "are", "can", "do", "for", "how", "i", "is", "my", "of", "the", "to",
    "want", "with",
];

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_ascii_lowercase()
        .split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|token| token.len() > 1 && !STOP_WORDS.contains(token))
        .map(|token| token.trim_end_matches('s').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}
