//! Cross-cutting behaviour layered around a [`Handler`] by composition.
//!
//! Each wrapper is itself a `Handler` and forwards `name()` unchanged, so the
//! registry and the engine never know which layers are present.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use switchboard_core::config::MiddlewareConfig;
use switchboard_core::domain::conversation::{ConversationState, ConversationStatus};
use switchboard_core::domain::knowledge::KnowledgeArticle;
use tracing::{info, warn};

use crate::handlers::{Handler, HandlerError};

/// Builds `timing(cache(retry(handler)))` as the configuration asks.
/// Only terminal responders should be marked `cacheable`.
pub fn wrap(
    handler: Arc<dyn Handler>,
    config: &MiddlewareConfig,
    cacheable: bool,
) -> Arc<dyn Handler> {
    let mut wrapped = handler;

    if config.retry_max_attempts > 1 {
        wrapped = Arc::new(RetryingHandler::new(
            wrapped,
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        ));
    }
    if cacheable && config.cache_enabled {
        wrapped = Arc::new(CachingHandler::new(wrapped, config.cache_capacity));
    }
    if config.timing {
        wrapped = Arc::new(TimedHandler::new(wrapped));
    }

    wrapped
}

pub struct TimedHandler {
    inner: Arc<dyn Handler>,
}

impl TimedHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Handler for TimedHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, state: ConversationState) -> Result<ConversationState, HandlerError> {
        let conversation_id = state.conversation_id.clone();
        let started = Instant::now();
        let outcome = self.inner.process(state).await;

        info!(
            event_name = "middleware.handler_timed",
            conversation_id = %conversation_id,
            handler = self.inner.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = outcome.is_ok(),
            "handler finished"
        );
        outcome
    }
}

/// Retries retryable failures with exponential backoff. Each attempt starts
/// from the state the handler originally received.
pub struct RetryingHandler {
    inner: Arc<dyn Handler>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingHandler {
    pub fn new(inner: Arc<dyn Handler>, max_attempts: u32, base_delay: Duration) -> Self {
        Self { inner, max_attempts: max_attempts.max(1), base_delay }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

#[async_trait]
impl Handler for RetryingHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, state: ConversationState) -> Result<ConversationState, HandlerError> {
        let mut attempt = 1;
        loop {
            match self.inner.process(state.clone()).await {
                Ok(next) => return Ok(next),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        event_name = "middleware.retry_scheduled",
                        conversation_id = %state.conversation_id,
                        handler = self.inner.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying handler after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Clone, Debug)]
struct CachedAnswer {
    response_text: String,
    response_confidence: f64,
    knowledge_results: Vec<KnowledgeArticle>,
    tools_used: Vec<String>,
}

#[derive(Default)]
struct AnswerCache {
    entries: HashMap<String, CachedAnswer>,
    order: VecDeque<String>,
}

/// Replays resolved answers for a repeated (handler, intent, message) triple.
/// A hit still takes a turn and records the handler.
pub struct CachingHandler {
    inner: Arc<dyn Handler>,
    capacity: usize,
    cache: Mutex<AnswerCache>,
}

impl CachingHandler {
    pub fn new(inner: Arc<dyn Handler>, capacity: usize) -> Self {
        Self { inner, capacity: capacity.max(1), cache: Mutex::new(AnswerCache::default()) }
    }

    pub fn len(&self) -> usize {
        match self.cache.lock() {
            Ok(cache) => cache.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cache_key(&self, state: &ConversationState) -> Option<String> {
        let intent = state.primary_intent?;
        let message = state.latest_user_message()?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.inner.name().as_bytes());
        hasher.update(&[0]);
        hasher.update(intent.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(message.trim().to_lowercase().as_bytes());
        Some(hasher.finalize().to_hex().to_string())
    }

    fn lookup(&self, key: &str) -> Option<CachedAnswer> {
        let cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.entries.get(key).cloned()
    }

    fn store(&self, key: String, answer: CachedAnswer) {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cache.entries.insert(key.clone(), answer).is_none() {
            cache.order.push_back(key);
        }
        while cache.entries.len() > self.capacity {
            match cache.order.pop_front() {
                Some(oldest) => {
                    cache.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl Handler for CachingHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, mut state: ConversationState) -> Result<ConversationState, HandlerError> {
        let key = self.cache_key(&state);
        let prior_tools = state.tools_used.clone();

        if let Some(answer) = key.as_deref().and_then(|key| self.lookup(key)) {
            info!(
                event_name = "middleware.cache_hit",
                conversation_id = %state.conversation_id,
                handler = self.inner.name(),
                "serving cached answer"
            );
            let name = self.inner.name().to_string();
            state.begin_turn(&name);
            for tool in &answer.tools_used {
                state.record_tool(tool);
            }
            state.record_tool("answer_cache");
            state.knowledge_results = answer.knowledge_results;
            state.respond(answer.response_text, answer.response_confidence, &name);
            state.resolve();
            return Ok(state);
        }

        let next = self.inner.process(state).await?;
        if let (Some(key), ConversationStatus::Resolved, Some(text)) =
            (key, next.status, next.response_text.as_ref())
        {
            self.store(
                key,
                CachedAnswer {
                    response_text: text.clone(),
                    response_confidence: next.response_confidence,
                    knowledge_results: next.knowledge_results.clone(),
                    tools_used: next
                        .tools_used
                        .iter()
                        .filter(|tool| !prior_tools.contains(*tool))
                        .cloned()
                        .collect(),
                },
            );
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use switchboard_core::config::MiddlewareConfig;
    use switchboard_core::domain::conversation::{
        ConversationId, ConversationState, ConversationStatus, Message,
    };
    use switchboard_core::domain::intent::Intent;

    use super::{wrap, CachingHandler, RetryingHandler};
    use crate::handlers::{Handler, HandlerError};

    /// Fails with `error` for the first `failures` calls, then resolves.
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        error: HandlerError,
    }

    impl Flaky {
        fn new(failures: usize, error: HandlerError) -> Self {
            Self { calls: AtomicUsize::new(0), failures, error }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Handler for Flaky {
        fn name(&self) -> &str {
            "billing"
        }

        async fn process(
            &self,
            mut state: ConversationState,
        ) -> Result<ConversationState, HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            state.begin_turn("billing");
            state.record_tool("llm_completion");
            state.respond("answer", 0.8, "billing");
            state.resolve();
            Ok(state)
        }
    }

    fn classified_state(message: &str) -> ConversationState {
        let mut state = ConversationState::new(ConversationId::generate(), "cust");
        state.messages.push(Message::user(message));
        state.primary_intent = Some(Intent::BillingUpgrade);
        state.intent_confidence = 0.9;
        state
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let flaky = Arc::new(Flaky::new(2, HandlerError::Collaborator("busy".to_string())));
        let retrying = RetryingHandler::new(flaky.clone(), 3, Duration::from_millis(1));

        let state = retrying.process(classified_state("upgrade")).await.expect("third try wins");
        assert_eq!(flaky.calls(), 3);
        assert_eq!(state.handler_history, vec!["billing"]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let flaky = Arc::new(Flaky::new(5, HandlerError::Timeout(Duration::from_secs(1))));
        let retrying = RetryingHandler::new(flaky.clone(), 2, Duration::from_millis(1));

        let result = retrying.process(classified_state("upgrade")).await;
        assert_eq!(result, Err(HandlerError::Timeout(Duration::from_secs(1))));
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn non_retryable_failures_are_not_retried() {
        let flaky = Arc::new(Flaky::new(1, HandlerError::Execution("bug".to_string())));
        let retrying = RetryingHandler::new(flaky.clone(), 5, Duration::from_millis(1));

        assert!(retrying.process(classified_state("upgrade")).await.is_err());
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_inner_handler_but_takes_a_turn() {
        let flaky = Arc::new(Flaky::new(0, HandlerError::Execution("unused".to_string())));
        let caching = CachingHandler::new(flaky.clone(), 8);

        let first = caching.process(classified_state("Upgrade please")).await.expect("miss");
        let second = caching.process(classified_state("upgrade please")).await.expect("hit");

        assert_eq!(flaky.calls(), 1);
        assert_eq!(caching.len(), 1);
        assert_eq!(second.response_text, first.response_text);
        assert_eq!(second.status, ConversationStatus::Resolved);
        assert_eq!(second.turn_count, 1);
        assert_eq!(second.handler_history, vec!["billing"]);
        assert!(second.tools_used.iter().any(|tool| tool == "answer_cache"));
    }

    #[tokio::test]
    async fn cache_replays_only_the_handlers_own_tools() {
        let flaky = Arc::new(Flaky::new(0, HandlerError::Execution("unused".to_string())));
        let caching = CachingHandler::new(flaky.clone(), 8);

        let mut routed = classified_state("upgrade please");
        routed.record_tool("intent_classifier");
        caching.process(routed).await.expect("miss");

        let second = caching.process(classified_state("upgrade please")).await.expect("hit");
        assert_eq!(flaky.calls(), 1);
        assert_eq!(second.tools_used, vec!["llm_completion", "answer_cache"]);
    }

    #[tokio::test]
    async fn cache_evicts_oldest_entry_at_capacity() {
        let flaky = Arc::new(Flaky::new(0, HandlerError::Execution("unused".to_string())));
        let caching = CachingHandler::new(flaky.clone(), 1);

        caching.process(classified_state("first")).await.expect("miss");
        caching.process(classified_state("second")).await.expect("miss");
        caching.process(classified_state("first")).await.expect("miss again");

        assert_eq!(flaky.calls(), 3);
        assert_eq!(caching.len(), 1);
    }

    #[tokio::test]
    async fn unclassified_states_are_never_cached() {
        let flaky = Arc::new(Flaky::new(0, HandlerError::Execution("unused".to_string())));
        let caching = CachingHandler::new(flaky.clone(), 8);

        let mut state = classified_state("hello");
        state.primary_intent = None;
        caching.process(state).await.expect("ok");
        assert!(caching.is_empty());
    }

    #[tokio::test]
    async fn wrapped_handler_keeps_its_name() {
        let config = MiddlewareConfig {
            timing: true,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            cache_enabled: true,
            cache_capacity: 4,
        };
        let flaky = Arc::new(Flaky::new(1, HandlerError::Collaborator("blip".to_string())));
        let wrapped = wrap(flaky.clone(), &config, true);

        assert_eq!(wrapped.name(), "billing");
        let state = wrapped.process(classified_state("upgrade")).await.expect("retried");
        assert_eq!(state.status, ConversationStatus::Resolved);
        assert_eq!(flaky.calls(), 2);
    }
}
