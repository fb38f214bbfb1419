use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("completion service unavailable: {0}")]
    Transient(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion rejected: {0}")]
    Rejected(String),
}

/// Black-box text completion. Implementations own prompt transport and
/// model selection.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

/// Bounds every completion by a fixed deadline.
pub struct TimeoutLlmClient<C> {
    inner: C,
    timeout: Duration,
}

impl<C> TimeoutLlmClient<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<C> LlmClient for TimeoutLlmClient<C>
where
    C: LlmClient,
{
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        match tokio::time::timeout(
            self.timeout,
            self.inner.complete(system_prompt, user_prompt, max_tokens),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

/// Replays queued responses in order, then falls back to a fixed reply.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    responses: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<RecordedPrompt>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every prompt with `reply` once the queue is drained.
    pub fn always(reply: impl Into<String>) -> Self {
        Self { fallback: Some(reply.into()), ..Self::default() }
    }

    pub fn with_response(self, response: Result<String, LlmError>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(RecordedPrompt {
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                max_tokens,
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };

        match (queued, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(LlmError::Transient("no scripted response available".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{LlmClient, LlmError, ScriptedLlmClient, TimeoutLlmClient};

    #[tokio::test]
    async fn scripted_client_replays_queue_then_fallback() {
        let client = ScriptedLlmClient::always("fallback")
            .with_response(Ok("first".to_string()))
            .with_response(Err(LlmError::Rejected("policy".to_string())));

        assert_eq!(client.complete("sys", "one", 64).await, Ok("first".to_string()));
        assert_eq!(
            client.complete("sys", "two", 64).await,
            Err(LlmError::Rejected("policy".to_string()))
        );
        assert_eq!(client.complete("sys", "three", 64).await, Ok("fallback".to_string()));
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts()[1].user_prompt, "two");
    }

    #[tokio::test]
    async fn empty_script_reports_transient_failure() {
        let client = ScriptedLlmClient::new();
        let result = client.complete("sys", "hello", 16).await;
        assert!(matches!(result, Err(LlmError::Transient(_))));
    }

    #[tokio::test]
    async fn slow_completion_times_out() {
        let slow = ScriptedLlmClient::always("late").with_delay(Duration::from_millis(200));
        let client = TimeoutLlmClient::new(slow, Duration::from_millis(10));

        let result = client.complete("sys", "hello", 16).await;
        assert_eq!(result, Err(LlmError::Timeout(Duration::from_millis(10))));
    }
}
