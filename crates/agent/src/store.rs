use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::domain::conversation::ConversationId;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
}

/// Keeps the sanitized snapshot of each finished conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn persist(&self, id: &ConversationId, snapshot: Value) -> Result<(), StoreError>;
    async fn load(&self, id: &ConversationId) -> Result<Option<Value>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    snapshots: RwLock<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `persist` fail, for exercising fire-and-forget paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn persist(&self, id: &ConversationId, snapshot: Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(id.0.clone(), snapshot);
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<Value>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&id.0).cloned())
    }
}
