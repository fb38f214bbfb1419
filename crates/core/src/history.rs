use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub event: String,
    pub turn: u32,
    pub state: ConversationState,
    pub recorded_at: DateTime<Utc>,
}

/// Opt-in collector of every accepted state, owned by whoever drives the runtime.
///
/// Cloning shares the underlying buffer, so a test can keep one handle and hand
/// another to the state manager.
#[derive(Clone, Debug, Default)]
pub struct StateHistory {
    snapshots: Arc<Mutex<Vec<StateSnapshot>>>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>, state: &ConversationState) {
        let snapshot = StateSnapshot {
            event: event.into(),
            turn: state.turn_count,
            state: state.clone(),
            recorded_at: Utc::now(),
        };
        match self.snapshots.lock() {
            Ok(mut snapshots) => snapshots.push(snapshot),
            Err(poisoned) => poisoned.into_inner().push(snapshot),
        }
    }

    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        match self.snapshots.lock() {
            Ok(snapshots) => snapshots.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.snapshots().into_iter().map(|snapshot| snapshot.event).collect()
    }

    pub fn len(&self) -> usize {
        match self.snapshots.lock() {
            Ok(snapshots) => snapshots.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.snapshots.lock() {
            Ok(mut snapshots) => snapshots.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
