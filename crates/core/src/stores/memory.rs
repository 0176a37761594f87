use crate::traits::ProgressStore;
use crate::{SearchState, StoreError};
use async_trait::async_trait;
use std::sync::RwLock;

/// Keeps the latest snapshot in memory.
///
/// `failing_after(n)` accepts `n` saves and rejects every later one, which is
/// how a store outage is simulated.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<SearchState>>,
    saves: RwLock<usize>,
    fail_after: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SearchState) -> Self {
        Self {
            snapshot: RwLock::new(Some(state)),
            ..Self::default()
        }
    }

    pub fn failing_after(saves: usize) -> Self {
        Self {
            fail_after: Some(saves),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Option<SearchState> {
        self.snapshot.read().ok().and_then(|guard| guard.as_ref().cloned())
    }

    pub fn save_count(&self) -> usize {
        self.saves.read().map(|guard| *guard).unwrap_or_default()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn save(&self, state: &SearchState) -> Result<(), StoreError> {
        let mut saves = self
            .saves
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock error: {e}")))?;
        if self.fail_after.is_some_and(|limit| *saves >= limit) {
            return Err(StoreError::Unavailable("memory store rejected the save".to_string()));
        }

        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock error: {e}")))?;
        *snapshot = Some(state.clone());
        *saves += 1;
        Ok(())
    }

    async fn load(&self) -> Result<Option<SearchState>, StoreError> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock error: {e}")))?;
        Ok(snapshot.as_ref().cloned())
    }
}
