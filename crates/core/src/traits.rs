use crate::{ProbeRequest, SearchResult, SearchState, StoreError};
use async_trait::async_trait;

/// Submits one leaf assignment to the lookup form.
///
/// A driver models a single form session, so probes never overlap. Faults
/// are reported through [`SearchResult::Transient`] and [`SearchResult::Fatal`]
/// rather than as errors.
#[async_trait]
pub trait FormDriver {
    async fn probe(&mut self, request: &ProbeRequest) -> SearchResult;
}

#[async_trait]
pub trait ProgressStore {
    /// Persists a snapshot; a partially written snapshot must never be loadable.
    async fn save(&self, state: &SearchState) -> Result<(), StoreError>;

    /// Returns `None` when no snapshot has been saved yet.
    async fn load(&self) -> Result<Option<SearchState>, StoreError>;
}

#[async_trait]
impl<T> ProgressStore for std::sync::Arc<T>
where
    T: ProgressStore + Send + Sync + ?Sized,
{
    async fn save(&self, state: &SearchState) -> Result<(), StoreError> {
        (**self).save(state).await
    }

    async fn load(&self) -> Result<Option<SearchState>, StoreError> {
        (**self).load().await
    }
}
