pub mod drivers;
pub mod enumerator;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod plan;
pub mod stores;
pub mod traits;

pub use drivers::HttpFormDriver;
pub use enumerator::Enumerator;
pub use error::{PlanError, SearchError, StoreError};
pub use models::{
    Assignment, CaseRecord, Checkpoint, FilterDimension, FilterParam, ProbeFailure, ProbeRequest,
    ResultRecord, RetryPolicy, RunStatus, SearchConfig, SearchResult, SearchState,
    STATE_FORMAT_VERSION,
};
pub use orchestrator::{resume_point, CancelFlag, ControllerState, RunSummary, SearchController};
pub use plan::SearchPlan;
pub use stores::{JsonFileStore, MemoryStore};
pub use traits::{FormDriver, ProgressStore};
