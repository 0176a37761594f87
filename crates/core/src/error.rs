use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot at {path} is not a valid search state: {details}")]
    Corrupt { path: String, details: String },

    #[error("store not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plan parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("dimension at position {0} has an empty name")]
    EmptyName(usize),

    #[error("dimension declared twice: {0}")]
    DuplicateDimension(String),

    #[error("no dimension named {0}")]
    UnknownDimension(String),

    #[error("value {value} is not a candidate of dimension {dimension}")]
    UnknownValue { dimension: String, value: String },

    #[error("pin must look like name=value, got: {0}")]
    InvalidPin(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error("saved state does not belong to this search: {0}")]
    IncompatibleState(String),

    #[error("search controller already left the idle state")]
    AlreadyStarted,
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
