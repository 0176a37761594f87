use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub const STATE_FORMAT_VERSION: u32 = 1;

/// One selectable facet of the lookup form, with its candidate values in form order.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterDimension {
    pub name: String,
    /// Form parameter key; falls back to `name` when absent.
    pub field: Option<String>,
    pub values: Vec<String>,
}

impl FilterDimension {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            field: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }
}

/// Value indices for a prefix of the plan's dimensions; index `i` belongs to dimension `i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct Assignment(Vec<usize>);

impl Assignment {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The assignment restricted to dimensions `0..=depth`.
    pub fn prefix(&self, depth: usize) -> Assignment {
        let end = (depth + 1).min(self.0.len());
        Assignment(self.0[..end].to_vec())
    }

    pub fn starts_with(&self, prefix: &Assignment) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<Vec<usize>> for Assignment {
    fn from(value: Vec<usize>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "({joined})")
    }
}

/// A resolved `field = value` pair, kept next to every record so results stay traceable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterParam {
    pub field: String,
    pub value: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CaseRecord {
    pub case_id: String,
    pub filed_on: Option<String>,
    pub office: Option<String>,
    pub case_class: Option<String>,
    pub parties: Option<String>,
}

impl CaseRecord {
    pub fn with_id(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            ..Self::default()
        }
    }
}

/// Outcome of probing one leaf assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    Matches(Vec<CaseRecord>),
    Empty,
    Transient(String),
    /// `depth` names the dimension whose value the form rejected; `None` blames the leaf.
    Fatal { cause: String, depth: Option<usize> },
}

impl SearchResult {
    pub fn fatal(cause: impl Into<String>) -> Self {
        SearchResult::Fatal {
            cause: cause.into(),
            depth: None,
        }
    }

    pub fn fatal_at(cause: impl Into<String>, depth: usize) -> Self {
        SearchResult::Fatal {
            cause: cause.into(),
            depth: Some(depth),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub search_name: String,
    pub assignment: Assignment,
    pub params: Vec<FilterParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub case: CaseRecord,
    pub assignment: Assignment,
    pub params: Vec<FilterParam>,
    pub run_id: Uuid,
    pub found_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeFailure {
    pub assignment: Assignment,
    pub params: Vec<FilterParam>,
    pub cause: String,
    pub attempts: u32,
    pub pruned_depth: usize,
    pub run_id: Uuid,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Everything needed to resume a search, plus everything it has found so far.
///
/// Every unpruned leaf up to and including `cursor` in enumeration order has
/// been probed; `pruned` lists the prefixes whose remaining leaves are skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchState {
    pub format_version: u32,
    pub search_name: String,
    pub plan_fingerprint: String,
    pub status: RunStatus,
    pub cursor: Option<Assignment>,
    pub completed: u64,
    pub pruned: Vec<Assignment>,
    pub total_results: usize,
    pub results: Vec<ResultRecord>,
    pub failures: Vec<ProbeFailure>,
    pub run_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchState {
    pub fn fresh(search_name: impl Into<String>, plan_fingerprint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            format_version: STATE_FORMAT_VERSION,
            search_name: search_name.into(),
            plan_fingerprint: plan_fingerprint.into(),
            status: RunStatus::Running,
            cursor: None,
            completed: 0,
            pruned: Vec::new(),
            total_results: 0,
            results: Vec::new(),
            failures: Vec::new(),
            run_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_matches(
        &mut self,
        assignment: &Assignment,
        params: &[FilterParam],
        cases: Vec<CaseRecord>,
        run_id: Uuid,
    ) {
        let found_at = Utc::now();
        self.results.extend(cases.into_iter().map(|case| ResultRecord {
            case,
            assignment: assignment.clone(),
            params: params.to_vec(),
            run_id,
            found_at,
        }));
        self.total_results = self.results.len();
    }

    pub fn record_failure(&mut self, failure: ProbeFailure) {
        self.failures.push(failure);
    }

    pub fn record_pruned(&mut self, prefix: Assignment) {
        if !self.pruned.contains(&prefix) {
            self.pruned.push(prefix);
        }
    }

    pub fn mark_completed(&mut self, assignment: Assignment) {
        self.cursor = Some(assignment);
        self.completed += 1;
        self.updated_at = Utc::now();
    }

    /// Marks what has been persisted so an unsaved step can be undone.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cursor: self.cursor.clone(),
            completed: self.completed,
            pruned: self.pruned.len(),
            results: self.results.len(),
            failures: self.failures.len(),
        }
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.cursor = checkpoint.cursor;
        self.completed = checkpoint.completed;
        self.pruned.truncate(checkpoint.pruned);
        self.results.truncate(checkpoint.results);
        self.failures.truncate(checkpoint.failures);
        self.total_results = self.results.len();
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    cursor: Option<Assignment>,
    completed: u64,
    pruned: usize,
    results: usize,
    failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total probe attempts per assignment, first try included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failed try (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_backoff.as_nanos() as f64);
        Duration::from_nanos(capped.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
    pub pause_between_probes: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            pause_between_probes: Duration::ZERO,
        }
    }
}
