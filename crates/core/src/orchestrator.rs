use crate::enumerator::Enumerator;
use crate::plan::SearchPlan;
use crate::traits::{FormDriver, ProgressStore};
use crate::{
    Assignment, ProbeFailure, ProbeRequest, RunStatus, SearchConfig, SearchError, SearchResult,
    SearchState,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooperative interrupt shared between the signal handler and the controller.
///
/// A driver call in flight is never interrupted; waits between calls are.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelInner>);

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let notified = self.0.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Sleeps for `delay` unless cancelled first; returns `false` on cancellation.
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancelFlag) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

/// Depth to prune at for a fatal result, or `None` when only the leaf itself is lost.
fn prune_depth(assignment: &Assignment, hint: Option<usize>) -> Option<usize> {
    let leaf_depth = assignment.depth().checked_sub(1)?;
    hint.filter(|depth| *depth < leaf_depth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl From<ControllerState> for RunStatus {
    fn from(value: ControllerState) -> Self {
        match value {
            ControllerState::Idle | ControllerState::Running => RunStatus::Running,
            ControllerState::Completed => RunStatus::Completed,
            ControllerState::Cancelled => RunStatus::Cancelled,
            ControllerState::Failed => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub status: ControllerState,
    /// Leaves completed across every session of this search.
    pub completed: u64,
    pub total: u64,
    pub records: usize,
    pub failures: usize,
    /// Driver calls made by this session, retries included.
    pub probes: u64,
}

enum Settled {
    Outcome { result: SearchResult, attempts: u32 },
    Interrupted,
}

/// Walks every leaf of the plan through the form driver, one probe at a time.
///
/// State machine: `Idle → Running → {Completed, Cancelled, Failed}`. The
/// search state is persisted after every probe, so an interrupted run resumes
/// right after the last completed leaf.
pub struct SearchController<D, S>
where
    D: FormDriver,
    S: ProgressStore,
{
    driver: D,
    store: S,
    plan: SearchPlan,
    search_name: String,
    config: SearchConfig,
    state: ControllerState,
    search: Option<SearchState>,
    total: u64,
    probes: u64,
    run_id: Uuid,
}

impl<D, S> SearchController<D, S>
where
    D: FormDriver + Send,
    S: ProgressStore + Send + Sync,
{
    pub fn new(
        driver: D,
        store: S,
        plan: SearchPlan,
        search_name: impl Into<String>,
        config: SearchConfig,
    ) -> Self {
        let total = Enumerator::for_plan(&plan).total();
        Self {
            driver,
            store,
            plan,
            search_name: search_name.into(),
            config,
            state: ControllerState::Idle,
            search: None,
            total,
            probes: 0,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn search_state(&self) -> Option<&SearchState> {
        self.search.as_ref()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.state,
            completed: self.search.as_ref().map_or(0, |search| search.completed),
            total: self.total,
            records: self.search.as_ref().map_or(0, |search| search.results.len()),
            failures: self.search.as_ref().map_or(0, |search| search.failures.len()),
            probes: self.probes,
        }
    }

    pub async fn run(&mut self, cancel: &CancelFlag) -> Result<RunSummary, SearchError> {
        if self.state != ControllerState::Idle {
            return Err(SearchError::AlreadyStarted);
        }
        self.state = ControllerState::Running;

        let (mut search, mut enumerator) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(error) => {
                self.state = ControllerState::Failed;
                return Err(error);
            }
        };

        let mut outcome = self.drive(&mut search, &mut enumerator, cancel).await;
        let final_state = match &outcome {
            Ok(state) => *state,
            Err(_) => ControllerState::Failed,
        };
        search.set_status(final_state.into());

        if outcome.is_ok() {
            if let Err(error) = self.store.save(&search).await {
                search.set_status(RunStatus::Failed);
                outcome = Err(error.into());
            }
        }

        self.state = match &outcome {
            Ok(_) => final_state,
            Err(_) => ControllerState::Failed,
        };
        self.search = Some(search);

        let summary = self.summary();
        info!(
            status = ?summary.status,
            completed = summary.completed,
            total = summary.total,
            records = summary.records,
            failures = summary.failures,
            "search stopped"
        );
        outcome.map(|_| summary)
    }

    async fn prepare(&mut self) -> Result<(SearchState, Enumerator), SearchError> {
        let fingerprint = self.plan.fingerprint();
        let mut search = match self.store.load().await? {
            Some(saved) => {
                if saved.search_name != self.search_name {
                    return Err(SearchError::IncompatibleState(format!(
                        "snapshot searches for {:?}, not {:?}",
                        saved.search_name, self.search_name
                    )));
                }
                if saved.plan_fingerprint != fingerprint {
                    return Err(SearchError::IncompatibleState(
                        "snapshot was taken with different filter dimensions".to_string(),
                    ));
                }
                info!(
                    completed = saved.completed,
                    records = saved.results.len(),
                    cursor = ?saved.cursor,
                    "resuming saved search"
                );
                saved
            }
            None => {
                info!(total = self.total, "starting fresh search");
                SearchState::fresh(self.search_name.clone(), fingerprint)
            }
        };

        let mut enumerator = Enumerator::for_plan(&self.plan).with_pruned(search.pruned.clone());
        if let Some(cursor) = &search.cursor {
            enumerator.resume_from(cursor)?;
        }

        search.run_ids.push(self.run_id);
        search.set_status(RunStatus::Running);
        self.store.save(&search).await?;
        Ok((search, enumerator))
    }

    async fn drive(
        &mut self,
        search: &mut SearchState,
        enumerator: &mut Enumerator,
        cancel: &CancelFlag,
    ) -> Result<ControllerState, SearchError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(ControllerState::Cancelled);
            }

            let Some(assignment) = enumerator.next_assignment() else {
                return Ok(ControllerState::Completed);
            };

            let request = ProbeRequest {
                search_name: self.search_name.clone(),
                params: self.plan.params(&assignment),
                assignment: assignment.clone(),
            };

            let checkpoint = search.checkpoint();
            match self.probe_with_retry(&request, cancel).await {
                Settled::Interrupted => return Ok(ControllerState::Cancelled),
                Settled::Outcome { result, attempts } => {
                    self.apply(search, enumerator, &request, result, attempts);
                }
            }

            search.mark_completed(assignment.clone());
            if let Err(error) = self.store.save(search).await {
                search.rollback(checkpoint);
                return Err(error.into());
            }
            info!(
                completed = search.completed,
                total = self.total,
                records = search.results.len(),
                assignment = %self.plan.describe(&assignment),
                "assignment done"
            );

            if !self.config.pause_between_probes.is_zero()
                && !sleep_unless_cancelled(self.config.pause_between_probes, cancel).await
            {
                return Ok(ControllerState::Cancelled);
            }
        }
    }

    async fn probe_with_retry(&mut self, request: &ProbeRequest, cancel: &CancelFlag) -> Settled {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.probes += 1;

            let result =
                match tokio::time::timeout(self.config.probe_timeout, self.driver.probe(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => SearchResult::Transient(format!(
                        "probe timed out after {:?}",
                        self.config.probe_timeout
                    )),
                };

            match result {
                SearchResult::Transient(cause) if attempt < max_attempts => {
                    let delay = self.config.retry.backoff_for(attempt);
                    warn!(
                        assignment = %request.assignment,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        cause = %cause,
                        "transient probe failure, retrying"
                    );
                    if !sleep_unless_cancelled(delay, cancel).await {
                        return Settled::Interrupted;
                    }
                }
                SearchResult::Transient(cause) => {
                    return Settled::Outcome {
                        result: SearchResult::fatal(format!(
                            "gave up after {attempt} attempts: {cause}"
                        )),
                        attempts: attempt,
                    };
                }
                other => {
                    return Settled::Outcome {
                        result: other,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    fn apply(
        &self,
        search: &mut SearchState,
        enumerator: &mut Enumerator,
        request: &ProbeRequest,
        result: SearchResult,
        attempts: u32,
    ) {
        match result {
            SearchResult::Matches(cases) if !cases.is_empty() => {
                info!(
                    assignment = %self.plan.describe(&request.assignment),
                    found = cases.len(),
                    "records found"
                );
                search.record_matches(&request.assignment, &request.params, cases, self.run_id);
            }
            SearchResult::Matches(_) | SearchResult::Empty => {
                debug!(assignment = %request.assignment, "no records");
            }
            SearchResult::Transient(cause) => {
                self.record_fatal(search, enumerator, request, cause, None, attempts);
            }
            SearchResult::Fatal { cause, depth } => {
                self.record_fatal(search, enumerator, request, cause, depth, attempts);
            }
        }
    }

    fn record_fatal(
        &self,
        search: &mut SearchState,
        enumerator: &mut Enumerator,
        request: &ProbeRequest,
        cause: String,
        depth: Option<usize>,
        attempts: u32,
    ) {
        let leaf_depth = request.assignment.depth().saturating_sub(1);
        let pruned = prune_depth(&request.assignment, depth);
        if let Some(prefix) = pruned.and_then(|depth| enumerator.prune(depth)) {
            search.record_pruned(prefix);
        }
        let depth = pruned.unwrap_or(leaf_depth);

        warn!(
            assignment = %self.plan.describe(&request.assignment),
            pruned_depth = depth,
            cause = %cause,
            "skipping after fatal probe failure"
        );

        search.record_failure(ProbeFailure {
            assignment: request.assignment.clone(),
            params: request.params.clone(),
            cause,
            attempts,
            pruned_depth: depth,
            run_id: self.run_id,
            failed_at: Utc::now(),
        });
    }
}

/// Leaf that a resumed run of `state` would probe first.
pub fn resume_point(plan: &SearchPlan, state: &SearchState) -> Result<Option<Assignment>, SearchError> {
    let mut enumerator = Enumerator::for_plan(plan).with_pruned(state.pruned.clone());
    if let Some(cursor) = &state.cursor {
        enumerator.resume_from(cursor)?;
    }
    Ok(enumerator.next_assignment())
}
