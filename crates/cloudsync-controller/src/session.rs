use std::sync::Arc;

use cloudsync_core::transition::{classify_branch, BranchClassification, RetryBudget};
use cloudsync_core::{
    ActivePullRequest, BranchRecord, LocalRepository, OrganizationRecord, PullRequestSummary,
    RemoteCandidate, RepositoryRecord, SyncStates, SyncTimings,
};
use cloudsync_timers::Subscription;

#[derive(Debug, Default)]
pub(crate) struct SessionListeners {
    pub population: Option<Subscription>,
    pub changes: Option<Subscription>,
    pub pull_request_updates: Option<Subscription>,
}

/// Everything tied to one opened repository handle.
///
/// Replaced wholesale on reset; `generation` tells in-flight continuations
/// whether the session they started against is still current.
pub(crate) struct SyncSession {
    pub generation: u64,
    pub states: SyncStates,
    pub repository: Option<Arc<dyn LocalRepository>>,
    pub candidate: Option<RemoteCandidate>,
    pub record: Option<RepositoryRecord>,
    pub organization: Option<OrganizationRecord>,
    pub enabled_branches: Vec<BranchRecord>,
    pub expect_coverage: bool,
    pub tracked_branch: Option<String>,
    pub active_pull_request: Option<Arc<dyn ActivePullRequest>>,
    pub pull_requests: Vec<PullRequestSummary>,
    pub analysis_budget: RetryBudget,
    pub pull_request_budget: RetryBudget,
    pub resolution_in_flight: bool,
    pub resolution_requested: bool,
    pub listeners: SessionListeners,
}

impl SyncSession {
    pub fn new(generation: u64, states: SyncStates, timings: &SyncTimings) -> Self {
        Self {
            generation,
            states,
            repository: None,
            candidate: None,
            record: None,
            organization: None,
            enabled_branches: Vec::new(),
            expect_coverage: false,
            tracked_branch: None,
            active_pull_request: None,
            pull_requests: Vec::new(),
            analysis_budget: RetryBudget::new(timings.max_attempts),
            pull_request_budget: RetryBudget::new(timings.max_attempts),
            resolution_in_flight: false,
            resolution_requested: false,
            listeners: SessionListeners::default(),
        }
    }

    pub fn organization_id(&self) -> Option<u64> {
        self.organization
            .as_ref()
            .map(|record| record.organization.identifier)
    }

    /// Records the checked-out branch. A different branch starts a fresh
    /// pull-request search budget.
    pub fn track_branch(&mut self, branch: Option<String>) {
        if self.tracked_branch != branch {
            self.pull_request_budget.reset();
        }
        self.tracked_branch = branch;
    }

    pub fn tracked_classification(&self) -> BranchClassification {
        classify_branch(self.tracked_branch.as_deref(), &self.enabled_branches)
    }

    pub fn is_current_repository(&self, repository: &Arc<dyn LocalRepository>) -> bool {
        self.repository
            .as_ref()
            .is_some_and(|current| same_handle(current, repository))
    }
}

pub(crate) fn same_handle(
    left: &Arc<dyn LocalRepository>,
    right: &Arc<dyn LocalRepository>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}
