//! Pure decision functions driven by the controller.
//!
//! Nothing here performs I/O or touches timers; every function maps the
//! current session facts onto the next step to take.

use crate::model::{BranchRecord, FirstAnalysisStatus, PullRequestSummary, RepositoryRecord};
use crate::repository::HeadSnapshot;
use crate::state::{BranchState, PullRequestState, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchClassification {
    /// HEAD is detached or unknown.
    NoBranch,
    /// The branch is analysed directly by the service.
    EnabledBranch,
    /// Any other branch; it may back an open pull request.
    PullRequestCandidate,
}

pub fn classify_branch(branch: Option<&str>, enabled: &[BranchRecord]) -> BranchClassification {
    match branch {
        None => BranchClassification::NoBranch,
        Some(name) if enabled.iter().any(|record| record.name == name) => {
            BranchClassification::EnabledBranch
        }
        Some(_) => BranchClassification::PullRequestCandidate,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadFreshness {
    Current,
    Outdated,
}

impl HeadFreshness {
    pub fn branch_state(self) -> BranchState {
        match self {
            Self::Current => BranchState::OnAnalysedBranch,
            Self::Outdated => BranchState::OnAnalysedBranchOutdated,
        }
    }
}

/// Two unknown commits compare equal.
pub fn head_freshness(local_commit: Option<&str>, analysed_commit: Option<&str>) -> HeadFreshness {
    if local_commit == analysed_commit {
        HeadFreshness::Current
    } else {
        HeadFreshness::Outdated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstAnalysisOutcome {
    Failed,
    InProgress,
}

impl FirstAnalysisOutcome {
    pub fn sync_state(self) -> SyncState {
        match self {
            Self::Failed => SyncState::AnalysisFailed,
            Self::InProgress => SyncState::IsAnalyzing,
        }
    }
}

/// Decides between a failed and a still-running first analysis for a record
/// without a last analysed commit. An unknown status counts as running.
pub fn first_analysis_outcome(
    record: &RepositoryRecord,
    status: Option<&FirstAnalysisStatus>,
) -> FirstAnalysisOutcome {
    let nothing_detected = status.is_some_and(FirstAnalysisStatus::is_empty);
    if nothing_detected || record.has_fatal_problem() {
        FirstAnalysisOutcome::Failed
    } else {
        FirstAnalysisOutcome::InProgress
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestMatch<'a, H> {
    NotFound,
    /// The branch's pull request is the one already held.
    Same(H),
    Different(&'a PullRequestSummary),
}

/// Finds the open pull request for `branch`. `held` pairs the number of the
/// pull request currently tracked with the tracked object itself.
pub fn match_pull_request<'a, H>(
    branch: Option<&str>,
    pull_requests: &'a [PullRequestSummary],
    held: Option<(u64, H)>,
) -> PullRequestMatch<'a, H> {
    let Some(branch) = branch else {
        return PullRequestMatch::NotFound;
    };
    let Some(summary) = pull_requests
        .iter()
        .find(|summary| summary.origin_branch() == Some(branch))
    else {
        return PullRequestMatch::NotFound;
    };

    match held {
        Some((number, held)) if number == summary.number() => PullRequestMatch::Same(held),
        _ => PullRequestMatch::Different(summary),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeContext<'a> {
    pub tracked_branch: Option<&'a str>,
    pub head: Option<&'a HeadSnapshot>,
    pub pull_request_state: PullRequestState,
    pub branch_state: BranchState,
    pub has_active_pull_request: bool,
    pub active_pull_request_head: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReaction {
    BranchSwitched { branch: Option<String> },
    RefreshActivePullRequest,
    ReloadIssues,
    Ignore,
}

pub fn react_to_change(context: ChangeContext<'_>) -> ChangeReaction {
    let current_branch = context.head.and_then(|head| head.name.as_deref());
    if current_branch != context.tracked_branch {
        return ChangeReaction::BranchSwitched {
            branch: current_branch.map(ToOwned::to_owned),
        };
    }

    let head_commit = context.head.and_then(|head| head.commit.as_deref());
    let caught_up = context.head.and_then(|head| head.ahead) == Some(0);

    if context.has_active_pull_request
        && context.pull_request_state == PullRequestState::Loaded
        && context
            .active_pull_request_head
            .is_some_and(|sha| head_commit != Some(sha))
        && caught_up
    {
        return ChangeReaction::RefreshActivePullRequest;
    }

    if context.branch_state.is_analysed() && caught_up {
        return ChangeReaction::ReloadIssues;
    }

    ChangeReaction::Ignore
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    RefreshPullRequests,
    Resolve,
}

pub fn refresh_action(state: SyncState) -> RefreshAction {
    match state {
        SyncState::Loaded | SyncState::IsAnalyzing | SyncState::AnalysisFailed => {
            RefreshAction::RefreshPullRequests
        }
        SyncState::Initializing
        | SyncState::NeedsAuthentication
        | SyncState::NoGitRepository
        | SyncState::NeedsToJoinOrganization
        | SyncState::HasPendingJoinOrganization
        | SyncState::NeedsToAddOrganization
        | SyncState::NeedsToAddRepository
        | SyncState::NoRepository => RefreshAction::Resolve,
    }
}

/// Bounded attempt counter shared by the poll loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    used: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Counts one attempt, or returns `false` once the budget is spent.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
