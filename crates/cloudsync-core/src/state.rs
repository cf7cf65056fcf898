use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::OnboardingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Initializing,
    NeedsAuthentication,
    NoGitRepository,
    NeedsToJoinOrganization,
    HasPendingJoinOrganization,
    NeedsToAddOrganization,
    NeedsToAddRepository,
    IsAnalyzing,
    AnalysisFailed,
    Loaded,
    NoRepository,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::NeedsAuthentication => "NeedsAuthentication",
            Self::NoGitRepository => "NoGitRepository",
            Self::NeedsToJoinOrganization => "NeedsToJoinOrganization",
            Self::HasPendingJoinOrganization => "HasPendingJoinOrganization",
            Self::NeedsToAddOrganization => "NeedsToAddOrganization",
            Self::NeedsToAddRepository => "NeedsToAddRepository",
            Self::IsAnalyzing => "IsAnalyzing",
            Self::AnalysisFailed => "AnalysisFailed",
            Self::Loaded => "Loaded",
            Self::NoRepository => "NoRepository",
        }
    }

    pub fn is_onboarding(self) -> bool {
        matches!(
            self,
            Self::NeedsToJoinOrganization
                | Self::HasPendingJoinOrganization
                | Self::NeedsToAddOrganization
                | Self::NeedsToAddRepository
        )
    }
}

impl From<OnboardingStatus> for SyncState {
    fn from(status: OnboardingStatus) -> Self {
        match status {
            OnboardingStatus::NeedsToJoinOrganization => Self::NeedsToJoinOrganization,
            OnboardingStatus::HasPendingJoinOrganization => Self::HasPendingJoinOrganization,
            OnboardingStatus::NeedsToAddOrganization => Self::NeedsToAddOrganization,
            OnboardingStatus::NeedsToAddRepository => Self::NeedsToAddRepository,
            OnboardingStatus::Unavailable => Self::NoRepository,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PullRequestState {
    #[default]
    NoPullRequest,
    Loaded,
}

impl PullRequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPullRequest => "NoPullRequest",
            Self::Loaded => "Loaded",
        }
    }
}

impl fmt::Display for PullRequestState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BranchState {
    #[default]
    OnUnknownBranch,
    OnAnalysedBranch,
    OnAnalysedBranchOutdated,
    OnPullRequestBranch,
}

impl BranchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnUnknownBranch => "OnUnknownBranch",
            Self::OnAnalysedBranch => "OnAnalysedBranch",
            Self::OnAnalysedBranchOutdated => "OnAnalysedBranchOutdated",
            Self::OnPullRequestBranch => "OnPullRequestBranch",
        }
    }

    pub fn is_analysed(self) -> bool {
        matches!(self, Self::OnAnalysedBranch | Self::OnAnalysedBranchOutdated)
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    Sync { from: SyncState, to: SyncState },
    PullRequest {
        from: PullRequestState,
        to: PullRequestState,
    },
    Branch { from: BranchState, to: BranchState },
}

/// The three state dimensions published by the controller.
///
/// Setters return `None` when the value is unchanged so callers can skip
/// notifications entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStates {
    sync: SyncState,
    pull_request: PullRequestState,
    branch: BranchState,
}

impl SyncStates {
    pub fn sync(&self) -> SyncState {
        self.sync
    }

    pub fn pull_request(&self) -> PullRequestState {
        self.pull_request
    }

    pub fn branch(&self) -> BranchState {
        self.branch
    }

    pub fn set_sync(&mut self, to: SyncState) -> Option<StateTransition> {
        let from = std::mem::replace(&mut self.sync, to);
        (from != to).then_some(StateTransition::Sync { from, to })
    }

    pub fn set_pull_request(&mut self, to: PullRequestState) -> Option<StateTransition> {
        let from = std::mem::replace(&mut self.pull_request, to);
        (from != to).then_some(StateTransition::PullRequest { from, to })
    }

    pub fn set_branch(&mut self, to: BranchState) -> Option<StateTransition> {
        let from = std::mem::replace(&mut self.branch, to);
        (from != to).then_some(StateTransition::Branch { from, to })
    }

    pub fn is_consistent(&self) -> bool {
        self.pull_request != PullRequestState::Loaded
            || self.branch == BranchState::OnPullRequestBranch
    }
}
