use serde::Serialize;

use crate::state::{BranchState, PullRequestState, SyncState, SyncStates};

pub const SYNC_STATE_CONTEXT_KEY: &str = "cloudsync:syncState";
pub const PULL_REQUEST_STATE_CONTEXT_KEY: &str = "cloudsync:pullRequestState";
pub const BRANCH_STATE_CONTEXT_KEY: &str = "cloudsync:branchState";

/// Host-facing projection of the three state dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VisibilityFlags {
    pub sync_state: SyncState,
    pub pull_request_state: PullRequestState,
    pub branch_state: BranchState,
    pub show_pull_request: bool,
    pub show_branch_issues: bool,
    pub show_onboarding: bool,
}

impl VisibilityFlags {
    pub fn context_entries(&self) -> [(&'static str, &'static str); 3] {
        [
            (SYNC_STATE_CONTEXT_KEY, self.sync_state.as_str()),
            (
                PULL_REQUEST_STATE_CONTEXT_KEY,
                self.pull_request_state.as_str(),
            ),
            (BRANCH_STATE_CONTEXT_KEY, self.branch_state.as_str()),
        ]
    }
}

pub fn project(states: &SyncStates) -> VisibilityFlags {
    let loaded = states.sync() == SyncState::Loaded;
    VisibilityFlags {
        sync_state: states.sync(),
        pull_request_state: states.pull_request(),
        branch_state: states.branch(),
        show_pull_request: loaded && states.pull_request() == PullRequestState::Loaded,
        show_branch_issues: loaded && states.branch().is_analysed(),
        show_onboarding: states.sync().is_onboarding(),
    }
}
