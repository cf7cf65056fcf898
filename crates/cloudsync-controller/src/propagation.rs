use std::sync::Arc;

use cloudsync_core::transition::{react_to_change, ChangeContext, ChangeReaction};
use cloudsync_core::{ActivePullRequest, BranchState, PullRequestState, SyncState};
use cloudsync_eventbus::SyncEvent;
use cloudsync_timers::Subscription;
use tracing::{debug, info};

use crate::controller::{SyncCommand, SyncInner};
use crate::settings::TimerPurpose;

/// Timers armed for one branch that must not outlive a branch switch.
const BRANCH_SCOPED: [TimerPurpose; 3] = [
    TimerPurpose::PullRequestRetry,
    TimerPurpose::BranchRetry,
    TimerPurpose::Debounce,
];

/// What the previous branch left behind when a switch was claimed.
struct RetiredBranch {
    pull_request: Option<Arc<dyn ActivePullRequest>>,
    forwarder: Option<Subscription>,
}

impl SyncInner {
    /// Reacts to one "repository changed" notification from the open handle.
    ///
    /// A branch switch is claimed in the same critical section that detects
    /// it, so concurrent notifications for one switch run it once.
    pub(crate) async fn handle_repository_change(&self) {
        let (generation, reaction, retired) = {
            let mut session = self.session();
            if session.states.sync() != SyncState::Loaded {
                return;
            }
            let Some(repository) = session.repository.clone() else {
                return;
            };
            let snapshot = repository.snapshot();
            let active_head = session
                .active_pull_request
                .as_ref()
                .and_then(|pull_request| pull_request.head_commit_sha());
            let reaction = react_to_change(ChangeContext {
                tracked_branch: session.tracked_branch.as_deref(),
                head: snapshot.head.as_ref(),
                pull_request_state: session.states.pull_request(),
                branch_state: session.states.branch(),
                has_active_pull_request: session.active_pull_request.is_some(),
                active_pull_request_head: active_head.as_deref(),
            });

            let retired = match &reaction {
                ChangeReaction::BranchSwitched { branch } => {
                    session.track_branch(branch.clone());
                    for purpose in BRANCH_SCOPED {
                        self.timers.cancel(purpose);
                    }
                    Some(RetiredBranch {
                        pull_request: session.active_pull_request.take(),
                        forwarder: session.listeners.pull_request_updates.take(),
                    })
                }
                _ => None,
            };
            (session.generation, reaction, retired)
        };

        match reaction {
            ChangeReaction::BranchSwitched { branch } => {
                info!(branch = ?branch, "branch changed");
                if let Some(retired) = retired {
                    self.switch_branch(generation, retired).await;
                }
            }
            ChangeReaction::RefreshActivePullRequest => {
                debug!("head caught up with a pull request update; debouncing refresh");
                self.schedule(
                    generation,
                    TimerPurpose::Debounce,
                    self.settings.timings.debounce,
                    SyncCommand::RefreshActivePullRequest,
                );
            }
            ChangeReaction::ReloadIssues => {
                debug!("head caught up on analysed branch; debouncing issue reload");
                self.schedule(
                    generation,
                    TimerPurpose::Debounce,
                    self.settings.timings.debounce,
                    SyncCommand::LoadIssues {
                        retry_on_failure: true,
                    },
                );
            }
            ChangeReaction::Ignore => {}
        }
    }

    async fn switch_branch(&self, generation: u64, retired: RetiredBranch) {
        drop(retired.forwarder);
        drop(retired.pull_request);
        self.events.publish(SyncEvent::ActivePullRequestUpdated(None));

        self.set_pull_request_state(generation, PullRequestState::NoPullRequest);
        self.deps.branch_issues.clear();
        self.set_branch_state(generation, BranchState::OnUnknownBranch);
        self.refresh_pull_requests().await;
        self.handle_branch_change().await;
    }
}
