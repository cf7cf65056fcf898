use std::sync::Arc;

use cloudsync_core::visibility;
use cloudsync_core::{
    BranchState, InstructionsFileMode, PullRequestState, RemoteCandidate, StateTransition,
    SyncState, TelemetryEvent,
};
use cloudsync_eventbus::{Notice, SyncEvent};
use tracing::{debug, warn};

use crate::controller::SyncInner;
use crate::settings::TimerPurpose;

/// Values to write to the three state dimensions in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct StateUpdate {
    pub sync: Option<SyncState>,
    pub pull_request: Option<PullRequestState>,
    pub branch: Option<BranchState>,
}

impl StateUpdate {
    pub fn sync(state: SyncState) -> Self {
        Self {
            sync: Some(state),
            ..Self::default()
        }
    }

    pub fn pull_request(state: PullRequestState) -> Self {
        Self {
            pull_request: Some(state),
            ..Self::default()
        }
    }

    pub fn branch(state: BranchState) -> Self {
        Self {
            branch: Some(state),
            ..Self::default()
        }
    }

    pub fn pull_request_and_branch(pull_request: PullRequestState, branch: BranchState) -> Self {
        Self {
            sync: None,
            pull_request: Some(pull_request),
            branch: Some(branch),
        }
    }
}

impl SyncInner {
    pub(crate) fn set_sync_state(&self, generation: u64, state: SyncState) {
        self.publish_states(generation, StateUpdate::sync(state));
    }

    pub(crate) fn set_pull_request_state(&self, generation: u64, state: PullRequestState) {
        self.publish_states(generation, StateUpdate::pull_request(state));
    }

    pub(crate) fn set_branch_state(&self, generation: u64, state: BranchState) {
        self.publish_states(generation, StateUpdate::branch(state));
    }

    /// Writes `update` and publishes whatever actually changed.
    ///
    /// Observers see the dimensions change together: the visibility
    /// projection and the state event go out under the session lock.
    pub(crate) fn publish_states(&self, generation: u64, update: StateUpdate) {
        let (transitions, organization_id) = {
            let mut session = self.session();
            if session.generation != generation {
                debug!(generation, "ignoring state update for a retired session");
                return;
            }

            let transitions: Vec<StateTransition> = [
                update.sync.and_then(|state| session.states.set_sync(state)),
                update
                    .pull_request
                    .and_then(|state| session.states.set_pull_request(state)),
                update.branch.and_then(|state| session.states.set_branch(state)),
            ]
            .into_iter()
            .flatten()
            .collect();

            if transitions.is_empty() {
                return;
            }

            self.visibility
                .send_replace(visibility::project(&session.states));
            for transition in &transitions {
                if let StateTransition::Sync { to, .. } = transition {
                    self.events.publish(SyncEvent::StateChanged(*to));
                }
            }
            (transitions, session.organization_id())
        };

        for transition in transitions {
            debug!(?transition, "state transition");
            match transition {
                StateTransition::Sync { to, .. } => {
                    if to != SyncState::Loaded {
                        for purpose in TimerPurpose::LOADED_ONLY {
                            self.timers.cancel(purpose);
                        }
                    }
                    self.deps.telemetry.track(TelemetryEvent::RepositoryStateChange {
                        state: to,
                        organization_id,
                    });
                    self.spawn_guardrails_probe();
                }
                StateTransition::PullRequest { to, .. } => {
                    self.deps.telemetry.track(TelemetryEvent::PullRequestStateChange {
                        state: to,
                        organization_id,
                    });
                }
                StateTransition::Branch { to, .. } => {
                    self.deps.telemetry.track(TelemetryEvent::BranchStateChange {
                        state: to,
                        organization_id,
                    });
                }
            }
        }
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.events.publish(SyncEvent::Notice(notice));
    }

    pub(crate) fn rules_follow_repository(&self) -> bool {
        self.settings.instructions_file == InstructionsFileMode::Automatic
            && self.deps.guardrails.is_assistant_configured()
    }

    pub(crate) async fn write_rules(&self, candidate: Option<&RemoteCandidate>) {
        if let Err(error) = self.deps.guardrails.write_rules(candidate).await {
            warn!(error = %error, "failed to write assistant rules file");
        }
    }

    fn spawn_guardrails_probe(&self) {
        let guardrails = Arc::clone(&self.deps.guardrails);
        let telemetry = Arc::clone(&self.deps.telemetry);
        tokio::spawn(async move {
            let has_cli = guardrails.is_cli_available();
            let has_assistant = guardrails.is_assistant_configured();
            let has_rules_file = guardrails.has_rules_file().await;
            telemetry.track(TelemetryEvent::GuardrailsState {
                has_cli,
                has_assistant,
                has_rules_file,
            });
        });
    }
}
