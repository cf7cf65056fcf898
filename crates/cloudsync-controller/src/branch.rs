use std::sync::Arc;

use cloudsync_core::transition::{
    head_freshness, match_pull_request, BranchClassification, HeadFreshness, PullRequestMatch,
};
use cloudsync_core::{
    ActivePullRequest, BranchIssuesRequest, BranchState, PullRequestContext, PullRequestState,
    PullRequestSummary, SyncState, TransportError,
};
use cloudsync_eventbus::SyncEvent;
use cloudsync_timers::Subscription;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::controller::{SyncCommand, SyncInner};
use crate::publisher::StateUpdate;
use crate::settings::TimerPurpose;

enum PullRequestDecision {
    NotFound,
    Keep(Arc<dyn ActivePullRequest>),
    Replace(PullRequestSummary, PullRequestContext),
}

impl SyncInner {
    /// Re-reads the checked-out branch and routes it to issue loading or the
    /// pull-request search.
    pub(crate) async fn handle_branch_change(&self) {
        self.refresh_pull_requests().await;

        let (generation, branch, classification) = {
            let mut session = self.session();
            let branch = session.repository.as_ref().and_then(|repository| {
                repository.snapshot().branch_name().map(ToOwned::to_owned)
            });
            session.track_branch(branch.clone());
            let classification = session.tracked_classification();
            (session.generation, branch, classification)
        };

        match classification {
            BranchClassification::NoBranch => {
                warn!("HEAD does not name a branch");
                self.publish_states(
                    generation,
                    StateUpdate::pull_request_and_branch(
                        PullRequestState::NoPullRequest,
                        BranchState::OnUnknownBranch,
                    ),
                );
            }
            BranchClassification::EnabledBranch => {
                info!(branch = ?branch, "on an analysed branch; loading issues");
                self.set_pull_request_state(generation, PullRequestState::NoPullRequest);
                self.load_issues(false).await;
            }
            BranchClassification::PullRequestCandidate => self.load_pull_request().await,
        }
    }

    pub(crate) async fn load_pull_request(&self) {
        self.timers.cancel(TimerPurpose::PullRequestRetry);
        let generation = {
            let session = self.session();
            if session.states.sync() != SyncState::Loaded || session.record.is_none() {
                return;
            }
            if session.tracked_classification() != BranchClassification::PullRequestCandidate {
                debug!(branch = ?session.tracked_branch, "branch has no pull request to search");
                return;
            }
            session.generation
        };

        let pull_requests = self.get_or_fetch_pull_requests().await;

        let (branch, decision) = {
            let session = self.session();
            if session.generation != generation {
                return;
            }
            let held = session
                .active_pull_request
                .clone()
                .map(|active| (active.number(), active));
            let decision = match match_pull_request(
                session.tracked_branch.as_deref(),
                &pull_requests,
                held,
            ) {
                PullRequestMatch::NotFound => PullRequestDecision::NotFound,
                PullRequestMatch::Same(active) => PullRequestDecision::Keep(active),
                PullRequestMatch::Different(summary) => {
                    let Some(record) = session.record.as_ref() else {
                        return;
                    };
                    let context = PullRequestContext {
                        candidate: record.candidate(),
                        expect_coverage: session.expect_coverage,
                    };
                    PullRequestDecision::Replace(summary.clone(), context)
                }
            };
            (session.tracked_branch.clone(), decision)
        };

        match decision {
            PullRequestDecision::NotFound => {
                info!(branch = ?branch, "no open pull request for branch");
                self.publish_states(
                    generation,
                    StateUpdate::pull_request_and_branch(
                        PullRequestState::NoPullRequest,
                        BranchState::OnUnknownBranch,
                    ),
                );
                let retry = {
                    let mut session = self.session();
                    session.generation == generation && session.pull_request_budget.try_consume()
                };
                if retry {
                    self.schedule(
                        generation,
                        TimerPurpose::PullRequestRetry,
                        self.settings.timings.retry_interval,
                        SyncCommand::LoadPullRequest,
                    );
                }
                return;
            }
            PullRequestDecision::Keep(active) => {
                debug!(number = active.number(), "refreshing the held pull request");
                if let Err(error) = active.refresh().await {
                    self.report_transport_error(
                        generation,
                        &error,
                        "failed to refresh pull request",
                    );
                }
            }
            PullRequestDecision::Replace(summary, context) => {
                if !self.replace_active_pull_request(generation, summary, context) {
                    return;
                }
            }
        }

        self.publish_states(
            generation,
            StateUpdate::pull_request_and_branch(
                PullRequestState::Loaded,
                BranchState::OnPullRequestBranch,
            ),
        );
        self.deps.branch_issues.clear();
    }

    fn replace_active_pull_request(
        &self,
        generation: u64,
        summary: PullRequestSummary,
        context: PullRequestContext,
    ) -> bool {
        info!(number = summary.number(), "tracking pull request");
        let active = self.deps.pull_requests.create(summary.analysis, context);
        let mut updates = active.subscribe_updates();
        let events = Arc::clone(&self.events);
        let forwarder = Subscription::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(analysis) => {
                        events.publish(SyncEvent::ActivePullRequestUpdated(Some(analysis)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "pull request forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let snapshot = active.analysis();
        let (installed, previous) = {
            let mut session = self.session();
            if session.generation != generation {
                (false, None)
            } else {
                session.listeners.pull_request_updates = Some(forwarder);
                (true, session.active_pull_request.replace(active))
            }
        };
        drop(previous);
        if installed {
            self.events
                .publish(SyncEvent::ActivePullRequestUpdated(Some(snapshot)));
        }
        installed
    }

    pub(crate) async fn load_issues(&self, retry_on_failure: bool) {
        let (generation, freshness, request) = {
            let session = self.session();
            if session.states.sync() != SyncState::Loaded {
                return;
            }
            if session.tracked_classification() != BranchClassification::EnabledBranch {
                debug!(branch = ?session.tracked_branch, "branch is not analysed; skipping issues");
                return;
            }
            let Some(record) = session.record.as_ref() else {
                return;
            };
            let local = session
                .repository
                .as_ref()
                .and_then(|repository| repository.snapshot().head_commit().map(ToOwned::to_owned));
            let freshness = head_freshness(local.as_deref(), record.last_analysed_sha());
            if freshness == HeadFreshness::Outdated {
                info!(
                    local = ?local,
                    analysed = ?record.last_analysed_sha(),
                    "local branch differs from the last analysed commit"
                );
            }
            let request = session.tracked_branch.clone().map(|branch| BranchIssuesRequest {
                candidate: record.candidate(),
                branch,
            });
            (session.generation, freshness, request)
        };

        self.set_branch_state(generation, freshness.branch_state());
        match freshness {
            HeadFreshness::Outdated => {
                if retry_on_failure {
                    self.schedule(
                        generation,
                        TimerPurpose::BranchRetry,
                        self.settings.timings.retry_interval,
                        SyncCommand::LoadIssues {
                            retry_on_failure: false,
                        },
                    );
                }
            }
            HeadFreshness::Current => {
                let Some(request) = request else {
                    return;
                };
                if let Err(error) = self.deps.branch_issues.refresh(request).await {
                    self.report_transport_error(generation, &error, "failed to load branch issues");
                }
            }
        }
    }

    /// Fetches the open pull requests, or hands back the last list when the
    /// fetch fails.
    pub(crate) async fn get_or_fetch_pull_requests(&self) -> Vec<PullRequestSummary> {
        self.timers.cancel(TimerPurpose::PullRequestListRefresh);
        let (generation, candidate, expect_coverage) = {
            let session = self.session();
            if session.states.sync() != SyncState::Loaded {
                return Vec::new();
            }
            let Some(record) = session.record.as_ref() else {
                return Vec::new();
            };
            (session.generation, record.candidate(), session.expect_coverage)
        };

        debug!(repository = %candidate, "fetching pull requests");
        let fetched = self
            .deps
            .transport
            .list_repository_pull_requests(
                candidate.provider,
                &candidate.organization,
                &candidate.repository,
                self.settings.timings.pull_request_fetch_limit,
            )
            .await;

        let analyses = match fetched {
            Ok(analyses) => analyses,
            Err(error) => {
                self.report_transport_error(generation, &error, "failed to fetch pull requests");
                return self.session().pull_requests.clone();
            }
        };

        let summaries: Vec<PullRequestSummary> = analyses
            .into_iter()
            .map(|analysis| PullRequestSummary::new(analysis, expect_coverage))
            .collect();
        if !self.update_session(generation, |session| {
            session.pull_requests = summaries.clone()
        }) {
            return summaries;
        }
        self.events
            .publish(SyncEvent::PullRequestsUpdated(summaries.clone()));

        if summaries.iter().any(|summary| summary.status.is_loading()) {
            debug!("pull requests still analysing; scheduling a refresh");
            self.schedule(
                generation,
                TimerPurpose::PullRequestListRefresh,
                self.settings.timings.retry_interval,
                SyncCommand::RefreshPullRequests,
            );
        }
        summaries
    }

    pub(crate) async fn refresh_pull_requests(&self) {
        let _ = self.get_or_fetch_pull_requests().await;
    }

    pub(crate) async fn refresh_active_pull_request(&self) {
        let (generation, active) = {
            let session = self.session();
            if session.states.sync() != SyncState::Loaded {
                return;
            }
            (session.generation, session.active_pull_request.clone())
        };
        let Some(active) = active else {
            return;
        };

        info!(number = active.number(), "caught up with remote; refreshing pull request");
        if let Err(error) = active.refresh().await {
            self.report_transport_error(generation, &error, "failed to refresh pull request");
        }
    }

    pub(crate) fn report_transport_error(
        &self,
        generation: u64,
        error: &TransportError,
        message: &'static str,
    ) {
        warn!(error = %error, "{message}");
        if error.is_authentication() {
            self.set_sync_state(generation, SyncState::NeedsAuthentication);
        }
    }
}
