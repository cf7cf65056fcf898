use std::sync::Arc;

use cloudsync_core::transition::{first_analysis_outcome, FirstAnalysisOutcome};
use cloudsync_core::{
    LocalRepository, RemoteCandidate, RepositoryChanged, RepositoryRecord, SyncError, SyncState,
};
use cloudsync_eventbus::{Notice, SyncEvent};
use cloudsync_timers::Subscription;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::controller::{SyncCommand, SyncInner};
use crate::settings::TimerPurpose;

pub(crate) const ANALYSIS_COMPLETED_NOTICE: &str =
    "Repository analysis completed. Reload the workspace to see the results.";
pub(crate) const ANALYSIS_SLOW_NOTICE: &str =
    "Repository analysis is taking longer than expected. Check back later to see the results.";

impl SyncInner {
    /// Runs resolution passes for `generation` until no further request is
    /// pending. A request made while a pass is running is folded into one
    /// follow-up pass.
    pub(crate) async fn resolve(&self, generation: u64) {
        loop {
            let repository = {
                let mut session = self.session();
                if session.generation != generation {
                    return;
                }
                let Some(repository) = session.repository.clone() else {
                    return;
                };
                if session.resolution_in_flight {
                    debug!("resolution already running; queueing a follow-up pass");
                    session.resolution_requested = true;
                    return;
                }
                session.resolution_in_flight = true;
                repository
            };

            if let Err(error) = self.resolve_repository(generation, repository).await {
                if error.is_authentication() {
                    warn!(error = %error, "repository lookup requires authentication");
                    self.set_sync_state(generation, SyncState::NeedsAuthentication);
                } else {
                    warn!(error = %error, "failed to resolve repository");
                    self.set_sync_state(generation, SyncState::NoRepository);
                }
            }

            let follow_up = {
                let mut session = self.session();
                if session.generation != generation {
                    return;
                }
                session.resolution_in_flight = false;
                std::mem::take(&mut session.resolution_requested)
            };
            if !follow_up {
                return;
            }
        }
    }

    async fn resolve_repository(
        &self,
        generation: u64,
        repository: Arc<dyn LocalRepository>,
    ) -> Result<(), SyncError> {
        if !self.deps.credentials.has_credential() {
            info!("no api credential present; authentication required");
            self.set_sync_state(generation, SyncState::NeedsAuthentication);
            return Ok(());
        }

        let snapshot = repository.snapshot();
        if !snapshot.is_populated() {
            debug!(root = %repository.root().display(), "waiting for repository to populate");
            self.set_sync_state(generation, SyncState::Initializing);
            self.await_population(generation, &repository);
            return Ok(());
        }

        if snapshot.head.is_none() {
            debug!("repository has remotes but no HEAD yet");
            self.set_sync_state(generation, SyncState::Initializing);
            return Ok(());
        }

        let push_urls: Vec<String> = snapshot.push_urls().map(ToOwned::to_owned).collect();
        if push_urls.is_empty() {
            info!(root = %repository.root().display(), "repository has no push remote");
            self.set_sync_state(generation, SyncState::NoGitRepository);
            return Ok(());
        }

        let mut first_candidate: Option<RemoteCandidate> = None;
        let mut resolved: Option<RepositoryRecord> = None;
        for url in &push_urls {
            let Some(candidate) = RemoteCandidate::from_remote_url(url) else {
                debug!(url = %url, "skipping remote with unrecognised url");
                continue;
            };
            if first_candidate.is_none() {
                first_candidate = Some(candidate.clone());
            }
            if !self.update_session(generation, |session| {
                session.candidate = Some(candidate.clone())
            }) {
                return Ok(());
            }
            if self.rules_follow_repository() {
                self.write_rules(Some(&candidate)).await;
            }

            info!(repository = %candidate, "looking up repository");
            match self
                .deps
                .transport
                .get_repository_with_analysis(
                    candidate.provider,
                    &candidate.organization,
                    &candidate.repository,
                )
                .await
            {
                Ok(record) => {
                    resolved = Some(record);
                    break;
                }
                Err(error) if error.is_authentication() => return Err(error.into()),
                Err(error) => {
                    debug!(error = %error, repository = %candidate, "remote did not resolve");
                }
            }
        }

        let Some(record) = resolved else {
            return self.resolve_onboarding(generation, first_candidate).await;
        };
        if !self.update_session(generation, |session| {
            session.candidate = Some(record.candidate());
            session.record = Some(record.clone());
        }) {
            return Ok(());
        }

        if record.last_analysed_commit.is_none() {
            return self.resolve_first_analysis(generation, &record).await;
        }

        self.load_repository(generation, &repository, record).await
    }

    async fn resolve_first_analysis(
        &self,
        generation: u64,
        record: &RepositoryRecord,
    ) -> Result<(), SyncError> {
        let info = &record.repository;
        let status = match self
            .deps
            .transport
            .get_first_analysis_status(info.provider, &info.owner, &info.name)
            .await
        {
            Ok(status) => status,
            Err(error) if error.is_authentication() => return Err(error.into()),
            Err(error) => {
                warn!(error = %error, "failed to read first analysis status");
                None
            }
        };

        let outcome = first_analysis_outcome(record, status.as_ref());
        info!(?outcome, repository = %record.candidate(), "repository has no analysed commit");
        self.set_sync_state(generation, outcome.sync_state());
        if outcome == FirstAnalysisOutcome::InProgress {
            self.check_analysis_status().await;
        }
        Ok(())
    }

    async fn load_repository(
        &self,
        generation: u64,
        repository: &Arc<dyn LocalRepository>,
        record: RepositoryRecord,
    ) -> Result<(), SyncError> {
        let info = &record.repository;
        let transport = &self.deps.transport;
        let organization = transport
            .get_organization(info.provider, &info.owner)
            .await?;
        let coverage = transport
            .list_coverage_reports(info.provider, &info.owner, &info.name)
            .await?;
        let branches = transport
            .list_repository_branches(info.provider, &info.owner, &info.name)
            .await?;

        let changes = repository.subscribe_changes();
        let listener = self.spawn_change_listener(generation, changes);
        if !self.update_session(generation, |session| {
            session.organization = Some(organization);
            session.expect_coverage = coverage.has_coverage_overview;
            session.enabled_branches = branches;
            session.listeners.changes = Some(listener);
        }) {
            return Ok(());
        }

        info!(repository = %record.candidate(), "repository loaded");
        self.set_sync_state(generation, SyncState::Loaded);
        self.events.publish(SyncEvent::RepositoryLoaded(record));
        self.handle_branch_change().await;
        Ok(())
    }

    async fn resolve_onboarding(
        &self,
        generation: u64,
        first_candidate: Option<RemoteCandidate>,
    ) -> Result<(), SyncError> {
        let Some(candidate) = first_candidate else {
            info!("no remote maps to a known provider");
            self.set_sync_state(generation, SyncState::NoRepository);
            return Ok(());
        };
        if !self.update_session(generation, |session| {
            session.candidate = Some(candidate.clone());
            session.record = None;
        }) {
            return Ok(());
        }

        let transport = &self.deps.transport;
        let status = transport
            .get_onboarding_status(candidate.provider, &candidate.organization)
            .await?;
        match transport
            .get_organization(candidate.provider, &candidate.organization)
            .await
        {
            Ok(organization) => {
                self.update_session(generation, |session| {
                    session.organization = Some(organization)
                });
            }
            Err(error) => {
                warn!(
                    error = %error,
                    organization = %candidate.organization,
                    "failed to fetch organization"
                );
            }
        }

        info!(?status, repository = %candidate, "repository is not set up for analysis");
        self.set_sync_state(generation, SyncState::from(status));
        Ok(())
    }

    /// Arms a one-shot wait for the repository's first HEAD or remote.
    fn await_population(&self, generation: u64, repository: &Arc<dyn LocalRepository>) {
        let mut session = self.session();
        if session.generation != generation || session.listeners.population.is_some() {
            return;
        }

        let mut changes = repository.subscribe_changes();
        let repository = Arc::clone(repository);
        let timeout = self.settings.timings.repository_population_timeout;
        let weak = self.weak();
        session.listeners.population = Some(Subscription::spawn(async move {
            let populated = tokio::time::timeout(timeout, async {
                if repository.snapshot().is_populated() {
                    return true;
                }
                loop {
                    match changes.recv().await {
                        Ok(RepositoryChanged) | Err(RecvError::Lagged(_)) => {
                            if repository.snapshot().is_populated() {
                                return true;
                            }
                        }
                        Err(RecvError::Closed) => return false,
                    }
                }
            })
            .await
            .unwrap_or(false);

            if let Some(inner) = weak.upgrade() {
                let command = if populated {
                    SyncCommand::PopulationSettled
                } else {
                    SyncCommand::PopulationTimedOut
                };
                inner.dispatch(generation, command);
            }
        }));
    }

    pub(crate) fn release_population_wait(&self, generation: u64) -> bool {
        let listener = {
            let mut session = self.session();
            if session.generation != generation {
                return false;
            }
            session.listeners.population.take()
        };
        listener.is_some()
    }

    pub(crate) fn population_timed_out(&self, generation: u64) {
        if !self.release_population_wait(generation) {
            return;
        }
        if self.session().resolution_in_flight {
            debug!("population wait expired during a resolution pass; ignoring");
            return;
        }
        warn!("repository did not populate in time");
        self.set_sync_state(generation, SyncState::NoGitRepository);
    }

    fn spawn_change_listener(
        &self,
        generation: u64,
        mut changes: broadcast::Receiver<RepositoryChanged>,
    ) -> Subscription {
        let weak = self.weak();
        Subscription::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(RepositoryChanged) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.dispatch(generation, SyncCommand::RepositoryChanged);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub(crate) async fn check_analysis_status(&self) {
        self.timers.cancel(TimerPurpose::AnalysisPoll);
        let (generation, candidate) = {
            let session = self.session();
            if session.states.sync() != SyncState::IsAnalyzing {
                return;
            }
            let Some(candidate) = session.candidate.clone() else {
                return;
            };
            (session.generation, candidate)
        };

        let fetched = self
            .deps
            .transport
            .get_repository_with_analysis(
                candidate.provider,
                &candidate.organization,
                &candidate.repository,
            )
            .await;

        match fetched {
            Ok(record) if record.last_analysed_commit.is_some() => {
                if !self.update_session(generation, |session| session.record = Some(record)) {
                    return;
                }
                info!(repository = %candidate, "first analysis completed");
                self.set_sync_state(generation, SyncState::Loaded);
                self.notify(Notice::info(ANALYSIS_COMPLETED_NOTICE));
            }
            Ok(_) => {
                let attempt = {
                    let mut session = self.session();
                    if session.generation != generation {
                        return;
                    }
                    session
                        .analysis_budget
                        .try_consume()
                        .then(|| session.analysis_budget.used())
                };
                match attempt {
                    Some(attempt) => {
                        info!(
                            attempt,
                            max_attempts = self.settings.timings.max_attempts,
                            repository = %candidate,
                            "first analysis still running; checking again later"
                        );
                        self.schedule(
                            generation,
                            TimerPurpose::AnalysisPoll,
                            self.settings.timings.retry_interval,
                            SyncCommand::CheckAnalysisStatus,
                        );
                    }
                    None => {
                        warn!(repository = %candidate, "gave up waiting for first analysis");
                        self.notify(Notice::warning(ANALYSIS_SLOW_NOTICE));
                    }
                }
            }
            Err(error) => {
                warn!(
                    error = %error,
                    repository = %candidate,
                    "analysis status check failed; stopping checks"
                );
                if error.is_authentication() {
                    self.set_sync_state(generation, SyncState::NeedsAuthentication);
                }
            }
        }
    }
}
