use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use cloudsync_core::transition::{refresh_action, RefreshAction};
use cloudsync_core::visibility;
use cloudsync_core::{
    ActivePullRequest, BranchRecord, BranchState, CommitRef, HeadSnapshot, LocalRepository,
    OrganizationRecord, PullRequestState, PullRequestSummary, RemoteCandidate, RepositoryRecord,
    SyncError, SyncState, SyncStates, VisibilityFlags,
};
use cloudsync_eventbus::{SyncEvent, SyncEventBus, SyncEventEnvelope, SyncEventTopic};
use cloudsync_timers::RetryTimerSet;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::publisher::StateUpdate;
use crate::session::SyncSession;
use crate::settings::{SyncDependencies, SyncSettings, TimerPurpose};

/// Work that timers and listeners hand back to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncCommand {
    Resolve,
    PopulationSettled,
    PopulationTimedOut,
    CheckAnalysisStatus,
    LoadPullRequest,
    RefreshPullRequests,
    LoadIssues { retry_on_failure: bool },
    RefreshActivePullRequest,
    RepositoryChanged,
}

pub(crate) struct SyncInner {
    pub(crate) deps: SyncDependencies,
    pub(crate) settings: SyncSettings,
    pub(crate) events: Arc<SyncEventBus>,
    pub(crate) visibility: watch::Sender<VisibilityFlags>,
    pub(crate) timers: RetryTimerSet<TimerPurpose>,
    session: Mutex<SyncSession>,
    weak_self: Weak<SyncInner>,
}

impl SyncInner {
    pub(crate) fn session(&self) -> MutexGuard<'_, SyncSession> {
        self.session.lock().expect("sync session lock poisoned")
    }

    pub(crate) fn generation(&self) -> u64 {
        self.session().generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.session().generation == generation
    }

    /// Applies `update` only while `generation` is still the live session.
    pub(crate) fn update_session<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut SyncSession),
    {
        let mut session = self.session();
        if session.generation != generation {
            return false;
        }
        update(&mut session);
        true
    }

    pub(crate) fn weak(&self) -> Weak<SyncInner> {
        self.weak_self.clone()
    }

    pub(crate) fn dispatch(&self, generation: u64, command: SyncCommand) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            inner.run(generation, command).await;
        });
    }

    pub(crate) fn schedule(
        &self,
        generation: u64,
        purpose: TimerPurpose,
        delay: Duration,
        command: SyncCommand,
    ) {
        let weak = self.weak_self.clone();
        self.timers.schedule(purpose, delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(generation, command);
            }
        });
    }

    async fn run(&self, generation: u64, command: SyncCommand) {
        if !self.is_current(generation) {
            debug!(?command, generation, "dropping command for a retired session");
            return;
        }

        match command {
            SyncCommand::Resolve => self.resolve(generation).await,
            SyncCommand::PopulationSettled => {
                self.release_population_wait(generation);
                self.resolve(generation).await;
            }
            SyncCommand::PopulationTimedOut => self.population_timed_out(generation),
            SyncCommand::CheckAnalysisStatus => self.check_analysis_status().await,
            SyncCommand::LoadPullRequest => self.load_pull_request().await,
            SyncCommand::RefreshPullRequests => self.refresh_pull_requests().await,
            SyncCommand::LoadIssues { retry_on_failure } => {
                self.load_issues(retry_on_failure).await
            }
            SyncCommand::RefreshActivePullRequest => self.refresh_active_pull_request().await,
            SyncCommand::RepositoryChanged => self.handle_repository_change().await,
        }
    }

    /// Retires the current session: cancels every timer, bumps the
    /// generation and hands back the old session so its listeners are
    /// dropped outside the lock.
    fn reset_session(&self) -> (u64, SyncSession) {
        let mut session = self.session();
        self.timers.cancel_all();
        let generation = session
            .generation
            .checked_add(1)
            .expect("sync session generation exhausted");
        let fresh = SyncSession::new(generation, session.states, &self.settings.timings);
        let previous = std::mem::replace(&mut *session, fresh);
        (generation, previous)
    }

    async fn open(&self, repository: Arc<dyn LocalRepository>) {
        if !self.deps.credentials.has_credential() {
            info!("no api credential present; authentication required");
            let generation = self.generation();
            self.set_sync_state(generation, SyncState::NeedsAuthentication);
            return;
        }

        let replacing = {
            let session = self.session();
            if session.is_current_repository(&repository) {
                debug!(root = %repository.root().display(), "repository already open");
                return;
            }
            session.repository.is_some()
        };

        let generation = if replacing {
            let (generation, previous) = self.reset_session();
            let had_pull_request = previous.active_pull_request.is_some();
            drop(previous);
            self.deps.branch_issues.clear();
            if had_pull_request {
                self.events.publish(SyncEvent::ActivePullRequestUpdated(None));
            }
            self.publish_states(
                generation,
                StateUpdate::pull_request_and_branch(
                    PullRequestState::NoPullRequest,
                    BranchState::OnUnknownBranch,
                ),
            );
            generation
        } else {
            self.generation()
        };

        info!(root = %repository.root().display(), "opening repository");
        if !self.update_session(generation, |session| session.repository = Some(repository)) {
            return;
        }
        self.resolve(generation).await;
    }

    async fn clear(&self) {
        let (generation, previous) = self.reset_session();
        let had_pull_request = previous.active_pull_request.is_some();
        drop(previous);

        self.deps.branch_issues.clear();
        if had_pull_request {
            self.events.publish(SyncEvent::ActivePullRequestUpdated(None));
        }
        if self.rules_follow_repository() {
            self.write_rules(None).await;
        }

        let state = if self.deps.credentials.has_credential() {
            SyncState::NoGitRepository
        } else {
            SyncState::NeedsAuthentication
        };
        self.publish_states(
            generation,
            StateUpdate {
                sync: Some(state),
                pull_request: Some(PullRequestState::NoPullRequest),
                branch: Some(BranchState::OnUnknownBranch),
            },
        );
    }

    async fn refresh(&self) {
        let (generation, state) = {
            let session = self.session();
            if session.repository.is_none() {
                return;
            }
            (session.generation, session.states.sync())
        };

        match refresh_action(state) {
            RefreshAction::RefreshPullRequests => self.refresh_pull_requests().await,
            RefreshAction::Resolve => self.resolve(generation).await,
        }
    }

    fn shutdown(&self) {
        let (_, previous) = self.reset_session();
        drop(previous);
    }
}

/// Keeps one local checkout in sync with its remote analysis.
///
/// All workflows run on the ambient tokio runtime; the async operations
/// return once the immediate pass finishes, while retries and change
/// reactions continue in the background until [`CloudSync::clear`] or
/// [`CloudSync::shutdown`].
#[derive(Clone)]
pub struct CloudSync {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for CloudSync {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CloudSync")
            .field("state", &self.state())
            .field("pull_request_state", &self.pull_request_state())
            .field("branch_state", &self.branch_state())
            .finish()
    }
}

impl CloudSync {
    pub fn new(deps: SyncDependencies, settings: SyncSettings) -> Self {
        Self::with_event_bus(deps, settings, Arc::new(SyncEventBus::default()))
    }

    pub fn with_event_bus(
        deps: SyncDependencies,
        settings: SyncSettings,
        events: Arc<SyncEventBus>,
    ) -> Self {
        let states = SyncStates::default();
        let (visibility, _) = watch::channel(visibility::project(&states));
        let inner = Arc::new_cyclic(|weak_self| SyncInner {
            session: Mutex::new(SyncSession::new(0, states, &settings.timings)),
            deps,
            settings,
            events,
            visibility,
            timers: RetryTimerSet::new(),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    pub async fn open(&self, repository: Arc<dyn LocalRepository>) {
        self.inner.open(repository).await;
    }

    /// Clears the session if `repository` is the handle currently open.
    pub async fn close(&self, repository: &Arc<dyn LocalRepository>) {
        let is_current = self.inner.session().is_current_repository(repository);
        if is_current {
            self.inner.clear().await;
        }
    }

    pub async fn clear(&self) {
        self.inner.clear().await;
    }

    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Checks out the pull request's origin branch unless it is already HEAD.
    pub async fn checkout(&self, summary: &PullRequestSummary) -> Result<(), SyncError> {
        let Some(origin) = summary.origin_branch() else {
            return Ok(());
        };
        let repository = self.inner.session().repository.clone();
        let Some(repository) = repository else {
            return Ok(());
        };
        if repository.snapshot().branch_name() == Some(origin) {
            return Ok(());
        }

        info!(branch = origin, number = summary.number(), "checking out pull request branch");
        repository.checkout(origin).await
    }

    /// Stops every timer and listener without publishing state changes.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub async fn load_pull_request(&self) {
        self.inner.load_pull_request().await;
    }

    pub async fn load_issues(&self, retry_on_failure: bool) {
        self.inner.load_issues(retry_on_failure).await;
    }

    pub async fn refresh_pull_requests(&self) {
        self.inner.refresh_pull_requests().await;
    }

    pub async fn check_analysis_status(&self) {
        self.inner.check_analysis_status().await;
    }

    pub fn state(&self) -> SyncState {
        self.inner.session().states.sync()
    }

    pub fn pull_request_state(&self) -> PullRequestState {
        self.inner.session().states.pull_request()
    }

    pub fn branch_state(&self) -> BranchState {
        self.inner.session().states.branch()
    }

    pub fn states(&self) -> SyncStates {
        self.inner.session().states
    }

    pub fn repository(&self) -> Option<RepositoryRecord> {
        self.inner.session().record.clone()
    }

    pub fn organization(&self) -> Option<OrganizationRecord> {
        self.inner.session().organization.clone()
    }

    pub fn enabled_branches(&self) -> Vec<BranchRecord> {
        self.inner.session().enabled_branches.clone()
    }

    pub fn expect_coverage(&self) -> bool {
        self.inner.session().expect_coverage
    }

    pub fn candidate(&self) -> Option<RemoteCandidate> {
        self.inner.session().candidate.clone()
    }

    pub fn last_analysed_commit(&self) -> Option<CommitRef> {
        self.inner
            .session()
            .record
            .as_ref()
            .and_then(|record| record.last_analysed_commit.clone())
    }

    pub fn head(&self) -> Option<HeadSnapshot> {
        let repository = self.inner.session().repository.clone();
        repository.and_then(|repository| repository.snapshot().head)
    }

    pub fn pull_request(&self) -> Option<Arc<dyn ActivePullRequest>> {
        self.inner.session().active_pull_request.clone()
    }

    pub fn pull_requests(&self) -> Vec<PullRequestSummary> {
        self.inner.session().pull_requests.clone()
    }

    pub fn events(&self) -> &Arc<SyncEventBus> {
        &self.inner.events
    }

    pub fn subscribe(&self, topic: SyncEventTopic) -> broadcast::Receiver<SyncEventEnvelope> {
        self.inner.events.subscribe(topic)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.inner.events.subscribe_all()
    }

    pub fn subscribe_visibility(&self) -> watch::Receiver<VisibilityFlags> {
        self.inner.visibility.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SyncInner> {
        &self.inner
    }
}
