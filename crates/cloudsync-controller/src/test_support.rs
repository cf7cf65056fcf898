use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloudsync_core::{
    ActivePullRequest, AnalysisTransport, BranchIssues, BranchIssuesRequest, BranchRecord,
    CommitRef, CoverageOverview, CredentialSource, FirstAnalysisStatus, Guardrails, HeadSnapshot,
    InstructionsFileMode, IssueRecord, JoinStatus, LocalRepository, Membership, OnboardingStatus,
    OrganizationInfo, OrganizationRecord, Provider, PullRequestAnalysis, PullRequestContext,
    PullRequestFactory, PullRequestMeta, RemoteCandidate, RemoteSnapshot, RepositoryChanged,
    RepositoryInfo, RepositoryProblem, RepositoryRecord, RepositorySnapshot, SyncError,
    SyncTimings, TelemetryEvent, TelemetrySink, TransportError,
};
use cloudsync_eventbus::SyncEventEnvelope;
use tokio::sync::broadcast;

use crate::{CloudSync, SyncDependencies, SyncSettings};

pub(crate) const ANALYSED_SHA: &str = "a1b2c3";

/// Queued responses first, then the sticky fallback.
pub(crate) struct Responses<T> {
    queued: VecDeque<Result<T, TransportError>>,
    fallback: Option<Result<T, TransportError>>,
}

impl<T> Default for Responses<T> {
    fn default() -> Self {
        Self {
            queued: VecDeque::new(),
            fallback: None,
        }
    }
}

impl<T: Clone> Responses<T> {
    pub fn always(&mut self, response: Result<T, TransportError>) {
        self.fallback = Some(response);
    }

    pub fn then(&mut self, response: Result<T, TransportError>) {
        self.queued.push_back(response);
    }

    fn next(&mut self, operation: &str) -> Result<T, TransportError> {
        if let Some(response) = self.queued.pop_front() {
            return response;
        }
        self.fallback.clone().unwrap_or_else(|| {
            Err(TransportError::Request(format!(
                "no stub response for {operation}"
            )))
        })
    }
}

#[derive(Default)]
pub(crate) struct StubResponses {
    pub repositories: HashMap<String, Responses<RepositoryRecord>>,
    pub organization: Responses<OrganizationRecord>,
    pub coverage: Responses<CoverageOverview>,
    pub branches: Responses<Vec<BranchRecord>>,
    pub pull_requests: Responses<Vec<PullRequestAnalysis>>,
    pub first_analysis: Responses<Option<FirstAnalysisStatus>>,
    pub onboarding: Responses<OnboardingStatus>,
    pub pull_request: Responses<PullRequestAnalysis>,
    pub issues: Responses<Vec<IssueRecord>>,
}

impl StubResponses {
    pub fn repository(&mut self, slug: &str) -> &mut Responses<RepositoryRecord> {
        self.repositories.entry(slug.to_owned()).or_default()
    }
}

#[derive(Default)]
pub(crate) struct StubTransport {
    responses: Mutex<StubResponses>,
    calls: Mutex<Vec<String>>,
}

impl StubTransport {
    /// A transport that resolves `acme/widgets` as an analysed repository
    /// with `main` enabled and no open pull requests.
    pub fn analysed() -> Arc<Self> {
        let transport = Arc::new(Self::default());
        transport.edit(|stub| {
            stub.repository("acme/widgets")
                .always(Ok(repository_record(Some(ANALYSED_SHA))));
            stub.organization.always(Ok(organization_record()));
            stub.coverage.always(Ok(CoverageOverview {
                has_coverage_overview: true,
            }));
            stub.branches.always(Ok(branch_records(&["main"])));
            stub.pull_requests.always(Ok(Vec::new()));
            stub.first_analysis.always(Ok(None));
            stub.issues.always(Ok(Vec::new()));
        });
        transport
    }

    pub fn edit<F>(&self, edit: F)
    where
        F: FnOnce(&mut StubResponses),
    {
        edit(&mut self.responses.lock().expect("stub responses lock"));
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("stub calls lock")
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("stub calls lock").len()
    }

    fn record(&self, operation: &str) {
        self.calls
            .lock()
            .expect("stub calls lock")
            .push(operation.to_owned());
    }

    fn respond<T, F>(&self, operation: &str, select: F) -> Result<T, TransportError>
    where
        T: Clone,
        F: FnOnce(&mut StubResponses) -> &mut Responses<T>,
    {
        self.record(operation);
        let mut responses = self.responses.lock().expect("stub responses lock");
        select(&mut responses).next(operation)
    }
}

#[async_trait]
impl AnalysisTransport for StubTransport {
    async fn get_repository_with_analysis(
        &self,
        _provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<RepositoryRecord, TransportError> {
        let slug = format!("{organization}/{repository}");
        self.record("get_repository_with_analysis");
        let mut responses = self.responses.lock().expect("stub responses lock");
        match responses.repositories.get_mut(&slug) {
            Some(queue) => queue.next("get_repository_with_analysis"),
            None => Err(TransportError::NotFound(slug)),
        }
    }

    async fn get_organization(
        &self,
        _provider: Provider,
        _organization: &str,
    ) -> Result<OrganizationRecord, TransportError> {
        self.respond("get_organization", |stub| &mut stub.organization)
    }

    async fn list_coverage_reports(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
    ) -> Result<CoverageOverview, TransportError> {
        self.respond("list_coverage_reports", |stub| &mut stub.coverage)
    }

    async fn list_repository_branches(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
    ) -> Result<Vec<BranchRecord>, TransportError> {
        self.respond("list_repository_branches", |stub| &mut stub.branches)
    }

    async fn list_repository_pull_requests(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
        _limit: u32,
    ) -> Result<Vec<PullRequestAnalysis>, TransportError> {
        self.respond("list_repository_pull_requests", |stub| {
            &mut stub.pull_requests
        })
    }

    async fn get_first_analysis_status(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
    ) -> Result<Option<FirstAnalysisStatus>, TransportError> {
        self.respond("get_first_analysis_status", |stub| &mut stub.first_analysis)
    }

    async fn get_onboarding_status(
        &self,
        _provider: Provider,
        _organization: &str,
    ) -> Result<OnboardingStatus, TransportError> {
        self.respond("get_onboarding_status", |stub| &mut stub.onboarding)
    }

    async fn get_repository_pull_request(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
        _number: u64,
    ) -> Result<PullRequestAnalysis, TransportError> {
        self.respond("get_repository_pull_request", |stub| &mut stub.pull_request)
    }

    async fn search_repository_issues(
        &self,
        _provider: Provider,
        _organization: &str,
        _repository: &str,
        _branch: &str,
    ) -> Result<Vec<IssueRecord>, TransportError> {
        self.respond("search_repository_issues", |stub| &mut stub.issues)
    }
}

pub(crate) struct FakeRepository {
    root: PathBuf,
    snapshot: Mutex<RepositorySnapshot>,
    changes: broadcast::Sender<RepositoryChanged>,
    checkouts: Mutex<Vec<String>>,
}

impl FakeRepository {
    pub fn new(snapshot: RepositorySnapshot) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            root: PathBuf::from("/work/widgets"),
            snapshot: Mutex::new(snapshot),
            changes,
            checkouts: Mutex::new(Vec::new()),
        })
    }

    /// Checked out on `branch` at `commit`, level with its upstream.
    pub fn on_branch(branch: &str, commit: &str) -> Arc<Self> {
        Self::new(snapshot_with(
            Some(branch),
            commit,
            vec![remote("origin", Some("git@github.com:acme/widgets.git"))],
        ))
    }

    pub fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut RepositorySnapshot),
    {
        update(&mut self.snapshot.lock().expect("fake snapshot lock"));
        let _ = self.changes.send(RepositoryChanged);
    }

    pub fn move_head(&self, branch: Option<&str>, commit: &str, ahead: u32) {
        self.update(|snapshot| {
            snapshot.head = Some(HeadSnapshot {
                name: branch.map(ToOwned::to_owned),
                commit: Some(commit.to_owned()),
                ahead: Some(ahead),
                behind: Some(0),
            });
        });
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.checkouts.lock().expect("fake checkouts lock").clone()
    }

    pub fn change_subscribers(&self) -> usize {
        self.changes.receiver_count()
    }
}

#[async_trait]
impl LocalRepository for FakeRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot(&self) -> RepositorySnapshot {
        self.snapshot.lock().expect("fake snapshot lock").clone()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<RepositoryChanged> {
        self.changes.subscribe()
    }

    async fn checkout(&self, branch: &str) -> Result<(), SyncError> {
        self.checkouts
            .lock()
            .expect("fake checkouts lock")
            .push(branch.to_owned());
        let commit = self.snapshot().head_commit().unwrap_or_default().to_owned();
        self.move_head(Some(branch), &commit, 0);
        Ok(())
    }
}

pub(crate) struct FakePullRequest {
    analysis: Mutex<PullRequestAnalysis>,
    context: PullRequestContext,
    refreshes: AtomicUsize,
    updates: broadcast::Sender<PullRequestAnalysis>,
}

impl FakePullRequest {
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn update_subscribers(&self) -> usize {
        self.updates.receiver_count()
    }

    pub fn publish(&self, analysis: PullRequestAnalysis) {
        *self.analysis.lock().expect("fake pull request lock") = analysis.clone();
        let _ = self.updates.send(analysis);
    }

    pub fn context(&self) -> &PullRequestContext {
        &self.context
    }
}

impl fmt::Debug for FakePullRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FakePullRequest")
            .field("number", &self.number())
            .finish()
    }
}

#[async_trait]
impl ActivePullRequest for FakePullRequest {
    fn number(&self) -> u64 {
        self.analysis.lock().expect("fake pull request lock").number()
    }

    fn head_commit_sha(&self) -> Option<String> {
        self.analysis
            .lock()
            .expect("fake pull request lock")
            .pull_request
            .head_commit_sha
            .clone()
    }

    fn analysis(&self) -> PullRequestAnalysis {
        self.analysis.lock().expect("fake pull request lock").clone()
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<PullRequestAnalysis> {
        self.updates.subscribe()
    }
}

#[derive(Default)]
pub(crate) struct FakePullRequestFactory {
    created: Mutex<Vec<Arc<FakePullRequest>>>,
}

impl FakePullRequestFactory {
    pub fn created(&self) -> Vec<Arc<FakePullRequest>> {
        self.created.lock().expect("fake factory lock").clone()
    }
}

impl PullRequestFactory for FakePullRequestFactory {
    fn create(
        &self,
        analysis: PullRequestAnalysis,
        context: PullRequestContext,
    ) -> Arc<dyn ActivePullRequest> {
        let (updates, _) = broadcast::channel(16);
        let pull_request = Arc::new(FakePullRequest {
            analysis: Mutex::new(analysis),
            context,
            refreshes: AtomicUsize::new(0),
            updates,
        });
        self.created
            .lock()
            .expect("fake factory lock")
            .push(Arc::clone(&pull_request));
        pull_request
    }
}

#[derive(Default)]
pub(crate) struct FakeBranchIssues {
    refreshed: Mutex<Vec<BranchIssuesRequest>>,
    clears: AtomicUsize,
}

impl FakeBranchIssues {
    pub fn refreshed(&self) -> Vec<BranchIssuesRequest> {
        self.refreshed.lock().expect("fake issues lock").clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BranchIssues for FakeBranchIssues {
    async fn refresh(&self, request: BranchIssuesRequest) -> Result<(), TransportError> {
        self.refreshed
            .lock()
            .expect("fake issues lock")
            .push(request);
        Ok(())
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeGuardrails {
    pub assistant_configured: AtomicBool,
    writes: Mutex<Vec<Option<RemoteCandidate>>>,
}

impl FakeGuardrails {
    pub fn writes(&self) -> Vec<Option<RemoteCandidate>> {
        self.writes.lock().expect("fake guardrails lock").clone()
    }
}

#[async_trait]
impl Guardrails for FakeGuardrails {
    fn is_cli_available(&self) -> bool {
        true
    }

    fn is_assistant_configured(&self) -> bool {
        self.assistant_configured.load(Ordering::SeqCst)
    }

    async fn has_rules_file(&self) -> bool {
        !self.writes().is_empty()
    }

    async fn write_rules(&self, candidate: Option<&RemoteCandidate>) -> Result<(), SyncError> {
        self.writes
            .lock()
            .expect("fake guardrails lock")
            .push(candidate.cloned());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().expect("telemetry lock").clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track(&self, event: TelemetryEvent) {
        self.events.lock().expect("telemetry lock").push(event);
    }
}

pub(crate) struct FakeCredentials(pub AtomicBool);

impl CredentialSource for FakeCredentials {
    fn has_credential(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) struct Harness {
    pub sync: CloudSync,
    pub transport: Arc<StubTransport>,
    pub credentials: Arc<FakeCredentials>,
    pub issues: Arc<FakeBranchIssues>,
    pub factory: Arc<FakePullRequestFactory>,
    pub guardrails: Arc<FakeGuardrails>,
    pub telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
    pub fn new(transport: Arc<StubTransport>) -> Self {
        Self::with_mode(transport, InstructionsFileMode::Manual)
    }

    pub fn with_mode(
        transport: Arc<StubTransport>,
        instructions_file: InstructionsFileMode,
    ) -> Self {
        let credentials = Arc::new(FakeCredentials(AtomicBool::new(true)));
        let issues = Arc::new(FakeBranchIssues::default());
        let factory = Arc::new(FakePullRequestFactory::default());
        let guardrails = Arc::new(FakeGuardrails::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let deps = SyncDependencies {
            transport: transport.clone(),
            credentials: credentials.clone(),
            branch_issues: issues.clone(),
            pull_requests: factory.clone(),
            guardrails: guardrails.clone(),
            telemetry: telemetry.clone(),
        };
        let settings = SyncSettings {
            timings: SyncTimings::default(),
            instructions_file,
        };

        Self {
            sync: CloudSync::new(deps, settings),
            transport,
            credentials,
            issues,
            factory,
            guardrails,
            telemetry,
        }
    }

    pub fn timer_count(&self) -> usize {
        self.sync.inner().timers.timer_count()
    }

    pub fn is_scheduled(&self, purpose: crate::TimerPurpose) -> bool {
        self.sync.inner().timers.is_scheduled(purpose)
    }
}

/// Lets spawned commands, listeners and fired timers run to completion.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub(crate) async fn advance(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

pub(crate) fn drain(
    receiver: &mut broadcast::Receiver<SyncEventEnvelope>,
) -> Vec<SyncEventEnvelope> {
    let mut envelopes = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        envelopes.push(envelope);
    }
    envelopes
}

pub(crate) fn remote(name: &str, push_url: Option<&str>) -> RemoteSnapshot {
    RemoteSnapshot {
        name: name.to_owned(),
        fetch_url: push_url.map(ToOwned::to_owned),
        push_url: push_url.map(ToOwned::to_owned),
    }
}

pub(crate) fn snapshot_with(
    branch: Option<&str>,
    commit: &str,
    remotes: Vec<RemoteSnapshot>,
) -> RepositorySnapshot {
    RepositorySnapshot {
        head: Some(HeadSnapshot {
            name: branch.map(ToOwned::to_owned),
            commit: Some(commit.to_owned()),
            ahead: Some(0),
            behind: Some(0),
        }),
        remotes,
    }
}

pub(crate) fn repository_record(last_analysed: Option<&str>) -> RepositoryRecord {
    RepositoryRecord {
        repository: RepositoryInfo {
            provider: Provider::GitHub,
            owner: "acme".to_owned(),
            name: "widgets".to_owned(),
            problems: Vec::new(),
        },
        last_analysed_commit: last_analysed.map(|sha| CommitRef {
            sha: sha.to_owned(),
        }),
    }
}

pub(crate) fn repository_record_with_problem(code: &str) -> RepositoryRecord {
    let mut record = repository_record(None);
    record.repository.problems.push(RepositoryProblem {
        code: code.to_owned(),
        message: String::new(),
    });
    record
}

pub(crate) fn organization_record() -> OrganizationRecord {
    OrganizationRecord {
        organization: OrganizationInfo {
            identifier: 42,
            name: "acme".to_owned(),
            provider: Provider::GitHub,
        },
        membership: Some(Membership {
            join_status: JoinStatus::Member,
        }),
    }
}

pub(crate) fn branch_records(names: &[&str]) -> Vec<BranchRecord> {
    names
        .iter()
        .map(|name| BranchRecord {
            name: (*name).to_owned(),
        })
        .collect()
}

pub(crate) fn pull_request_analysis(number: u64, origin: &str, head: &str) -> PullRequestAnalysis {
    PullRequestAnalysis {
        pull_request: PullRequestMeta {
            number,
            title: format!("Pull request {number}"),
            origin_branch: Some(origin.to_owned()),
            target_branch: Some("main".to_owned()),
            head_commit_sha: Some(head.to_owned()),
        },
        is_analysing: false,
        is_up_to_standards: Some(true),
        new_issues: Some(0),
        fixed_issues: Some(0),
    }
}
