//! Domain model and state machine core for keeping a local checkout in sync
//! with a remote code-analysis service.

mod collaborators;
mod error;
pub mod model;
pub mod remote;
mod repository;
pub mod state;
pub mod timings;
pub mod transition;
mod transport;
pub mod visibility;

pub use collaborators::{
    ActivePullRequest, BranchIssues, CredentialSource, Guardrails, InstructionsFileMode,
    PullRequestFactory, TelemetryEvent, TelemetrySink,
};
pub use error::{SyncError, TransportError};
pub use model::{
    BranchIssuesRequest, BranchRecord, CommitRef, CoverageOverview, FirstAnalysisStatus,
    IssueRecord, JoinStatus, Membership, OnboardingStatus, OrganizationInfo, OrganizationRecord,
    Provider, PullRequestAnalysis, PullRequestContext, PullRequestMeta, PullRequestStatus,
    PullRequestSummary, RepositoryInfo, RepositoryProblem, RepositoryRecord,
    FATAL_PROBLEM_CODES,
};
pub use remote::RemoteCandidate;
pub use repository::{
    HeadSnapshot, LocalRepository, RemoteSnapshot, RepositoryChanged, RepositorySnapshot,
};
pub use state::{BranchState, PullRequestState, StateTransition, SyncState, SyncStates};
pub use timings::SyncTimings;
pub use transport::AnalysisTransport;
pub use visibility::VisibilityFlags;
