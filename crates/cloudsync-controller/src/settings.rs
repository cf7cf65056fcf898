use std::fmt;
use std::sync::Arc;

use cloudsync_core::{
    AnalysisTransport, BranchIssues, CredentialSource, Guardrails, InstructionsFileMode,
    PullRequestFactory, SyncTimings, TelemetrySink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSettings {
    pub timings: SyncTimings,
    pub instructions_file: InstructionsFileMode,
}

/// Collaborators the controller drives. Each one is shared with the host.
#[derive(Clone)]
pub struct SyncDependencies {
    pub transport: Arc<dyn AnalysisTransport>,
    pub credentials: Arc<dyn CredentialSource>,
    pub branch_issues: Arc<dyn BranchIssues>,
    pub pull_requests: Arc<dyn PullRequestFactory>,
    pub guardrails: Arc<dyn Guardrails>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl fmt::Debug for SyncDependencies {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncDependencies")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    AnalysisPoll,
    BranchRetry,
    PullRequestRetry,
    PullRequestListRefresh,
    Debounce,
}

impl TimerPurpose {
    /// Timers that only make sense while the repository is loaded.
    pub const LOADED_ONLY: [Self; 4] = [
        Self::BranchRetry,
        Self::PullRequestRetry,
        Self::PullRequestListRefresh,
        Self::Debounce,
    ];
}
