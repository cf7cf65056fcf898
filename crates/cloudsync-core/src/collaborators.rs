use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{SyncError, TransportError};
use crate::model::{BranchIssuesRequest, PullRequestAnalysis, PullRequestContext};
use crate::remote::RemoteCandidate;
use crate::state::{BranchState, PullRequestState, SyncState};

pub trait CredentialSource: Send + Sync {
    fn has_credential(&self) -> bool;
}

#[async_trait]
pub trait BranchIssues: Send + Sync {
    async fn refresh(&self, request: BranchIssuesRequest) -> Result<(), TransportError>;
    fn clear(&self);
}

/// The pull request tracked for the current branch.
#[async_trait]
pub trait ActivePullRequest: fmt::Debug + Send + Sync {
    fn number(&self) -> u64;
    fn head_commit_sha(&self) -> Option<String>;
    fn analysis(&self) -> PullRequestAnalysis;
    async fn refresh(&self) -> Result<(), TransportError>;
    fn subscribe_updates(&self) -> broadcast::Receiver<PullRequestAnalysis>;
}

pub trait PullRequestFactory: Send + Sync {
    fn create(
        &self,
        analysis: PullRequestAnalysis,
        context: PullRequestContext,
    ) -> Arc<dyn ActivePullRequest>;
}

/// Whether the rules file follows the opened repository automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionsFileMode {
    Automatic,
    #[default]
    Manual,
}

#[async_trait]
pub trait Guardrails: Send + Sync {
    fn is_cli_available(&self) -> bool;
    fn is_assistant_configured(&self) -> bool;
    async fn has_rules_file(&self) -> bool;
    /// Writes the rules file for `candidate`, or strips repository details
    /// from it when `candidate` is `None`.
    async fn write_rules(&self, candidate: Option<&RemoteCandidate>) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    RepositoryStateChange {
        state: SyncState,
        organization_id: Option<u64>,
    },
    PullRequestStateChange {
        state: PullRequestState,
        organization_id: Option<u64>,
    },
    BranchStateChange {
        state: BranchState,
        organization_id: Option<u64>,
    },
    GuardrailsState {
        has_cli: bool,
        has_assistant: bool,
        has_rules_file: bool,
    },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RepositoryStateChange { .. } => "Repository State Change",
            Self::PullRequestStateChange { .. } => "Pull Request State Change",
            Self::BranchStateChange { .. } => "Branch State Change",
            Self::GuardrailsState { .. } => "Guardrails State on Repository Load",
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn track(&self, event: TelemetryEvent);
}
