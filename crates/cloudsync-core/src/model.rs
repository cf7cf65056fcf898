use std::fmt;

use serde::{Deserialize, Serialize};

use crate::remote::RemoteCandidate;

/// Problem codes that mean the first analysis can never succeed.
pub const FATAL_PROBLEM_CODES: &[&str] = &["no_supported_languages", "empty_repository"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "gh")]
    GitHub,
    #[serde(rename = "gl")]
    GitLab,
    #[serde(rename = "bb")]
    Bitbucket,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "gh",
            Self::GitLab => "gl",
            Self::Bitbucket => "bb",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryProblem {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub provider: Provider,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub problems: Vec<RepositoryProblem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub repository: RepositoryInfo,
    #[serde(default)]
    pub last_analysed_commit: Option<CommitRef>,
}

impl RepositoryRecord {
    pub fn has_fatal_problem(&self) -> bool {
        self.repository
            .problems
            .iter()
            .any(|problem| FATAL_PROBLEM_CODES.contains(&problem.code.as_str()))
    }

    pub fn last_analysed_sha(&self) -> Option<&str> {
        self.last_analysed_commit
            .as_ref()
            .map(|commit| commit.sha.as_str())
    }

    pub fn candidate(&self) -> RemoteCandidate {
        RemoteCandidate {
            provider: self.repository.provider,
            organization: self.repository.owner.clone(),
            repository: self.repository.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinStatus {
    Member,
    PendingMember,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub join_status: JoinStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationInfo {
    pub identifier: u64,
    pub name: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub organization: OrganizationInfo,
    #[serde(default)]
    pub membership: Option<Membership>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageOverview {
    pub has_coverage_overview: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirstAnalysisStatus {
    #[serde(default)]
    pub detected: Vec<String>,
}

impl FirstAnalysisStatus {
    pub fn is_empty(&self) -> bool {
        self.detected.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnboardingStatus {
    NeedsToJoinOrganization,
    HasPendingJoinOrganization,
    NeedsToAddOrganization,
    NeedsToAddRepository,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestMeta {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub origin_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default, rename = "headCommitSHA")]
    pub head_commit_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestAnalysis {
    pub pull_request: PullRequestMeta,
    #[serde(default)]
    pub is_analysing: bool,
    #[serde(default)]
    pub is_up_to_standards: Option<bool>,
    #[serde(default)]
    pub new_issues: Option<u32>,
    #[serde(default)]
    pub fixed_issues: Option<u32>,
}

impl PullRequestAnalysis {
    pub fn number(&self) -> u64 {
        self.pull_request.number
    }

    pub fn origin_branch(&self) -> Option<&str> {
        self.pull_request.origin_branch.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullRequestStatus {
    Loading,
    Passing,
    Failing,
    Unknown,
}

impl PullRequestStatus {
    pub fn from_analysis(analysis: &PullRequestAnalysis) -> Self {
        if analysis.is_analysing {
            return Self::Loading;
        }
        match analysis.is_up_to_standards {
            Some(true) => Self::Passing,
            Some(false) => Self::Failing,
            None => Self::Unknown,
        }
    }

    pub fn is_loading(self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// One open pull request as listed for the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub analysis: PullRequestAnalysis,
    pub status: PullRequestStatus,
    pub expect_coverage: bool,
}

impl PullRequestSummary {
    pub fn new(analysis: PullRequestAnalysis, expect_coverage: bool) -> Self {
        let status = PullRequestStatus::from_analysis(&analysis);
        Self {
            analysis,
            status,
            expect_coverage,
        }
    }

    pub fn number(&self) -> u64 {
        self.analysis.number()
    }

    pub fn origin_branch(&self) -> Option<&str> {
        self.analysis.origin_branch()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRecord {
    pub issue_id: String,
    pub message: String,
    pub file_path: String,
    #[serde(default)]
    pub line_number: u32,
    #[serde(default)]
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchIssuesRequest {
    pub candidate: RemoteCandidate,
    pub branch: String,
}

/// Handed to a newly constructed active pull request in place of a
/// back-reference to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestContext {
    pub candidate: RemoteCandidate,
    pub expect_coverage: bool,
}
