use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::{
    BranchRecord, CoverageOverview, FirstAnalysisStatus, IssueRecord, OnboardingStatus,
    OrganizationRecord, Provider, PullRequestAnalysis, RepositoryRecord,
};

#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn get_repository_with_analysis(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<RepositoryRecord, TransportError>;

    async fn get_organization(
        &self,
        provider: Provider,
        organization: &str,
    ) -> Result<OrganizationRecord, TransportError>;

    async fn list_coverage_reports(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<CoverageOverview, TransportError>;

    /// Lists only the analysis-enabled branches.
    async fn list_repository_branches(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<Vec<BranchRecord>, TransportError>;

    async fn list_repository_pull_requests(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        limit: u32,
    ) -> Result<Vec<PullRequestAnalysis>, TransportError>;

    async fn get_first_analysis_status(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<Option<FirstAnalysisStatus>, TransportError>;

    async fn get_onboarding_status(
        &self,
        provider: Provider,
        organization: &str,
    ) -> Result<OnboardingStatus, TransportError>;

    async fn get_repository_pull_request(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequestAnalysis, TransportError>;

    async fn search_repository_issues(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        branch: &str,
    ) -> Result<Vec<IssueRecord>, TransportError>;
}
