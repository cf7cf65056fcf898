use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cloudsync_core::{
    AnalysisTransport, BranchIssues, BranchIssuesRequest, IssueRecord, TransportError,
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchIssuesSnapshot {
    pub request: BranchIssuesRequest,
    pub issues: Vec<IssueRecord>,
}

/// Keeps the issues of the last analysed branch that was loaded.
pub struct BranchIssuesCache {
    transport: Arc<dyn AnalysisTransport>,
    snapshot: RwLock<Option<BranchIssuesSnapshot>>,
}

impl BranchIssuesCache {
    pub fn new(transport: Arc<dyn AnalysisTransport>) -> Self {
        Self {
            transport,
            snapshot: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> Option<BranchIssuesSnapshot> {
        self.snapshot
            .read()
            .expect("branch issues lock poisoned")
            .clone()
    }

    fn store(&self, snapshot: Option<BranchIssuesSnapshot>) {
        *self.snapshot.write().expect("branch issues lock poisoned") = snapshot;
    }
}

#[async_trait]
impl BranchIssues for BranchIssuesCache {
    async fn refresh(&self, request: BranchIssuesRequest) -> Result<(), TransportError> {
        let candidate = &request.candidate;
        let issues = self
            .transport
            .search_repository_issues(
                candidate.provider,
                &candidate.organization,
                &candidate.repository,
                &request.branch,
            )
            .await?;
        info!(
            repository = %candidate,
            branch = %request.branch,
            count = issues.len(),
            "loaded branch issues"
        );
        self.store(Some(BranchIssuesSnapshot { request, issues }));
        Ok(())
    }

    fn clear(&self) {
        self.store(None);
    }
}
