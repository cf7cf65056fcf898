use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cloudsync_core::{
    ActivePullRequest, AnalysisTransport, PullRequestAnalysis, PullRequestContext,
    PullRequestFactory, TransportError,
};
use tokio::sync::broadcast;
use tracing::debug;

const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Pull request backed by the analysis service. `refresh` re-reads it and
/// broadcasts the new analysis to subscribers.
pub struct TrackedPullRequest {
    transport: Arc<dyn AnalysisTransport>,
    context: PullRequestContext,
    analysis: RwLock<PullRequestAnalysis>,
    updates: broadcast::Sender<PullRequestAnalysis>,
}

impl TrackedPullRequest {
    pub fn new(
        transport: Arc<dyn AnalysisTransport>,
        analysis: PullRequestAnalysis,
        context: PullRequestContext,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            transport,
            context,
            analysis: RwLock::new(analysis),
            updates,
        }
    }

    pub fn context(&self) -> &PullRequestContext {
        &self.context
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PullRequestAnalysis> {
        self.analysis
            .read()
            .expect("pull request analysis lock poisoned")
    }
}

impl fmt::Debug for TrackedPullRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TrackedPullRequest")
            .field("repository", &self.context.candidate.to_string())
            .field("number", &self.number())
            .finish()
    }
}

#[async_trait]
impl ActivePullRequest for TrackedPullRequest {
    fn number(&self) -> u64 {
        self.read().number()
    }

    fn head_commit_sha(&self) -> Option<String> {
        self.read().pull_request.head_commit_sha.clone()
    }

    fn analysis(&self) -> PullRequestAnalysis {
        self.read().clone()
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        let number = self.number();
        let candidate = &self.context.candidate;
        let analysis = self
            .transport
            .get_repository_pull_request(
                candidate.provider,
                &candidate.organization,
                &candidate.repository,
                number,
            )
            .await?;

        *self
            .analysis
            .write()
            .expect("pull request analysis lock poisoned") = analysis.clone();
        if self.updates.send(analysis).is_err() {
            debug!(number, "pull request refreshed with no subscribers");
        }
        Ok(())
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<PullRequestAnalysis> {
        self.updates.subscribe()
    }
}

#[derive(Clone)]
pub struct TrackedPullRequestFactory {
    transport: Arc<dyn AnalysisTransport>,
}

impl TrackedPullRequestFactory {
    pub fn new(transport: Arc<dyn AnalysisTransport>) -> Self {
        Self { transport }
    }
}

impl PullRequestFactory for TrackedPullRequestFactory {
    fn create(
        &self,
        analysis: PullRequestAnalysis,
        context: PullRequestContext,
    ) -> Arc<dyn ActivePullRequest> {
        Arc::new(TrackedPullRequest::new(
            Arc::clone(&self.transport),
            analysis,
            context,
        ))
    }
}
