use cloudsync_core::{PullRequestAnalysis, PullRequestSummary, RepositoryRecord, SyncState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncEventTopic {
    StateChanged,
    RepositoryLoaded,
    ActivePullRequest,
    PullRequests,
    Notices,
}

impl SyncEventTopic {
    pub const ALL: [SyncEventTopic; 5] = [
        SyncEventTopic::StateChanged,
        SyncEventTopic::RepositoryLoaded,
        SyncEventTopic::ActivePullRequest,
        SyncEventTopic::PullRequests,
        SyncEventTopic::Notices,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A user-facing message, e.g. when polling gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    StateChanged(SyncState),
    RepositoryLoaded(RepositoryRecord),
    /// `None` when the tracked pull request was dropped.
    ActivePullRequestUpdated(Option<PullRequestAnalysis>),
    PullRequestsUpdated(Vec<PullRequestSummary>),
    Notice(Notice),
}

impl SyncEvent {
    pub fn topic(&self) -> SyncEventTopic {
        match self {
            Self::StateChanged(_) => SyncEventTopic::StateChanged,
            Self::RepositoryLoaded(_) => SyncEventTopic::RepositoryLoaded,
            Self::ActivePullRequestUpdated(_) => SyncEventTopic::ActivePullRequest,
            Self::PullRequestsUpdated(_) => SyncEventTopic::PullRequests,
            Self::Notice(_) => SyncEventTopic::Notices,
        }
    }
}
