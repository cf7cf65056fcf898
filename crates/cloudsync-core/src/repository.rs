use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeadSnapshot {
    pub name: Option<String>,
    pub commit: Option<String>,
    pub ahead: Option<u32>,
    pub behind: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub name: String,
    pub fetch_url: Option<String>,
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub head: Option<HeadSnapshot>,
    pub remotes: Vec<RemoteSnapshot>,
}

impl RepositorySnapshot {
    /// `false` while the observer has reported neither HEAD nor any remote.
    pub fn is_populated(&self) -> bool {
        self.head.is_some() || !self.remotes.is_empty()
    }

    pub fn push_urls(&self) -> impl Iterator<Item = &str> {
        self.remotes
            .iter()
            .filter_map(|remote| remote.push_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.head.as_ref().and_then(|head| head.name.as_deref())
    }

    pub fn head_commit(&self) -> Option<&str> {
        self.head.as_ref().and_then(|head| head.commit.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryChanged;

/// A local working copy observed by the controller.
#[async_trait]
pub trait LocalRepository: Send + Sync {
    fn root(&self) -> &Path;
    fn snapshot(&self) -> RepositorySnapshot;
    fn subscribe_changes(&self) -> broadcast::Receiver<RepositoryChanged>;
    async fn checkout(&self, branch: &str) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_urls_skip_fetch_only_and_blank_remotes() {
        let snapshot = RepositorySnapshot {
            head: None,
            remotes: vec![
                RemoteSnapshot {
                    name: "upstream".to_owned(),
                    fetch_url: Some("git@github.com:acme/widgets.git".to_owned()),
                    push_url: None,
                },
                RemoteSnapshot {
                    name: "mirror".to_owned(),
                    fetch_url: None,
                    push_url: Some("  ".to_owned()),
                },
                RemoteSnapshot {
                    name: "origin".to_owned(),
                    fetch_url: None,
                    push_url: Some("git@github.com:me/widgets.git".to_owned()),
                },
            ],
        };

        assert!(snapshot.is_populated());
        assert_eq!(
            snapshot.push_urls().collect::<Vec<_>>(),
            vec!["git@github.com:me/widgets.git"]
        );
    }

    #[test]
    fn empty_snapshot_is_not_populated() {
        let snapshot = RepositorySnapshot::default();
        assert!(!snapshot.is_populated());
        assert_eq!(snapshot.branch_name(), None);
        assert_eq!(snapshot.head_commit(), None);
    }
}
