use std::sync::Arc;
use std::time::Duration;

use cloudsync_core::SyncError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{CommandRunner, GitCliRepository};

/// Polls a [`GitCliRepository`] on a fixed interval so that changes made
/// outside the process reach change subscribers.
#[derive(Debug)]
pub struct GitRepositoryWatcher {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GitRepositoryWatcher {
    pub fn start<R>(repository: Arc<GitCliRepository<R>>, interval: Duration) -> Self
    where
        R: CommandRunner + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let repository = Arc::clone(&repository);
                        match tokio::task::spawn_blocking(move || repository.poll()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(error)) => warn!(error = %error, "git repository poll failed"),
                            Err(error) => {
                                warn!(error = %error, "git repository poll task panicked")
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) -> Result<(), SyncError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|error| {
                SyncError::Repository(format!("git watcher task join failed: {error}"))
            })?;
        }
        Ok(())
    }
}

impl Drop for GitRepositoryWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
