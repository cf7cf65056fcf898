use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cloudsync_core::{Guardrails, RemoteCandidate, SyncError};
use tracing::debug;

const RULES_HEADER: &str = "# Code analysis rules\n\n\
After editing a file, run the analysis CLI on it and fix any new issues it reports.\n";

/// Guardrails that live on disk: a CLI on `PATH`, an assistant config file
/// and a generated rules file.
#[derive(Debug, Clone)]
pub struct FileGuardrails {
    rules_file: PathBuf,
    assistant_config_file: Option<PathBuf>,
    cli_binary: String,
}

impl FileGuardrails {
    pub fn new(
        rules_file: PathBuf,
        assistant_config_file: Option<PathBuf>,
        cli_binary: impl Into<String>,
    ) -> Self {
        Self {
            rules_file,
            assistant_config_file,
            cli_binary: cli_binary.into(),
        }
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }
}

#[async_trait]
impl Guardrails for FileGuardrails {
    fn is_cli_available(&self) -> bool {
        let binary = Path::new(&self.cli_binary);
        if binary.components().count() > 1 {
            return binary.is_file();
        }
        env::var_os("PATH").is_some_and(|paths| {
            env::split_paths(&paths).any(|directory| directory.join(binary).is_file())
        })
    }

    fn is_assistant_configured(&self) -> bool {
        self.assistant_config_file
            .as_deref()
            .is_some_and(Path::is_file)
    }

    async fn has_rules_file(&self) -> bool {
        tokio::fs::metadata(&self.rules_file)
            .await
            .is_ok_and(|metadata| metadata.is_file())
    }

    async fn write_rules(&self, candidate: Option<&RemoteCandidate>) -> Result<(), SyncError> {
        if let Some(parent) = self.rules_file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                SyncError::Configuration(format!(
                    "failed to create rules directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        tokio::fs::write(&self.rules_file, render_rules(candidate))
            .await
            .map_err(|error| {
                SyncError::Configuration(format!(
                    "failed to write rules file {}: {error}",
                    self.rules_file.display()
                ))
            })?;
        debug!(path = %self.rules_file.display(), "wrote assistant rules file");
        Ok(())
    }
}

fn render_rules(candidate: Option<&RemoteCandidate>) -> String {
    let mut rules = RULES_HEADER.to_owned();
    if let Some(candidate) = candidate {
        rules.push_str("\n## Repository\n\n");
        rules.push_str(&format!("- provider: {}\n", candidate.provider));
        rules.push_str(&format!("- organization: {}\n", candidate.organization));
        rules.push_str(&format!("- repository: {}\n", candidate.repository));
    }
    rules
}
