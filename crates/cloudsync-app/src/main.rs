use anyhow::{Context, Result};
use cloudsync_config::{CloudSyncConfig, ConfigError};
use cloudsync_controller::{
    BranchIssuesCache, CloudSync, FileGuardrails, SyncDependencies, SyncSettings,
    TracingTelemetry, TrackedPullRequestFactory,
};
use cloudsync_core::{AnalysisTransport, LocalRepository};
use cloudsync_eventbus::SyncEventEnvelope;
use integration_analysis_api::{AnalysisApiClient, ApiTokenSource};
use integration_git::{GitCliRepository, GitRepositoryWatcher, ProcessCommandRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const LOG_FILE_NAME: &str = "cloudsync.log";

#[derive(Debug, Default, PartialEq, Eq)]
struct CliFlags {
    repo: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = cloudsync_config::load_from_env()?;
    let config_path = cloudsync_config::config_path_from_env()?;
    init_file_logging(&config, &config_path)?;
    let Some(flags) = parse_cli_flags(std::env::args().skip(1))? else {
        print_cli_help();
        return Ok(());
    };

    let root = match flags.repo {
        Some(repo) => repo,
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    let sync = build_controller(&config, &root)?;

    let git = config.git_runtime();
    let repository = Arc::new(GitCliRepository::new(
        ProcessCommandRunner,
        PathBuf::from(&git.binary),
        root.clone(),
    ));
    let watcher = GitRepositoryWatcher::start(Arc::clone(&repository), git.watch_interval);
    let printer = spawn_event_printer(sync.subscribe_all());

    let handle: Arc<dyn LocalRepository> = repository;
    info!(root = %root.display(), "starting cloudsync");
    sync.open(Arc::clone(&handle)).await;
    info!(state = %sync.state(), "initial resolution finished");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    sync.close(&handle).await;
    sync.shutdown();
    watcher.stop().await?;
    printer.abort();
    Ok(())
}

fn build_controller(config: &CloudSyncConfig, root: &Path) -> Result<CloudSync> {
    let api = config.api_runtime();
    let tokens = ApiTokenSource::from_env(api.token_env).with_fixed_token(api.token);
    let transport: Arc<dyn AnalysisTransport> = Arc::new(
        AnalysisApiClient::with_reqwest(&api.base_url, tokens.clone())
            .context("failed to build the analysis api client")?,
    );

    let guardrails = config.guardrails_runtime();
    let deps = SyncDependencies {
        transport: Arc::clone(&transport),
        credentials: Arc::new(tokens),
        branch_issues: Arc::new(BranchIssuesCache::new(Arc::clone(&transport))),
        pull_requests: Arc::new(TrackedPullRequestFactory::new(Arc::clone(&transport))),
        guardrails: Arc::new(FileGuardrails::new(
            resolve_against(root, &guardrails.rules_file),
            guardrails
                .assistant_config_file
                .as_deref()
                .map(|path| resolve_against(root, path)),
            guardrails.cli_binary,
        )),
        telemetry: Arc::new(TracingTelemetry),
    };
    let settings = SyncSettings {
        timings: config.sync_timings(),
        instructions_file: guardrails.instructions_file,
    };

    Ok(CloudSync::new(deps, settings))
}

fn spawn_event_printer(mut events: broadcast::Receiver<SyncEventEnvelope>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(error = %error, "failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn init_file_logging(config: &CloudSyncConfig, config_path: &Path) -> Result<(), ConfigError> {
    let log_path = log_file_path(config, config_path);
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                ConfigError::Message(format!(
                    "failed to create cloudsync log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            ConfigError::Message(format!(
                "failed to open cloudsync log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}

fn log_file_path(config: &CloudSyncConfig, config_path: &Path) -> PathBuf {
    if let Some(file) = config.logging.file.as_deref() {
        return PathBuf::from(file);
    }
    config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(LOG_FILE_NAME)
}

/// Returns `None` when help was requested.
fn parse_cli_flags<I>(args: I) -> Result<Option<CliFlags>, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut flags = CliFlags::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--repo" => {
                let value = args.next().ok_or_else(|| {
                    ConfigError::Message(
                        "Missing value after --repo. Use --repo <path>.".to_owned(),
                    )
                })?;
                if value.trim().is_empty() {
                    return Err(ConfigError::Message(
                        "Flag '--repo' requires a non-empty value.".to_owned(),
                    ));
                }
                flags.repo = Some(PathBuf::from(value));
            }
            "--help" | "-h" => return Ok(None),
            value if value.starts_with("--") => {
                return Err(ConfigError::Message(format!(
                    "Unknown flag '{value}'. Run with --help for valid flags."
                )));
            }
            unknown => {
                return Err(ConfigError::Message(format!(
                    "Unexpected argument '{unknown}'. Run with --help for valid flags."
                )));
            }
        }
    }

    Ok(Some(flags))
}

fn print_cli_help() {
    println!("Usage: cloudsync [--repo <path>]");
    println!();
    println!("  --repo <path>   Repository to keep in sync (defaults to the current directory)");
    println!("  --help          Show this help message");
}
