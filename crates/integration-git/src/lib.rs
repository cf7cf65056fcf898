use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use async_trait::async_trait;
use cloudsync_core::{
    HeadSnapshot, LocalRepository, RemoteSnapshot, RepositoryChanged, RepositorySnapshot,
    SyncError,
};
use tokio::sync::broadcast;
use tracing::debug;

mod watcher;

pub use watcher::GitRepositoryWatcher;

const CHANGE_BUFFER_CAPACITY: usize = 16;

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output> {
        Command::new(program).args(args).output()
    }
}

/// A working copy observed through the git CLI.
///
/// `snapshot()` returns the state seen by the last `poll()`, so a freshly
/// created repository reports nothing until it has been polled once.
pub struct GitCliRepository<R: CommandRunner> {
    runner: R,
    binary: PathBuf,
    root: PathBuf,
    observed: Mutex<RepositorySnapshot>,
    changes: broadcast::Sender<RepositoryChanged>,
}

impl<R: CommandRunner> GitCliRepository<R> {
    pub fn new(runner: R, binary: PathBuf, root: PathBuf) -> Self {
        let (changes, _receiver) = broadcast::channel(CHANGE_BUFFER_CAPACITY);
        Self {
            runner,
            binary,
            root,
            observed: Mutex::new(RepositorySnapshot::default()),
            changes,
        }
    }

    /// Re-reads the working copy and notifies subscribers when anything
    /// differs from the previous observation.
    pub fn poll(&self) -> Result<bool, SyncError> {
        let current = self.read_snapshot()?;
        let mut observed = self
            .observed
            .lock()
            .expect("git repository snapshot lock poisoned");
        if *observed == current {
            return Ok(false);
        }

        debug!(
            root = %self.root.display(),
            branch = current.branch_name().unwrap_or("<detached>"),
            remotes = current.remotes.len(),
            "git repository changed"
        );
        *observed = current;
        drop(observed);
        let _ = self.changes.send(RepositoryChanged);
        Ok(true)
    }

    pub fn read_snapshot(&self) -> Result<RepositorySnapshot, SyncError> {
        let output = self.run_git(&self.args(&["rev-parse", "--is-inside-work-tree"]))?;
        if String::from_utf8_lossy(&output.stdout).trim() != "true" {
            return Err(SyncError::Repository(format!(
                "{} is not inside a git work tree",
                self.root.display()
            )));
        }

        Ok(RepositorySnapshot {
            head: self.read_head()?,
            remotes: self.read_remotes()?,
        })
    }

    fn read_head(&self) -> Result<Option<HeadSnapshot>, SyncError> {
        let name = self.optional_line(&["symbolic-ref", "-q", "--short", "HEAD"])?;
        let commit = self.optional_line(&["rev-parse", "--verify", "-q", "HEAD"])?;
        if name.is_none() && commit.is_none() {
            return Ok(None);
        }

        let (ahead, behind) = if commit.is_some() {
            let output = self.run_git_raw(&self.args(&[
                "rev-list",
                "--left-right",
                "--count",
                "@{upstream}...HEAD",
            ]))?;
            if output.status.success() {
                let (ahead, behind) = parse_ahead_behind(&output.stdout)?;
                (Some(ahead), Some(behind))
            } else {
                (None, None)
            }
        } else {
            (None, None)
        };

        Ok(Some(HeadSnapshot {
            name,
            commit,
            ahead,
            behind,
        }))
    }

    fn read_remotes(&self) -> Result<Vec<RemoteSnapshot>, SyncError> {
        let output = self.run_git(&self.args(&["remote", "-v"]))?;
        Ok(parse_remotes(&output.stdout))
    }

    fn optional_line(&self, args: &[&str]) -> Result<Option<String>, SyncError> {
        let output = self.run_git_raw(&self.args(args))?;
        if !output.status.success() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok((!line.is_empty()).then_some(line))
    }

    fn args(&self, args: &[&str]) -> Vec<OsString> {
        let mut rendered = vec![OsString::from("-C"), self.root.as_os_str().to_owned()];
        rendered.extend(args.iter().map(OsString::from));
        rendered
    }

    fn run_git_raw(&self, args: &[OsString]) -> Result<std::process::Output, SyncError> {
        let program = self
            .binary
            .to_str()
            .ok_or_else(|| SyncError::Configuration("Invalid git binary path".to_owned()))?;
        self.runner
            .run(program, args)
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => SyncError::Configuration(format!(
                    "Git CLI `{}` was not found. Install Git or set git.binary to a valid binary path.",
                    self.binary.display()
                )),
                _ => SyncError::Repository(format!(
                    "Failed to execute Git CLI `{}`: {error}",
                    self.binary.display()
                )),
            })
    }

    fn run_git(&self, args: &[OsString]) -> Result<std::process::Output, SyncError> {
        let output = self.run_git_raw(args)?;
        if output.status.success() {
            return Ok(output);
        }

        Err(self.command_failed(args, &output))
    }

    fn command_failed(&self, args: &[OsString], output: &std::process::Output) -> SyncError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let detail = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("exit status {}", output.status)
        };
        let rendered_args = args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        SyncError::Repository(format!(
            "Git command failed (`{} {rendered_args}`): {detail}",
            self.binary.display()
        ))
    }
}

#[async_trait]
impl<R: CommandRunner> LocalRepository for GitCliRepository<R> {
    fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot(&self) -> RepositorySnapshot {
        self.observed
            .lock()
            .expect("git repository snapshot lock poisoned")
            .clone()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<RepositoryChanged> {
        self.changes.subscribe()
    }

    async fn checkout(&self, branch: &str) -> Result<(), SyncError> {
        if branch.trim().is_empty() || branch.starts_with('-') {
            return Err(SyncError::Repository(format!(
                "refusing to check out invalid branch name `{branch}`"
            )));
        }
        self.run_git(&self.args(&["checkout", branch]))?;
        self.poll()?;
        Ok(())
    }
}

fn parse_ahead_behind(stdout: &[u8]) -> Result<(u32, u32), SyncError> {
    let output = String::from_utf8_lossy(stdout);
    let mut parts = output.split_whitespace();

    let behind = parts
        .next()
        .ok_or_else(|| {
            SyncError::Repository("Git ahead/behind output is missing the `behind` count.".to_owned())
        })?
        .parse::<u32>()
        .map_err(|error| {
            SyncError::Repository(format!(
                "Git ahead/behind output has invalid `behind` count: {error}"
            ))
        })?;

    let ahead = parts
        .next()
        .ok_or_else(|| {
            SyncError::Repository("Git ahead/behind output is missing the `ahead` count.".to_owned())
        })?
        .parse::<u32>()
        .map_err(|error| {
            SyncError::Repository(format!(
                "Git ahead/behind output has invalid `ahead` count: {error}"
            ))
        })?;

    Ok((ahead, behind))
}

/// Parses `git remote -v`, keeping remotes in first-seen order.
fn parse_remotes(stdout: &[u8]) -> Vec<RemoteSnapshot> {
    let output = String::from_utf8_lossy(stdout);
    let mut remotes: Vec<RemoteSnapshot> = Vec::new();

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url), Some(kind)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let index = match remotes.iter().position(|remote| remote.name == name) {
            Some(index) => index,
            None => {
                remotes.push(RemoteSnapshot {
                    name: name.to_owned(),
                    fetch_url: None,
                    push_url: None,
                });
                remotes.len() - 1
            }
        };
        match kind {
            "(fetch)" => remotes[index].fetch_url = Some(url.to_owned()),
            "(push)" => remotes[index].push_url = Some(url.to_owned()),
            _ => {}
        }
    }

    remotes
}
