use cloudsync_core::{InstructionsFileMode, SyncTimings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_CLOUDSYNC_CONFIG: &str = "CLOUDSYNC_CONFIG";

const DEFAULT_API_BASE_URL: &str = "https://app.codacy.com/api/v3";
const DEFAULT_API_TOKEN_ENV: &str = "CODACY_API_TOKEN";
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 120;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_DEBOUNCE_SECS: u64 = 10;
const DEFAULT_REPOSITORY_POPULATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PULL_REQUEST_FETCH_LIMIT: u32 = 100;
const MAX_PULL_REQUEST_FETCH_LIMIT: u32 = 100;
const DEFAULT_RULES_FILE: &str = ".cloudsync/rules.md";
const DEFAULT_CLI_BINARY: &str = "codacy-cli";
const DEFAULT_GIT_BINARY: &str = "git";
const DEFAULT_GIT_WATCH_INTERVAL_MS: u64 = 2000;
const MIN_GIT_WATCH_INTERVAL_MS: u64 = 100;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudSyncConfig {
    #[serde(default)]
    pub api: ApiConfigToml,
    #[serde(default)]
    pub sync: SyncConfigToml,
    #[serde(default)]
    pub guardrails: GuardrailsConfigToml,
    #[serde(default)]
    pub git: GitConfigToml,
    #[serde(default)]
    pub logging: LoggingConfigToml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRuntimeConfig {
    pub base_url: String,
    pub token_env: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailsRuntimeConfig {
    pub instructions_file: InstructionsFileMode,
    pub rules_file: PathBuf,
    pub assistant_config_file: Option<PathBuf>,
    pub cli_binary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRuntimeConfig {
    pub binary: String,
    pub watch_interval: Duration,
}

impl CloudSyncConfig {
    pub fn api_runtime(&self) -> ApiRuntimeConfig {
        ApiRuntimeConfig {
            base_url: self.api.base_url.clone(),
            token_env: self.api.token_env.clone(),
            token: self.api.token.clone(),
        }
    }

    pub fn sync_timings(&self) -> SyncTimings {
        SyncTimings {
            retry_interval: Duration::from_secs(self.sync.retry_interval_secs),
            max_attempts: self.sync.max_attempts,
            debounce: Duration::from_secs(self.sync.debounce_secs),
            repository_population_timeout: Duration::from_secs(
                self.sync.repository_population_timeout_secs,
            ),
            pull_request_fetch_limit: self.sync.pull_request_fetch_limit,
        }
    }

    pub fn guardrails_runtime(&self) -> GuardrailsRuntimeConfig {
        GuardrailsRuntimeConfig {
            instructions_file: self.guardrails.instructions_file,
            rules_file: PathBuf::from(self.guardrails.rules_file.as_str()),
            assistant_config_file: self
                .guardrails
                .assistant_config_file
                .as_deref()
                .map(PathBuf::from),
            cli_binary: self.guardrails.cli_binary.clone(),
        }
    }

    pub fn git_runtime(&self) -> GitRuntimeConfig {
        GitRuntimeConfig {
            binary: self.git.binary.clone(),
            watch_interval: Duration::from_millis(self.git.watch_interval_ms),
        }
    }
}

pub fn load_from_env() -> Result<CloudSyncConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<CloudSyncConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("cloudsync").join("config.toml"))
}

pub fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_CLOUDSYNC_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "CLOUDSYNC_CONFIG contained invalid UTF-8",
        )),
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

fn default_api_token_env() -> String {
    DEFAULT_API_TOKEN_ENV.to_owned()
}

fn default_retry_interval_secs() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_debounce_secs() -> u64 {
    DEFAULT_DEBOUNCE_SECS
}

fn default_repository_population_timeout_secs() -> u64 {
    DEFAULT_REPOSITORY_POPULATION_TIMEOUT_SECS
}

fn default_pull_request_fetch_limit() -> u32 {
    DEFAULT_PULL_REQUEST_FETCH_LIMIT
}

fn default_rules_file() -> String {
    DEFAULT_RULES_FILE.to_owned()
}

fn default_cli_binary() -> String {
    DEFAULT_CLI_BINARY.to_owned()
}

fn default_git_binary() -> String {
    DEFAULT_GIT_BINARY.to_owned()
}

fn default_git_watch_interval_ms() -> u64 {
    DEFAULT_GIT_WATCH_INTERVAL_MS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfigToml {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_token_env")]
    pub token_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ApiConfigToml {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            token_env: default_api_token_env(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfigToml {
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_repository_population_timeout_secs")]
    pub repository_population_timeout_secs: u64,
    #[serde(default = "default_pull_request_fetch_limit")]
    pub pull_request_fetch_limit: u32,
}

impl Default for SyncConfigToml {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval_secs(),
            max_attempts: default_max_attempts(),
            debounce_secs: default_debounce_secs(),
            repository_population_timeout_secs: default_repository_population_timeout_secs(),
            pull_request_fetch_limit: default_pull_request_fetch_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardrailsConfigToml {
    #[serde(default)]
    pub instructions_file: InstructionsFileMode,
    #[serde(default = "default_rules_file")]
    pub rules_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_config_file: Option<String>,
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
}

impl Default for GuardrailsConfigToml {
    fn default() -> Self {
        Self {
            instructions_file: InstructionsFileMode::default(),
            rules_file: default_rules_file(),
            assistant_config_file: None,
            cli_binary: default_cli_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitConfigToml {
    #[serde(default = "default_git_binary")]
    pub binary: String,
    #[serde(default = "default_git_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

impl Default for GitConfigToml {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            watch_interval_ms: default_git_watch_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfigToml {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfigToml {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file: None,
        }
    }
}

fn persist_config(path: &Path, config: &CloudSyncConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize CLOUDSYNC_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write CLOUDSYNC_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<CloudSyncConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for CLOUDSYNC_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = CloudSyncConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read CLOUDSYNC_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: CloudSyncConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse CLOUDSYNC_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    if normalize_config(&mut config) {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut CloudSyncConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.api.base_url, default_api_base_url());
    let trimmed = config.api.base_url.trim_end_matches('/').len();
    if trimmed != config.api.base_url.len() {
        config.api.base_url.truncate(trimmed);
        changed = true;
    }
    changed |= normalize_non_empty_string(&mut config.api.token_env, default_api_token_env());
    changed |= normalize_optional_string(&mut config.api.token);

    if config.sync.retry_interval_secs == 0 {
        config.sync.retry_interval_secs = default_retry_interval_secs();
        changed = true;
    }
    if config.sync.debounce_secs == 0 {
        config.sync.debounce_secs = default_debounce_secs();
        changed = true;
    }
    if config.sync.repository_population_timeout_secs == 0 {
        config.sync.repository_population_timeout_secs =
            default_repository_population_timeout_secs();
        changed = true;
    }
    let clamped = config
        .sync
        .pull_request_fetch_limit
        .clamp(1, MAX_PULL_REQUEST_FETCH_LIMIT);
    if clamped != config.sync.pull_request_fetch_limit {
        config.sync.pull_request_fetch_limit = clamped;
        changed = true;
    }

    changed |= normalize_non_empty_string(&mut config.guardrails.rules_file, default_rules_file());
    changed |= normalize_optional_string(&mut config.guardrails.assistant_config_file);
    changed |= normalize_non_empty_string(&mut config.guardrails.cli_binary, default_cli_binary());

    changed |= normalize_non_empty_string(&mut config.git.binary, default_git_binary());
    if config.git.watch_interval_ms < MIN_GIT_WATCH_INTERVAL_MS {
        config.git.watch_interval_ms = MIN_GIT_WATCH_INTERVAL_MS;
        changed = true;
    }

    changed |= normalize_non_empty_string(&mut config.logging.filter, default_log_filter());
    changed |= normalize_optional_string(&mut config.logging.file);

    changed
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    let Some(current) = value.as_ref() else {
        return false;
    };
    let trimmed = current.trim();
    if trimmed.is_empty() {
        *value = None;
        return true;
    }
    if trimmed != current {
        *value = Some(trimmed.to_owned());
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<F>(vars: &[(&str, Option<&str>)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = env_lock().lock().expect("env lock");
        let backup = vars
            .iter()
            .map(|(name, _)| ((*name).to_owned(), std::env::var(name).ok()))
            .collect::<Vec<_>>();

        for (name, value) in vars {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }

        test();

        for (name, value) in backup {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "cloudsync-config-{prefix}-{nanos}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn remove_temp_path(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    fn write_config_file(path: &Path, raw: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture config parent");
        }
        std::fs::write(path, raw.as_bytes()).expect("write fixture config");
    }

    #[test]
    fn load_from_env_creates_default_config_when_missing() {
        let home = unique_temp_dir("home-defaults");
        let expected = home.join(".config").join("cloudsync").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_CLOUDSYNC_CONFIG, None),
            ],
            || {
                let config = load_from_env().expect("load defaults");
                assert_eq!(config, CloudSyncConfig::default());
                assert_eq!(config.sync_timings(), SyncTimings::default());
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn load_from_env_honors_explicit_config_path() {
        let home = unique_temp_dir("home-explicit-path");
        let root = unique_temp_dir("explicit-path");
        let explicit = root.join("nested").join("custom.toml");
        let default = home.join(".config").join("cloudsync").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (
                    ENV_CLOUDSYNC_CONFIG,
                    Some(explicit.to_str().expect("config path")),
                ),
            ],
            || {
                let config = load_from_env().expect("load explicit path config");
                assert!(explicit.exists());
                assert!(!default.exists());
                assert_eq!(config.api.token_env, "CODACY_API_TOKEN");
            },
        );

        remove_temp_path(&home);
        remove_temp_path(&root);
    }

    #[test]
    fn load_from_env_treats_blank_config_path_as_unset() {
        let home = unique_temp_dir("home-blank-path");
        let expected = home.join(".config").join("cloudsync").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_CLOUDSYNC_CONFIG, Some("  ")),
            ],
            || {
                load_from_env().expect("load config from default path");
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn partial_config_fills_defaults_and_reads_overrides() {
        let root = unique_temp_dir("partial");
        let path = root.join("config.toml");
        write_config_file(
            &path,
            r#"
[sync]
retry_interval_secs = 30
max_attempts = 2

[guardrails]
instructions_file = "automatic"
assistant_config_file = "/tmp/assistant.json"
"#,
        );

        let config = load_from_path(&path).expect("load partial config");
        let timings = config.sync_timings();
        assert_eq!(timings.retry_interval, Duration::from_secs(30));
        assert_eq!(timings.max_attempts, 2);
        assert_eq!(timings.debounce, Duration::from_secs(10));
        assert_eq!(timings.pull_request_fetch_limit, 100);

        let guardrails = config.guardrails_runtime();
        assert_eq!(guardrails.instructions_file, InstructionsFileMode::Automatic);
        assert_eq!(
            guardrails.assistant_config_file,
            Some(PathBuf::from("/tmp/assistant.json"))
        );
        assert_eq!(guardrails.rules_file, PathBuf::from(".cloudsync/rules.md"));

        remove_temp_path(&root);
    }

    #[test]
    fn normalization_clamps_values_and_persists_them() {
        let root = unique_temp_dir("normalize");
        let path = root.join("config.toml");
        write_config_file(
            &path,
            r#"
[api]
base_url = "https://api.example.test/v3/"
token = "   "

[sync]
retry_interval_secs = 0
pull_request_fetch_limit = 500

[git]
binary = "  "
watch_interval_ms = 5
"#,
        );

        let config = load_from_path(&path).expect("load config");
        assert_eq!(config.api.base_url, "https://api.example.test/v3");
        assert_eq!(config.api.token, None);
        assert_eq!(config.sync.retry_interval_secs, 120);
        assert_eq!(config.sync.pull_request_fetch_limit, 100);
        assert_eq!(config.git.binary, "git");
        assert_eq!(
            config.git_runtime().watch_interval,
            Duration::from_millis(100)
        );

        let persisted = std::fs::read_to_string(&path).expect("read persisted config");
        assert!(persisted.contains("pull_request_fetch_limit = 100"));
        assert!(!persisted.contains("token ="));

        remove_temp_path(&root);
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let root = unique_temp_dir("invalid");
        let path = root.join("config.toml");
        write_config_file(&path, "[sync\nretry_interval_secs = ");

        let err = load_from_path(&path).expect_err("invalid config should fail");
        assert!(err.to_string().contains("Failed to parse CLOUDSYNC_CONFIG"));

        remove_temp_path(&root);
    }
}
