use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);
pub const DEFAULT_REPOSITORY_POPULATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PULL_REQUEST_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub retry_interval: Duration,
    pub max_attempts: u32,
    pub debounce: Duration,
    pub repository_population_timeout: Duration,
    pub pull_request_fetch_limit: u32,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            debounce: DEFAULT_DEBOUNCE,
            repository_population_timeout: DEFAULT_REPOSITORY_POPULATION_TIMEOUT,
            pull_request_fetch_limit: DEFAULT_PULL_REQUEST_FETCH_LIMIT,
        }
    }
}
