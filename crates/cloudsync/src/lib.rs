//! Facade over the cloudsync workspace for embedders that want the controller
//! and its production collaborators from one dependency.

pub use cloudsync_config as config;
pub use cloudsync_core as core;
pub use cloudsync_eventbus as eventbus;
pub use cloudsync_timers as timers;
pub use integration_analysis_api as analysis_api;
pub use integration_git as git;

pub use cloudsync_controller::{
    BranchIssuesCache, BranchIssuesSnapshot, CloudSync, FileGuardrails, SyncDependencies,
    SyncSettings, TimerPurpose, TrackedPullRequest, TrackedPullRequestFactory, TracingTelemetry,
};
pub use cloudsync_core::{BranchState, PullRequestState, SyncState, SyncStates, SyncTimings};
pub use cloudsync_eventbus::{SyncEvent, SyncEventEnvelope, SyncEventTopic};
