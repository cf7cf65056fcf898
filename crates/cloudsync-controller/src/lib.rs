//! Async driver that keeps the published sync states, events and timers in
//! step with one opened repository.

mod branch;
mod controller;
mod guardrails;
mod issues;
mod propagation;
mod publisher;
mod pull_request;
mod resolution;
mod session;
mod settings;
mod telemetry;

#[cfg(test)]
mod test_support;

pub use controller::CloudSync;
pub use guardrails::FileGuardrails;
pub use issues::{BranchIssuesCache, BranchIssuesSnapshot};
pub use pull_request::{TrackedPullRequest, TrackedPullRequestFactory};
pub use settings::{SyncDependencies, SyncSettings, TimerPurpose};
pub use telemetry::TracingTelemetry;
