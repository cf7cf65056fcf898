//! Keyed one-shot timers and cancellable listener tasks.

pub mod subscription;
pub mod timer_set;

pub use subscription::Subscription;
pub use timer_set::{RetryTimerSet, TimerId};
