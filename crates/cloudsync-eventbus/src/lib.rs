//! Topic-based publish/fanout for controller events.

pub mod bus;
pub mod envelope;
pub mod event;

pub use bus::{
    SyncEventBus, SyncEventBusConfig, DEFAULT_GLOBAL_BUFFER_CAPACITY,
    DEFAULT_TOPIC_BUFFER_CAPACITY,
};
pub use envelope::SyncEventEnvelope;
pub use event::{Notice, NoticeLevel, SyncEvent, SyncEventTopic};
