use serde::Serialize;

use crate::event::SyncEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEventEnvelope {
    pub sequence: u64,
    pub published_at_nanos: u64,
    pub event: SyncEvent,
}
