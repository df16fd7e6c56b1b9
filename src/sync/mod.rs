//! Client-side synchronization: the relay link and the coordinator that
//! reconciles local edits, store reads, and relay messages into one
//! coherent content view.

pub mod connection;
pub mod coordinator;

use crate::ws::protocol::SyncMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use connection::{ConnectionEvent, ConnectionManager, LinkState};
pub use coordinator::SyncCoordinator;

/// Derived connectivity/sync status for the UI. No independent storage;
/// recomputed from link state and store write outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Last write/read succeeded and the relay connection is open.
    Synced,
    /// A write is in flight to the content store.
    Syncing,
    /// No open connection to the relay.
    Offline,
    /// The last content store write failed.
    Error,
}

/// Where the coordinator emits outbound edit messages.
///
/// The connection manager is the production sink; tests plug in a channel.
pub trait EditSink: Send + Sync {
    fn send_message(&self, msg: SyncMessage);

    /// The relay-assigned session id, if known. Stamped onto outbound
    /// messages as their origin.
    fn session_id(&self) -> Option<u64> {
        None
    }
}

impl EditSink for mpsc::UnboundedSender<SyncMessage> {
    fn send_message(&self, msg: SyncMessage) {
        let _ = self.send(msg);
    }
}
