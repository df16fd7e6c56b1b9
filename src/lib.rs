//! pagesync: real-time content synchronization for in-place site editing.
//!
//! Authenticated operators edit text and images directly on the live page;
//! edits are persisted to a content store and fanned out to other open
//! sessions through a WebSocket relay. This crate is the sync core: the
//! relay server, the client-side connection manager, the sync coordinator
//! that reconciles local and remote edits, and the store adapter.

pub mod config;
pub mod content;
pub mod notify;
pub mod store;
pub mod sync;
pub mod ws;

pub use content::{ContentPath, ContentTree};
pub use sync::{ConnectionManager, SyncCoordinator, SyncStatus};
pub use ws::{create_router, Relay, SyncMessage};
