//! Per-session state for relay-side WebSocket connections.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Ephemeral session identifier assigned by the relay at connect time.
/// Not stable across reconnects.
pub type SessionId = u64;

/// Hands out session identifiers from a process-wide counter.
#[derive(Debug, Default)]
pub struct SessionIdAllocator {
    next: AtomicU64,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> SessionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Outgoing frame for a session's writer task.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// JSON text frame.
    Frame(String),
    /// Close the connection with a normal-closure code.
    Close,
}

/// A registered relay session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,

    /// Sender for outgoing frames to this session's writer task.
    pub sender: mpsc::Sender<Outgoing>,
}

impl Session {
    pub fn new(id: SessionId, sender: mpsc::Sender<Outgoing>) -> Self {
        Self { id, sender }
    }

    /// Send a frame to this session (non-blocking).
    /// Returns false if the channel is full or closed.
    pub fn try_send(&self, out: Outgoing) -> bool {
        self.sender.try_send(out).is_ok()
    }

    pub fn try_send_frame(&self, text: String) -> bool {
        self.try_send(Outgoing::Frame(text))
    }
}
