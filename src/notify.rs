//! Status/notification surface: maps sync status transitions to
//! user-facing toasts.
//!
//! Pure derived view. The only state is the previous status and the live
//! toast queue; toasts self-expire after a fixed duration, oldest-first.

use crate::sync::SyncStatus;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default toast lifetime.
pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing notification.
#[derive(Debug, Clone)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    created_at: Instant,
}

impl Toast {
    fn new(level: ToastLevel, message: impl Into<String>, now: Instant) -> Self {
        Self {
            level,
            message: message.into(),
            created_at: now,
        }
    }

    pub fn expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// Derives toasts from sync status transitions.
#[derive(Debug)]
pub struct StatusNotifier {
    previous: Option<SyncStatus>,
    toasts: VecDeque<Toast>,
    ttl: Duration,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOAST_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            previous: None,
            toasts: VecDeque::new(),
            ttl,
        }
    }

    /// Feed a status observation; pushes a toast when the transition
    /// warrants one.
    pub fn observe(&mut self, status: SyncStatus, now: Instant) {
        self.expire(now);

        let previous = self.previous.replace(status);
        if previous == Some(status) {
            return;
        }

        let toast = match (previous, status) {
            // Recovery is worth celebrating; initial sync is not a recovery.
            (Some(SyncStatus::Offline) | Some(SyncStatus::Error), SyncStatus::Synced) => Some(
                Toast::new(ToastLevel::Success, "connectivity restored", now),
            ),
            (Some(SyncStatus::Synced) | Some(SyncStatus::Syncing), SyncStatus::Offline) => {
                Some(Toast::new(
                    ToastLevel::Warning,
                    "offline; edits are kept locally",
                    now,
                ))
            }
            (_, SyncStatus::Error) => Some(Toast::new(
                ToastLevel::Error,
                "saving changes failed",
                now,
            )),
            // Syncing is shown as a badge, not a toast.
            _ => None,
        };

        if let Some(toast) = toast {
            self.toasts.push_back(toast);
        }
    }

    /// Drop expired toasts, oldest-first.
    pub fn expire(&mut self, now: Instant) {
        while let Some(front) = self.toasts.front() {
            if front.expired(now, self.ttl) {
                self.toasts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Currently visible toasts, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}
