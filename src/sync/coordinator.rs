//! Sync coordinator: the single writer of the UI-visible content tree.
//!
//! Merges local edits, store reads, and relay messages into one coherent
//! view. Local edits are persisted to the content store and broadcast via
//! the relay; remote-origin edits are applied with broadcast suppressed so
//! they are never re-emitted (no echo ping-pong between sessions).
//! Conflict policy is last-write-wins at path granularity.

use super::{ConnectionEvent, EditSink, SyncStatus};
use crate::content::{ContentPath, ContentTree};
use crate::store::{validate_asset, ContentStore, UploadError};
use crate::ws::protocol::SyncMessage;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

struct CoordinatorState {
    tree: ContentTree,
    /// Paths edited locally since the last successful durable write.
    dirty: HashSet<ContentPath>,
}

pub struct SyncCoordinator {
    state: RwLock<CoordinatorState>,
    store: Arc<dyn ContentStore>,
    outbound: Arc<dyn EditSink>,
    status_tx: watch::Sender<SyncStatus>,
    /// Whether the relay link is currently open. `synced` is only reported
    /// while it is; with the link down a durable write still leaves the
    /// session `offline`.
    link_up: AtomicBool,
    remote_admin: AtomicBool,
    peer_count: AtomicUsize,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn ContentStore>, outbound: Arc<dyn EditSink>) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Offline);
        Self {
            state: RwLock::new(CoordinatorState {
                tree: ContentTree::new(),
                dirty: HashSet::new(),
            }),
            store,
            outbound,
            status_tx,
            link_up: AtomicBool::new(false),
            remote_admin: AtomicBool::new(false),
            peer_count: AtomicUsize::new(0),
        }
    }

    /// Watch the derived sync status.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Snapshot of the current content view.
    pub async fn get_content(&self) -> ContentTree {
        self.state.read().await.tree.clone()
    }

    /// Whether any remote session has announced admin mode.
    pub fn remote_admin_active(&self) -> bool {
        self.remote_admin.load(Ordering::Relaxed)
    }

    /// Total connected sessions, as last reported by the relay.
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Relaxed)
    }

    /// Seed the tree from the durable store. Returns whether a snapshot
    /// was found; `false` means "use local/default content".
    pub async fn load_initial(&self) -> bool {
        match self.store.read_content().await {
            Some(snapshot) => {
                let mut state = self.state.write().await;
                state.tree = snapshot;
                true
            }
            None => false,
        }
    }

    /// Apply an edit to the content view.
    ///
    /// For local edits (`suppress_broadcast = false`) the change is
    /// broadcast to peers and written to the durable store. For
    /// remote-origin edits the caller passes `suppress_broadcast = true`:
    /// the tree is updated and nothing else happens. The originating
    /// session owns durability, and re-emitting would echo forever.
    pub async fn update_content(
        &self,
        path: ContentPath,
        value: Value,
        suppress_broadcast: bool,
    ) {
        let snapshot = {
            let mut state = self.state.write().await;
            state.tree.set(path.clone(), value.clone());
            if suppress_broadcast {
                None
            } else {
                state.dirty.insert(path.clone());
                Some(state.tree.clone())
            }
        };

        let Some(snapshot) = snapshot else {
            return;
        };

        self.outbound.send_message(SyncMessage::ContentUpdate {
            path,
            value,
            client_id: self.outbound.session_id(),
            timestamp: Utc::now().timestamp_millis(),
        });

        self.persist(snapshot).await;
    }

    /// Upload an image and apply its public URL at `path`.
    ///
    /// Validation failures are reported synchronously, before any network
    /// call. A store-side upload failure returns `Ok(None)`.
    pub async fn upload_image(
        &self,
        path: ContentPath,
        bytes: &[u8],
    ) -> Result<Option<String>, UploadError> {
        validate_asset(bytes)?;

        let Some(url) = self.store.upload_asset(bytes, path.as_str()).await else {
            self.status_tx.send_replace(SyncStatus::Error);
            return Ok(None);
        };

        let snapshot = {
            let mut state = self.state.write().await;
            state.tree.set(path.clone(), Value::String(url.clone()));
            state.dirty.insert(path.clone());
            state.tree.clone()
        };

        self.outbound.send_message(SyncMessage::ImageUpload {
            path,
            image_url: url.clone(),
            client_id: self.outbound.session_id(),
            timestamp: Utc::now().timestamp_millis(),
        });

        self.persist(snapshot).await;
        Ok(Some(url))
    }

    /// Announce this session's admin state to peers. Not persisted.
    pub fn set_admin(&self, is_admin: bool) {
        self.outbound.send_message(SyncMessage::AdminStatus {
            is_admin,
            client_id: self.outbound.session_id(),
        });
    }

    /// Apply a message received from the relay to the local view.
    pub async fn apply_remote(&self, msg: SyncMessage) {
        match msg {
            SyncMessage::ContentUpdate { path, value, .. } => {
                self.update_content(path, value, true).await;
            }
            SyncMessage::ImageUpload {
                path, image_url, ..
            } => {
                self.update_content(path, Value::String(image_url), true)
                    .await;
            }
            SyncMessage::GalleryUpdate { action, data, .. } => {
                debug!(action, "applying gallery update");
                if let Ok(path) = ContentPath::parse("gallery") {
                    self.update_content(path, data, true).await;
                }
            }
            SyncMessage::AdminLogin { client_id } => {
                debug!(?client_id, "remote admin login");
                self.remote_admin.store(true, Ordering::Relaxed);
            }
            SyncMessage::AdminStatus { is_admin, .. } => {
                self.remote_admin.store(is_admin, Ordering::Relaxed);
            }
            SyncMessage::ClientJoined { total_clients }
            | SyncMessage::ClientLeft { total_clients } => {
                debug!(total_clients, "peer count changed");
                self.peer_count.store(total_clients, Ordering::Relaxed);
            }
            SyncMessage::Connection { client_id } => {
                debug!(client_id, "relay handshake");
            }
            SyncMessage::Ping | SyncMessage::Pong => {}
        }
    }

    /// React to a link lifecycle transition.
    pub async fn handle_link_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(msg) => self.apply_remote(msg).await,
            ConnectionEvent::Connected => {
                self.link_up.store(true, Ordering::Relaxed);
                self.reconcile().await;
            }
            ConnectionEvent::Disconnected => {
                self.link_up.store(false, Ordering::Relaxed);
                self.status_tx.send_replace(SyncStatus::Offline);
            }
            ConnectionEvent::ConnectionError => {
                warn!("relay link gave up; continuing in local-only mode");
                self.link_up.store(false, Ordering::Relaxed);
                self.status_tx.send_replace(SyncStatus::Offline);
            }
        }
    }

    /// Consume link events until the channel closes.
    pub async fn drive(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_link_event(event).await;
        }
    }

    /// On reconnect: flush pending local edits if any, otherwise refresh
    /// from the store, keeping unsaved local edits on top of the fresh
    /// snapshot.
    async fn reconcile(&self) {
        let pending = {
            let state = self.state.read().await;
            if state.dirty.is_empty() {
                None
            } else {
                Some(state.tree.clone())
            }
        };

        match pending {
            Some(snapshot) => self.persist(snapshot).await,
            None => {
                self.status_tx.send_replace(SyncStatus::Syncing);
                if let Some(fresh) = self.store.read_content().await {
                    let mut guard = self.state.write().await;
                    let state = &mut *guard;
                    state.tree.merge_snapshot(fresh, &state.dirty);
                }
                self.status_tx.send_replace(SyncStatus::Synced);
            }
        }
    }

    async fn persist(&self, snapshot: ContentTree) {
        self.status_tx.send_replace(SyncStatus::Syncing);
        if self.store.write_content(&snapshot).await {
            self.state.write().await.dirty.clear();
            // Durable, but only "synced" while the relay link is open;
            // otherwise peers have not seen the edit yet.
            let status = if self.link_up.load(Ordering::Relaxed) {
                SyncStatus::Synced
            } else {
                SyncStatus::Offline
            };
            self.status_tx.send_replace(status);
        } else {
            warn!("durable write failed; keeping edits locally");
            self.status_tx.send_replace(SyncStatus::Error);
        }
    }
}
