//! Configuration for the relay process, the client link, and the content
//! store adapter.

use clap::Parser;
use std::time::Duration;

/// Arguments for the `pagesync-relay` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "pagesync-relay", about = "WebSocket relay for live content edits")]
pub struct RelayArgs {
    /// Port to listen on
    #[arg(long, env = "PAGESYNC_RELAY_PORT", default_value_t = 3030)]
    pub port: u16,

    /// Path the WebSocket endpoint is served at
    #[arg(long, env = "PAGESYNC_WS_PATH", default_value = "/ws")]
    pub ws_path: String,
}

/// Arguments for the `pagesync-check` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "pagesync-check", about = "One-shot content store diagnostics")]
pub struct CheckArgs {
    /// Content store base URL
    #[arg(long, env = "PAGESYNC_STORE_URL")]
    pub store_url: String,

    /// Content store API key
    #[arg(long, env = "PAGESYNC_STORE_KEY", default_value = "")]
    pub store_key: String,

    /// Object store bucket for uploaded assets
    #[arg(long, env = "PAGESYNC_STORE_BUCKET", default_value = "site-assets")]
    pub bucket: String,
}

/// Settings for the client-side relay link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Relay WebSocket URL (e.g. ws://localhost:3030/ws)
    pub relay_url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_interval: Duration,
    /// Retry bound; exceeding it is a terminal connection error
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping period while connected
    pub heartbeat_interval: Duration,
}

impl LinkConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Settings for the REST content store adapter.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store base URL
    pub base_url: String,
    /// API key, sent as both `apikey` and bearer token
    pub api_key: String,
    /// Object store bucket for uploaded assets
    pub bucket: String,
    /// Request timeout; a timed-out write degrades to a failed write
    /// instead of leaving the sync status stuck in `syncing`
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            bucket: "site-assets".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}
