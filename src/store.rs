//! Content store adapter: durable read/write of the editable site content
//! and binary asset uploads, against a PostgREST-style document store plus
//! an object store for binaries.
//!
//! Expected failure modes (missing row, missing schema, network errors)
//! never cross the trait boundary as errors; they degrade to `None`/`false`
//! sentinels so the coordinator can fall back to local-only persistence.

use crate::config::StoreConfig;
use crate::content::ContentTree;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Document-store table holding the keyed JSON rows.
const TABLE: &str = "site_content";
/// Fixed row key for the content blob.
const CONTENT_ROW_KEY: &str = "main";
/// Fixed row key for the watermark display configuration.
const WATERMARK_ROW_KEY: &str = "watermark";

/// Upload size cap, checked before any network call.
pub const MAX_ASSET_BYTES: usize = 5 * 1024 * 1024;

/// Store adapter errors. Only construction can fail loudly; the operation
/// surface degrades to sentinels instead.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Rejection of an asset before upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("asset is {0} bytes, over the {MAX_ASSET_BYTES} byte limit")]
    TooLarge(usize),
    #[error("asset is not a supported image format")]
    NotAnImage,
}

/// Recognized image formats, sniffed from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }
}

/// Validate an asset before any network call: size cap plus image
/// magic-byte sniffing.
pub fn validate_asset(bytes: &[u8]) -> Result<ImageKind, UploadError> {
    if bytes.len() > MAX_ASSET_BYTES {
        return Err(UploadError::TooLarge(bytes.len()));
    }
    sniff_image(bytes).ok_or(UploadError::NotAnImage)
}

fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageKind::Png)
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageKind::Gif)
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else {
        None
    }
}

/// Object path for an upload: logical hint plus a timestamp suffix so
/// repeated uploads to the same logical path never collide.
fn object_path(path_hint: &str, timestamp_millis: i64, kind: ImageKind) -> String {
    format!(
        "{}-{}.{}",
        path_hint.replace('.', "-"),
        timestamp_millis,
        kind.extension()
    )
}

/// Watermark display configuration, stored under its own fixed row key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSettings {
    pub position: WatermarkPosition,
    /// Size as a fraction of the page width
    pub size: f32,
    pub opacity: f32,
    /// Pages the watermark is shown on; empty means all pages
    #[serde(default)]
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

/// Durable storage collaborator for the sync coordinator.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the content blob. `None` means "not yet initialized" or
    /// "store unreachable"; callers use local/default content.
    async fn read_content(&self) -> Option<ContentTree>;

    /// Upsert the content blob. `false` means the write did not become
    /// durable (missing schema, network failure, timeout).
    async fn write_content(&self, tree: &ContentTree) -> bool;

    /// Store a binary asset and return its public URL, or `None` on any
    /// failure. Never leaves partial state behind on failure.
    async fn upload_asset(&self, bytes: &[u8], path_hint: &str) -> Option<String>;

    async fn read_watermark(&self) -> Option<WatermarkSettings>;

    async fn write_watermark(&self, settings: &WatermarkSettings) -> bool;
}

#[derive(Serialize, Deserialize)]
struct ContentRow {
    key: String,
    payload: Value,
}

/// REST adapter over the hosted document + object store.
pub struct RestContentStore {
    config: StoreConfig,
    client: Client,
}

impl RestContentStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    fn row_url(&self, key: &str) -> String {
        format!(
            "{}/rest/v1/{}?key=eq.{}&select=payload",
            self.config.base_url, TABLE, key
        )
    }

    async fn read_row(&self, key: &str) -> Option<Value> {
        let resp = match self.authed(self.client.get(self.row_url(key))).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(key, error = %e, "content store read failed");
                return None;
            }
        };

        if resp.status() == StatusCode::NOT_FOUND {
            warn!(key, "content table not provisioned; using local content");
            return None;
        }
        if !resp.status().is_success() {
            warn!(key, status = %resp.status(), "unexpected store response");
            return None;
        }

        let rows: Vec<ContentRow> = match resp.json().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(key, error = %e, "failed to decode store row");
                return None;
            }
        };

        // An empty result set is "not yet initialized", not an error.
        rows.into_iter().next().map(|row| row.payload)
    }

    async fn write_row(&self, key: &str, payload: Value) -> bool {
        let url = format!("{}/rest/v1/{}", self.config.base_url, TABLE);
        let row = ContentRow {
            key: key.to_string(),
            payload,
        };
        let resp = match self
            .authed(self.client.post(&url))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(key, error = %e, "content store write failed");
                return false;
            }
        };

        if resp.status() == StatusCode::NOT_FOUND {
            warn!(key, "content table not provisioned; write skipped");
            return false;
        }
        if !resp.status().is_success() {
            warn!(key, status = %resp.status(), "store rejected write");
            return false;
        }
        debug!(key, "content row written");
        true
    }
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn read_content(&self) -> Option<ContentTree> {
        let payload = self.read_row(CONTENT_ROW_KEY).await?;
        match serde_json::from_value(payload) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!(error = %e, "stored content blob is not a content tree");
                None
            }
        }
    }

    async fn write_content(&self, tree: &ContentTree) -> bool {
        let payload = match serde_json::to_value(tree) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize content tree");
                return false;
            }
        };
        self.write_row(CONTENT_ROW_KEY, payload).await
    }

    async fn upload_asset(&self, bytes: &[u8], path_hint: &str) -> Option<String> {
        let kind = match validate_asset(bytes) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(path_hint, error = %e, "rejected asset before upload");
                return None;
            }
        };

        let object = object_path(path_hint, Utc::now().timestamp_millis(), kind);
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, self.config.bucket, object
        );

        let resp = match self
            .authed(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, kind.mime())
            .body(bytes.to_vec())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!(path_hint, error = %e, "asset upload failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(path_hint, status = %resp.status(), "object store rejected upload");
            return None;
        }

        Some(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, self.config.bucket, object
        ))
    }

    async fn read_watermark(&self) -> Option<WatermarkSettings> {
        let payload = self.read_row(WATERMARK_ROW_KEY).await?;
        match serde_json::from_value(payload) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(error = %e, "stored watermark row is not valid settings");
                None
            }
        }
    }

    async fn write_watermark(&self, settings: &WatermarkSettings) -> bool {
        let payload = match serde_json::to_value(settings) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize watermark settings");
                return false;
            }
        };
        self.write_row(WATERMARK_ROW_KEY, payload).await
    }
}
