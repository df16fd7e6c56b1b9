//! pagesync-check: one-shot content store diagnostics.
//!
//! Verifies that the content table exists and round-trips a write, and
//! reports the watermark configuration if present. Intended for setup
//! verification, not for the serving path.

use chrono::Utc;
use clap::Parser;
use pagesync::config::{CheckArgs, StoreConfig};
use pagesync::content::{ContentPath, ContentTree};
use pagesync::store::{ContentStore, RestContentStore};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CheckArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let mut config = StoreConfig::new(&args.store_url, &args.store_key);
    config.bucket = args.bucket.clone();
    let store = RestContentStore::new(config)?;

    println!("checking content store at {}", args.store_url);

    match store.read_content().await {
        Some(tree) => println!("  content row: present ({} paths)", tree.len()),
        None => println!("  content row: missing (not yet initialized, or table absent)"),
    }

    // Round-trip a diagnostic timestamp without clobbering real content.
    let mut tree = store.read_content().await.unwrap_or_else(ContentTree::new);
    let check_path = ContentPath::parse("diagnostics.last_check")?;
    let stamp = json!(Utc::now().timestamp_millis());
    tree.set(check_path.clone(), stamp.clone());

    if !store.write_content(&tree).await {
        println!("  write: FAILED (schema missing or store unreachable)");
        std::process::exit(1);
    }

    let readback = store.read_content().await;
    let ok = readback
        .as_ref()
        .and_then(|t| t.get(&check_path))
        .is_some_and(|v| *v == stamp);
    println!("  write round-trip: {}", if ok { "ok" } else { "MISMATCH" });

    match store.read_watermark().await {
        Some(settings) => println!("  watermark settings: {:?}", settings),
        None => println!("  watermark settings: not configured"),
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
