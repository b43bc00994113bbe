//! session-probe: checks what a session would start with on this machine.
//!
//! Loads configuration (a JSON file path as the only argument, otherwise the
//! environment), fetches ICE servers and inspects the recording store, then
//! prints a JSON report.

use anyhow::Context;
use podcast_session_core::{IceConfigProvider, RecordingEngine, SessionCoreConfig};
use serde_json::json;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    podcast_session_core::init_tracing("podcast_session_core=info,session_probe=info");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => SessionCoreConfig::from_json_file(&path)
            .with_context(|| format!("failed to load configuration from {:?}", path))?,
        None => {
            let config = SessionCoreConfig::from_env();
            config.validate().context("invalid configuration")?;
            config
        }
    };
    tracing::info!("Starting session-probe v{}", env!("CARGO_PKG_VERSION"));

    let auth_token = std::env::var("SESSION_AUTH_TOKEN").ok();
    let ice = IceConfigProvider::from_config(&config.ice);
    let servers = ice.refresh(auth_token.as_deref()).await;

    let engine = RecordingEngine::from_config(config.recording.clone());
    engine.initialize().await.context("failed to open the recording store")?;
    let storage = engine.storage_usage().await.context("failed to read storage usage")?;
    let can_record = storage.available_space >= config.recording.storage_safety_margin_bytes;

    // Credentials stay out of the report
    let ice_urls: Vec<&String> = servers.servers.iter().flat_map(|s| s.urls.iter()).collect();
    let report = json!({
        "ice": {
            "origin": servers.origin,
            "fetchedAt": servers.fetched_at,
            "hasRelay": servers.has_relay(),
            "urls": ice_urls,
        },
        "storage": storage,
        "canRecord": can_record,
        "recording": {
            "dir": config.recording.storage_dir,
            "mimeType": config.recording.mime_type,
            "chunkIntervalMs": config.recording.chunk_interval.as_millis() as u64,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
