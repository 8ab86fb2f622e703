//! # missive-server
//!
//! Backend node for Missive.
//!
//! This binary provides:
//! - the in-process **document database** behind every store
//! - the **notification dispatcher** that turns each stored message into a
//!   push and a delivery receipt
//! - **media storage** for chat attachments (files stored as opaque bytes
//!   on disk)
//! - a **REST API** (axum) for health checks and media upload/download

mod api;
mod config;
mod dispatcher;
mod error;
mod media;
mod push;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use missive_store::{ConversationStore, Database, MessageStore, UserDirectory};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::media::MediaStore;
use crate::push::LogPush;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,missive_server=debug")),
        )
        .init();

    info!("Starting Missive server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Document database and the stores that share it
    let db = Database::new();
    let conversations = ConversationStore::new(db.clone());
    let messages = MessageStore::new(db.clone());
    let directory = UserDirectory::new(db.clone());

    // Media store (creates the directory if missing)
    let media = Arc::new(
        MediaStore::new(
            config.media_root.clone(),
            config.max_media_size,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let app_state = AppState {
        media,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn the notification dispatcher
    // -----------------------------------------------------------------------
    let dispatcher =
        NotificationDispatcher::new(conversations, messages, directory, Arc::new(LogPush));
    tokio::spawn(dispatcher.run());

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
