//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use missive_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path where uploaded media is stored.
    /// Env: `MEDIA_ROOT`
    /// Default: `./media`
    pub media_root: PathBuf,

    /// Maximum media upload size in bytes.
    /// Env: `MAX_MEDIA_SIZE`
    /// Default: 25 MiB
    pub max_media_size: usize,

    /// Base URL clients use to reach this server, for download links.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Missive Node"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            media_root: PathBuf::from("./media"),
            max_media_size: 25 * 1024 * 1024, // 25 MiB
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            instance_name: "Missive Node".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("MEDIA_ROOT") {
            config.media_root = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_MEDIA_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_media_size = n;
            } else {
                tracing::warn!(value = %val, "Invalid MAX_MEDIA_SIZE, using default");
            }
        }

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
