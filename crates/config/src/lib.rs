//! Configuration loading for vision.
//!
//! Settings come from an optional `vision.toml` file overlaid with
//! environment variables. Env always wins, so deployments can keep a
//! checked-in file for the stable parts and inject secrets/sizes per host.

pub mod schema;

pub use schema::{
    CapturePoolConfig, GatewayConfig, StorageConfig, VaultConfig, VisionConfig, WorkerPoolConfig,
};

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load configuration from an optional TOML file, then apply env overrides.
pub fn load(path: Option<&Path>) -> Result<VisionConfig, Error> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let raw = std::fs::read_to_string(p)?;
            tracing::debug!(path = %p.display(), "loaded config file");
            toml::from_str(&raw)?
        },
        Some(p) => {
            tracing::warn!(path = %p.display(), "config file not found, using defaults");
            VisionConfig::default()
        },
        None => VisionConfig::default(),
    };

    config.apply_env();
    Ok(config)
}
