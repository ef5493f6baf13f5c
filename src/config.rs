//! Configuration loading from `.env` files.

use std::env;

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Relay URLs to keep connections open to.
    pub relays: Vec<String>,
    /// Pubkeys (hex) whose notes and profiles are followed.
    pub following: Vec<String>,
    /// Optional hex secret key; a fresh identity is generated when absent.
    pub secret_key: Option<String>,
    /// Optional SOCKS5 proxy (host:port) for relay connections.
    pub socks_proxy: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        let following = csv_strings(env::var("FOLLOWING").unwrap_or_default());
        let secret_key = env::var("SECRET_KEY").ok().filter(|s| !s.is_empty());
        let socks_proxy = env::var("SOCKS_PROXY").ok().filter(|s| !s.is_empty());
        Ok(Self {
            relays,
            following,
            secret_key,
            socks_proxy,
        })
    }
}

/// Split a comma-separated string into trimmed, non-empty values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    input
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        })
        .collect()
}
