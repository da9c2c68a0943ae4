use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub transfer: Transfer,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Transfer {
    /// Wait before restarting after the peer reports failure.
    #[serde(default = "default_retry_ms")]
    pub retry_delay_ms: u64,
    /// Wait before re-checking an empty peer set.
    #[serde(default = "default_retry_ms")]
    pub peer_backoff_ms: u64,
    /// Prefer a locally persisted chain over a remote transfer.
    #[serde(default)]
    pub restore: bool,
    /// Ids per list page when serving a transfer.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_retry_ms() -> u64 { 10_000 }
fn default_page_size() -> usize { 100 }
fn default_path() -> String { "journal_data".into() }
fn default_bind() -> String { "127.0.0.1:9101".into() }

impl Default for Transfer {
    fn default() -> Self {
        Transfer {
            retry_delay_ms: default_retry_ms(),
            peer_backoff_ms: default_retry_ms(),
            restore: false,
            page_size: default_page_size(),
            seed: None,
        }
    }
}

impl Default for Storage {
    fn default() -> Self { Storage { path: default_path() } }
}

impl Default for Metrics {
    fn default() -> Self { Metrics { bind: default_bind() } }
}

impl Transfer {
    pub fn retry_delay(&self) -> Duration { Duration::from_millis(self.retry_delay_ms) }
    pub fn peer_backoff(&self) -> Duration { Duration::from_millis(self.peer_backoff_ms) }
}

/// Read the TOML file at `p` and deserialize into `Config`.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("couldn't read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    toml::from_str(text).with_context(|| "invalid TOML in config file".to_string())
}
