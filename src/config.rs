//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - queryjobs.toml (default configuration)
//! - queryjobs.local.toml (git-ignored local overrides)
//! - Environment variables (QUERYJOBS_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # queryjobs.toml
//! workers = 4
//! default_limit = 25
//! sync_wait = 300
//!
//! [output]
//! dir = "/var/lib/queryjobs/output"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERYJOBS_WORKERS=8
//! QUERYJOBS_OUTPUT__DIR=/custom/path
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of worker threads executing queued jobs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Row limit applied when a submission specifies none
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Seconds a synchronous submit may block for completion (0 = unbounded)
    #[serde(default)]
    pub sync_wait: u64,

    /// Output store settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for persisted job payloads (filesystem store)
    pub dir: PathBuf,
}

fn default_workers() -> usize {
    1
}

fn default_limit() -> u64 {
    25
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("./queryjobs-output"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workers: default_workers(),
            default_limit: default_limit(),
            sync_wait: 0,
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("queryjobs.toml"))
            .merge(Toml::file("queryjobs.local.toml"))
            .merge(Env::prefixed("QUERYJOBS_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file plus environment overrides
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("QUERYJOBS_").split("__"))
            .extract()
    }

    /// The synchronous wait bound, if one is configured
    pub fn sync_wait_timeout(&self) -> Option<std::time::Duration> {
        (self.sync_wait > 0).then(|| std::time::Duration::from_secs(self.sync_wait))
    }
}
