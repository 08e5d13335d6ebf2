//! Configuration module for LineWatch.
//!
//! Server settings come from environment variables with sensible defaults;
//! the monitored sites come from a JSON file.

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::breaker::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT};
use crate::db::StorageBackend;
use crate::probe::ProbeOptions;
use crate::site::Site;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid sites file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// "sqlite" or "memory" (default: "sqlite")
    pub storage: String,
    /// Path to the SQLite database file (default: "linewatch.db")
    pub db_path: String,
    /// Entries kept by the memory backend (default: 1000)
    pub memory_capacity: usize,
    /// Path to the JSON site list (default: "sites.json")
    pub sites_path: String,
    /// Probe interval for sites that do not set one (default: 30s)
    pub default_interval: Duration,
    /// Overall timeout for one probe round (default: 5s)
    pub probe_timeout: Duration,
    /// Echo requests per round (default: 3)
    pub packet_count: u32,
    /// Payload bytes per echo request (default: 56)
    pub packet_size: usize,
    /// Consecutive failures that open a line's breaker (default: 3)
    pub breaker_threshold: u32,
    /// Time an open breaker waits before a trial probe (default: 60s)
    pub breaker_reset: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            storage: "sqlite".to_string(),
            db_path: "linewatch.db".to_string(),
            memory_capacity: 1000,
            sites_path: "sites.json".to_string(),
            default_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            packet_count: 3,
            packet_size: 56,
            breaker_threshold: DEFAULT_FAILURE_THRESHOLD,
            breaker_reset: DEFAULT_RESET_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LINEWATCH_HTTP_PORT`
    /// - `LINEWATCH_STORAGE` (`sqlite` or `memory`)
    /// - `LINEWATCH_DB_PATH`
    /// - `LINEWATCH_MEMORY_CAPACITY`
    /// - `LINEWATCH_SITES_FILE`
    /// - `LINEWATCH_DEFAULT_INTERVAL` (seconds)
    /// - `LINEWATCH_PROBE_TIMEOUT` (seconds)
    /// - `LINEWATCH_PACKET_COUNT`
    /// - `LINEWATCH_PACKET_SIZE`
    /// - `LINEWATCH_BREAKER_THRESHOLD`
    /// - `LINEWATCH_BREAKER_RESET` (seconds)
    ///
    /// Unparseable values are ignored with a warning.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        set_parsed(&lookup, "LINEWATCH_HTTP_PORT", &mut cfg.http_port);
        if let Some(storage) = lookup("LINEWATCH_STORAGE") {
            cfg.storage = storage.to_lowercase();
        }
        if let Some(db_path) = lookup("LINEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        set_parsed(&lookup, "LINEWATCH_MEMORY_CAPACITY", &mut cfg.memory_capacity);
        if let Some(sites_path) = lookup("LINEWATCH_SITES_FILE") {
            cfg.sites_path = sites_path;
        }
        set_secs(&lookup, "LINEWATCH_DEFAULT_INTERVAL", &mut cfg.default_interval);
        set_secs(&lookup, "LINEWATCH_PROBE_TIMEOUT", &mut cfg.probe_timeout);
        set_parsed(&lookup, "LINEWATCH_PACKET_COUNT", &mut cfg.packet_count);
        set_parsed(&lookup, "LINEWATCH_PACKET_SIZE", &mut cfg.packet_size);
        set_parsed(&lookup, "LINEWATCH_BREAKER_THRESHOLD", &mut cfg.breaker_threshold);
        set_secs(&lookup, "LINEWATCH_BREAKER_RESET", &mut cfg.breaker_reset);

        cfg
    }

    pub fn storage_backend(&self) -> Result<StorageBackend, ConfigError> {
        match self.storage.as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite {
                path: PathBuf::from(&self.db_path),
            }),
            "memory" => Ok(StorageBackend::Memory {
                capacity: self.memory_capacity,
            }),
            other => Err(ConfigError::Invalid(format!("unknown storage backend: {}", other))),
        }
    }

    pub fn probe_options(&self) -> ProbeOptions {
        let defaults = ProbeOptions::default();
        ProbeOptions {
            count: if self.packet_count == 0 {
                defaults.count
            } else {
                self.packet_count
            },
            size: self.packet_size,
            timeout: if self.probe_timeout.is_zero() {
                defaults.timeout
            } else {
                self.probe_timeout
            },
        }
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Ignoring invalid {}={}", key, raw),
        }
    }
}

fn set_secs<F>(lookup: &F, key: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs_f64();
    set_parsed(lookup, key, &mut secs);
    if secs.is_finite() && secs >= 0.0 {
        *target = Duration::from_secs_f64(secs);
    } else {
        tracing::warn!("Ignoring out of range {}", key);
    }
}

#[derive(Debug, Deserialize)]
struct SitesFile {
    sites: Vec<Site>,
}

/// Read and validate the site list.
pub fn load_sites<P: AsRef<Path>>(path: P) -> Result<Vec<Site>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sites(&raw)
}

pub fn parse_sites(raw: &str) -> Result<Vec<Site>, ConfigError> {
    let file: SitesFile = serde_json::from_str(raw)?;

    let mut ids = HashSet::new();
    for site in &file.sites {
        if site.id.trim().is_empty() {
            return Err(ConfigError::Invalid("site with empty id".to_string()));
        }
        if site.primary_ip.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "site {} has no primary address",
                site.id
            )));
        }
        if !ids.insert(site.id.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate site id: {}", site.id)));
        }
    }

    Ok(file.sites)
}
