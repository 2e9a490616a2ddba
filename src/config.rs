// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`StoreConfig`] loaded
//! from them once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root of app storage | `./data` |
//! | `VAULT_DIR` | Root of the credential vault | `$DATA_DIR/vault` |
//! | `HOST` | Server bind address | `127.0.0.1` |
//! | `PORT` | Server bind port | `8787` |
//! | `KDF_ITERATIONS` | PBKDF2 iterations per record key | `100000` |
//! | `LOCAL_CACHE_CAPACITY` | LOCAL tier hot-cache entries | `256` |
//! | `RETENTION_SWEEP_SECS` | Retention sweeper interval | `3600` |
//! | `DEFAULT_ROUTE_WHITELIST` | Comma-separated keys (or `prefix*`) allowed the default route | empty |
//! | `DEVICE_USER` | User id that routed SECURE entries belong to | `device` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::crypto::EncryptionEngine;
use crate::storage::paths::DATA_ROOT;

/// Environment variable name for the app storage root.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the credential vault root.
///
/// # Default
/// `$DATA_DIR/vault`
pub const VAULT_DIR_ENV: &str = "VAULT_DIR";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// PBKDF2 iteration count for per-record key derivation.
pub const KDF_ITERATIONS_ENV: &str = "KDF_ITERATIONS";

pub const LOCAL_CACHE_CAPACITY_ENV: &str = "LOCAL_CACHE_CAPACITY";

/// Seconds between retention sweeps.
pub const RETENTION_SWEEP_SECS_ENV: &str = "RETENTION_SWEEP_SECS";

/// Unknown logical keys permitted to fall through to the default LOCAL
/// category. PHI-looking keys are refused regardless.
pub const DEFAULT_ROUTE_WHITELIST_ENV: &str = "DEFAULT_ROUTE_WHITELIST";

pub const DEVICE_USER_ENV: &str = "DEVICE_USER";

/// Logging format: `json` for machine-readable output, anything else pretty.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_LOCAL_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_RETENTION_SWEEP: Duration = Duration::from_secs(3600);
pub const DEFAULT_DEVICE_USER: &str = "device";

/// redb page cache for the record file.
pub const DEFAULT_RECORD_CACHE_BYTES: usize = 16 * 1024 * 1024;

/// Store and server settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub vault_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub kdf_iterations: u32,
    pub local_cache_capacity: usize,
    pub record_cache_bytes: usize,
    pub retention_sweep: Duration,
    pub default_route_whitelist: Vec<String>,
    pub device_user: String,
}

impl StoreConfig {
    /// Defaults rooted at `data_dir`.
    pub fn for_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            vault_dir: data_dir.join("vault"),
            data_dir,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            kdf_iterations: EncryptionEngine::DEFAULT_ITERATIONS,
            local_cache_capacity: DEFAULT_LOCAL_CACHE_CAPACITY,
            record_cache_bytes: DEFAULT_RECORD_CACHE_BYTES,
            retention_sweep: DEFAULT_RETENTION_SWEEP,
            default_route_whitelist: Vec::new(),
            device_user: DEFAULT_DEVICE_USER.to_string(),
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` for variable values. Unparseable values are
    /// logged and replaced by their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(DATA_DIR_ENV).unwrap_or_else(|| DATA_ROOT.to_string());
        let mut config = Self::for_dir(data_dir);

        if let Some(vault_dir) = lookup(VAULT_DIR_ENV) {
            config.vault_dir = PathBuf::from(vault_dir);
        }
        if let Some(host) = lookup(HOST_ENV) {
            config.host = host;
        }
        config.port = parse_or(&lookup, PORT_ENV, config.port);
        config.kdf_iterations = parse_or(&lookup, KDF_ITERATIONS_ENV, config.kdf_iterations);
        if config.kdf_iterations == 0 {
            warn!(var = KDF_ITERATIONS_ENV, "Zero iterations not allowed, using default");
            config.kdf_iterations = EncryptionEngine::DEFAULT_ITERATIONS;
        }
        config.local_cache_capacity =
            parse_or(&lookup, LOCAL_CACHE_CAPACITY_ENV, config.local_cache_capacity);
        let sweep_secs = parse_or(
            &lookup,
            RETENTION_SWEEP_SECS_ENV,
            config.retention_sweep.as_secs(),
        );
        config.retention_sweep = Duration::from_secs(sweep_secs.max(1));
        if let Some(list) = lookup(DEFAULT_ROUTE_WHITELIST_ENV) {
            config.default_route_whitelist = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(user) = lookup(DEVICE_USER_ENV).filter(|u| !u.is_empty()) {
            config.device_user = user;
        }
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.vault_dir, PathBuf::from("./data/vault"));
        assert_eq!(config.bind_addr(), "127.0.0.1:8787");
        assert_eq!(config.kdf_iterations, 100_000);
        assert!(config.default_route_whitelist.is_empty());
        assert_eq!(config.device_user, "device");
    }

    #[test]
    fn reads_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DATA_DIR", "/tmp/hv"),
            ("PORT", "9000"),
            ("KDF_ITERATIONS", "5000"),
            ("RETENTION_SWEEP_SECS", "60"),
            ("DEFAULT_ROUTE_WHITELIST", "last_tab, ui_* ,"),
        ]));
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/hv/vault"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.kdf_iterations, 5000);
        assert_eq!(config.retention_sweep, Duration::from_secs(60));
        assert_eq!(config.default_route_whitelist, vec!["last_tab", "ui_*"]);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("PORT", "eighty"),
            ("KDF_ITERATIONS", "0"),
            ("LOCAL_CACHE_CAPACITY", "-1"),
        ]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.kdf_iterations, EncryptionEngine::DEFAULT_ITERATIONS);
        assert_eq!(config.local_cache_capacity, DEFAULT_LOCAL_CACHE_CAPACITY);
    }
}
