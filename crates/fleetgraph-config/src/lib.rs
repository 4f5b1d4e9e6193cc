// crates/fleetgraph-config/src/lib.rs
// ============================================================================
// Crate: fleetgraph-config
// Description: Loads and validates the configuration options recognized by
//              the orchestrator (`spec` §6's configuration table).
// Purpose: Fail closed on any unknown or out-of-range value rather than
//          silently clamping it.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is a TOML file read once at startup (or a
//! [`Config::default`] for tests). The environment variable
//! [`CONFIG_ENV_VAR`] overrides the path a caller passes explicitly. Every
//! configured bound is enforced in [`Config::validate`]; a value outside its
//! documented range fails the
//! load rather than being silently clamped to the nearest legal value.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable that overrides the config path passed to [`Config::load`].
pub const CONFIG_ENV_VAR: &str = "FLEETGRAPH_CONFIG";

/// Maximum configuration file size accepted by [`Config::load`].
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

const LEASE_DURATION_RANGE_SECONDS: (u64, u64) = (30, 60 * 60);
const RESERVATION_TTL_RANGE_SECONDS: (u64, u64) = (60, 86_400);

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`] or was not UTF-8.
    #[error("config file invalid: {0}")]
    Invalid(String),
    /// The config file did not parse as TOML matching [`Config`]'s shape.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value parsed correctly but falls outside its documented bounds.
    #[error("config value out of range: {0}")]
    OutOfRange(String),
}

/// The relational backend dialect a [`Config::database_url`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreDialect {
    /// A local, in-process `SQLite` database. The test/single-node dialect.
    Sqlite,
    /// A server RDBMS reached over the network. The production dialect.
    Postgres,
}

impl StoreDialect {
    /// Infers the dialect from a `database_url`'s scheme, so a deployment
    /// selects its store crate by connection-string prefix rather than a
    /// separate config key.
    #[must_use]
    pub fn from_database_url(database_url: &str) -> Option<Self> {
        if database_url.starts_with("sqlite:") || database_url.starts_with("file:") {
            Some(Self::Sqlite)
        } else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
            Some(Self::Postgres)
        } else {
            None
        }
    }
}

/// Every configuration option recognized by the orchestrator (`spec` §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Relational backend connection string. Dialect is inferred from its
    /// scheme (`sqlite:`/`file:` or `postgres:`/`postgresql:`).
    pub database_url: String,
    /// Location of ordered SQL migrations applied at startup.
    #[serde(default)]
    pub migration_dir: Option<PathBuf>,
    /// When true, every request acts as an anonymous admin. Test-harness use only.
    #[serde(default)]
    pub auth_disabled: bool,
    /// Default lease duration in seconds. Range `30..=3600`.
    #[serde(default = "default_lease_duration_seconds")]
    pub lease_duration_seconds: u64,
    /// Default reservation TTL in seconds. Range `60..=86400`.
    #[serde(default = "default_reservation_ttl_seconds")]
    pub reservation_default_ttl_seconds: u64,
    /// Batch-mode metrics materializer cadence, in seconds.
    #[serde(default = "default_metrics_batch_cadence_seconds")]
    pub metrics_batch_cadence_seconds: u64,
    /// Near-real-time metrics materializer cadence, in seconds.
    #[serde(default = "default_metrics_nrt_cadence_seconds")]
    pub metrics_nrt_cadence_seconds: u64,
    /// Maximum events processed per batch-mode materializer run.
    #[serde(default = "default_metrics_batch_size")]
    pub metrics_batch_size: i64,
    /// Maximum events processed per near-real-time materializer run.
    #[serde(default = "default_metrics_nrt_batch_size")]
    pub metrics_nrt_batch_size: i64,
}

const fn default_lease_duration_seconds() -> u64 {
    300
}

const fn default_reservation_ttl_seconds() -> u64 {
    1800
}

const fn default_metrics_batch_cadence_seconds() -> u64 {
    900
}

const fn default_metrics_nrt_cadence_seconds() -> u64 {
    30
}

const fn default_metrics_batch_size() -> i64 {
    10_000
}

const fn default_metrics_nrt_batch_size() -> i64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            migration_dir: None,
            auth_disabled: false,
            lease_duration_seconds: default_lease_duration_seconds(),
            reservation_default_ttl_seconds: default_reservation_ttl_seconds(),
            metrics_batch_cadence_seconds: default_metrics_batch_cadence_seconds(),
            metrics_nrt_cadence_seconds: default_metrics_nrt_cadence_seconds(),
            metrics_batch_size: default_metrics_batch_size(),
            metrics_nrt_batch_size: default_metrics_nrt_batch_size(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from [`CONFIG_ENV_VAR`] if `path`
    /// is `None`, or [`Config::default`] if neither is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a path was resolved but the file could not
    /// be read, parsed, or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(path) => Some(path.to_path_buf()),
            None => env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
        };
        let Some(resolved) = resolved else {
            return Ok(Self::default());
        };

        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every bound named in `spec` §6, failing closed on the
    /// first violation rather than clamping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] if any tunable falls outside its
    /// documented bounds, or if `database_url`'s scheme is not recognized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if StoreDialect::from_database_url(&self.database_url).is_none() {
            return Err(ConfigError::OutOfRange(format!(
                "database_url {:?} does not resolve to a recognized dialect",
                self.database_url
            )));
        }
        let (lease_lo, lease_hi) = LEASE_DURATION_RANGE_SECONDS;
        if !(lease_lo..=lease_hi).contains(&self.lease_duration_seconds) {
            return Err(ConfigError::OutOfRange(format!(
                "lease_duration_seconds {} outside {lease_lo}..={lease_hi}",
                self.lease_duration_seconds
            )));
        }
        let (ttl_lo, ttl_hi) = RESERVATION_TTL_RANGE_SECONDS;
        if !(ttl_lo..=ttl_hi).contains(&self.reservation_default_ttl_seconds) {
            return Err(ConfigError::OutOfRange(format!(
                "reservation_default_ttl_seconds {} outside {ttl_lo}..={ttl_hi}",
                self.reservation_default_ttl_seconds
            )));
        }
        if self.metrics_batch_cadence_seconds == 0 {
            return Err(ConfigError::OutOfRange(
                "metrics_batch_cadence_seconds must be positive".to_string(),
            ));
        }
        if self.metrics_nrt_cadence_seconds == 0 {
            return Err(ConfigError::OutOfRange(
                "metrics_nrt_cadence_seconds must be positive".to_string(),
            ));
        }
        if self.metrics_batch_size <= 0 {
            return Err(ConfigError::OutOfRange("metrics_batch_size must be positive".to_string()));
        }
        if self.metrics_nrt_batch_size <= 0 {
            return Err(ConfigError::OutOfRange(
                "metrics_nrt_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the store dialect `database_url` selects.
    ///
    /// # Panics
    ///
    /// Never: [`Config::validate`] rejects an unrecognized scheme before a
    /// `Config` is returned from [`Config::load`]. Callers constructing a
    /// `Config` by hand should call `validate` first.
    #[must_use]
    pub fn dialect(&self) -> Option<StoreDialect> {
        StoreDialect::from_database_url(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Config;
    use super::ConfigError;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        config.validate().expect("default config must validate");
    }

    #[test]
    fn rejects_lease_duration_below_minimum() {
        let mut config = Config::default();
        config.lease_duration_seconds = 1;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn rejects_lease_duration_above_maximum() {
        let mut config = Config::default();
        config.lease_duration_seconds = 60 * 60 + 1;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn rejects_reservation_ttl_outside_bounds() {
        let mut config = Config::default();
        config.reservation_default_ttl_seconds = 59;
        assert!(config.validate().is_err());
        config.reservation_default_ttl_seconds = 86_401;
        assert!(config.validate().is_err());
        config.reservation_default_ttl_seconds = 86_400;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unrecognized_database_url_scheme() {
        let mut config = Config::default();
        config.database_url = "mongodb://localhost/fleetgraph".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn loads_from_explicit_toml_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
            database_url = "postgres://localhost/fleetgraph"
            lease_duration_seconds = 120
            "#
        )
        .expect("write");
        let config = Config::load(Some(file.path())).expect("load");
        assert_eq!(config.lease_duration_seconds, 120);
        assert_eq!(config.dialect(), Some(super::StoreDialect::Postgres));
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
            database_url = "sqlite::memory:"
            not_a_real_option = true
            "#
        )
        .expect("write");
        assert!(matches!(Config::load(Some(file.path())), Err(ConfigError::Parse(_))));
    }
}
