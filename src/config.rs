//! Coordinator configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). [`CoordinatorConfig::from_lookup`]
//! takes any key lookup so tests never touch the process environment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HaError;

/// Database engine driven by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// PostgreSQL via `sqlx` and `pg_ctl`.
    Postgres,
    /// Simulated engine, for dry runs.
    Memory,
}

impl FromStr for EngineKind {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(HaError::Config(format!("unknown engine {other:?}"))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = HaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(HaError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Connection and filesystem settings for the local PostgreSQL node.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Data directory (`PGDATA`).
    pub data_dir: PathBuf,
    /// Host of the local server.
    pub host: String,
    /// Port every member listens on unless the store says otherwise.
    pub port: u16,
    /// Superuser used for probes, replication and rewind.
    pub user: String,
    /// Password for [`PostgresConfig::user`].
    pub password: Option<String>,
    /// Database to connect to.
    pub database: String,
    /// Directory holding `pg_ctl`, `pg_rewind`, `pg_controldata`; `None`
    /// means `$PATH`.
    pub bin_dir: Option<PathBuf>,
    /// Explicit `--config-file` passed on start.
    pub config_file: Option<PathBuf>,
    /// Include file the upstream `primary_conninfo` is written to.
    pub recovery_conf: PathBuf,
    /// Local pool size.
    pub max_connections: u32,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("data_dir", &self.data_dir)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("bin_dir", &self.bin_dir)
            .field("config_file", &self.config_file)
            .field("recovery_conf", &self.recovery_conf)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Top-level coordinator configuration.
///
/// Loaded once at startup via [`CoordinatorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Name of the member this process manages.
    pub member_name: String,

    /// Engine the adapter drives.
    pub engine: EngineKind,

    /// Local PostgreSQL settings.
    pub postgres: PostgresConfig,

    /// Interval between coordinator ticks.
    pub tick_interval: Duration,

    /// Budget for a single probe; strictly shorter than the tick interval.
    pub probe_timeout: Duration,

    /// JSON document holding the cluster snapshot.
    pub dcs_path: PathBuf,

    /// Directory member status reports are written to; `None` disables
    /// status write-back.
    pub dcs_status_dir: Option<PathBuf>,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl CoordinatorConfig {
    /// Loads configuration from the process environment.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Config`] for unparsable or inconsistent values.
    pub fn from_env() -> Result<Self, HaError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Config`] for unparsable or inconsistent values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HaError> {
        let listen_addr = parse_required(&lookup, "LISTEN_ADDR", "0.0.0.0:3501")?;

        let member_name = lookup("HA_MEMBER_NAME")
            .or_else(|| lookup("HOSTNAME"))
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| HaError::Config("HA_MEMBER_NAME or HOSTNAME must be set".to_string()))?;

        let engine = parse_required(&lookup, "HA_ENGINE", "postgres")?;

        let data_dir = PathBuf::from(lookup("PGDATA").unwrap_or_else(|| "/postgresql/data".to_string()));
        let recovery_conf = lookup("HA_RECOVERY_CONF")
            .map_or_else(|| data_dir.join("ha_recovery.conf"), PathBuf::from);

        let postgres = PostgresConfig {
            host: lookup("PG_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_required(&lookup, "PG_PORT", "5432")?,
            user: lookup("PG_USER").unwrap_or_else(|| "postgres".to_string()),
            password: lookup("PG_PASSWORD").filter(|p| !p.is_empty()),
            database: lookup("PG_DATABASE").unwrap_or_else(|| "postgres".to_string()),
            bin_dir: lookup("PG_BIN_DIR").filter(|d| !d.is_empty()).map(PathBuf::from),
            config_file: lookup("PG_CONFIG_FILE").filter(|f| !f.is_empty()).map(PathBuf::from),
            recovery_conf,
            max_connections: parse_env(&lookup, "DATABASE_MAX_CONNECTIONS", 4),
            connect_timeout: Duration::from_secs(parse_env(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 5)),
            data_dir,
        };

        let config = Self {
            listen_addr,
            member_name,
            engine,
            postgres,
            tick_interval: Duration::from_secs(parse_env(&lookup, "HA_TICK_INTERVAL_SECS", 10)),
            probe_timeout: Duration::from_millis(parse_env(&lookup, "HA_PROBE_TIMEOUT_MS", 3000)),
            dcs_path: PathBuf::from(
                lookup("HA_DCS_PATH").unwrap_or_else(|| "/etc/ha/cluster.json".to_string()),
            ),
            dcs_status_dir: lookup("HA_DCS_STATUS_DIR").filter(|d| !d.is_empty()).map(PathBuf::from),
            event_bus_capacity: parse_env(&lookup, "EVENT_BUS_CAPACITY", 1024),
            log_format: parse_required(&lookup, "LOG_FORMAT", "text")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`HaError::Config`] when the tick interval is zero or the
    /// probe timeout does not fit inside it.
    pub fn validate(&self) -> Result<(), HaError> {
        if self.tick_interval.is_zero() {
            return Err(HaError::Config("HA_TICK_INTERVAL_SECS must be positive".to_string()));
        }
        if self.probe_timeout.is_zero() || self.probe_timeout >= self.tick_interval {
            return Err(HaError::Config(format!(
                "HA_PROBE_TIMEOUT_MS ({} ms) must be positive and shorter than the tick interval ({} ms)",
                self.probe_timeout.as_millis(),
                self.tick_interval.as_millis()
            )));
        }
        Ok(())
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable whose invalid values must not be silently replaced.
fn parse_required<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, HaError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| HaError::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<CoordinatorConfig, HaError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CoordinatorConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let Ok(config) = load(&[("HOSTNAME", "pg-0")]) else {
            panic!("defaults should load");
        };
        assert_eq!(config.member_name, "pg-0");
        assert_eq!(config.listen_addr.port(), 3501);
        assert_eq!(config.engine, EngineKind::Postgres);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.postgres.recovery_conf, PathBuf::from("/postgresql/data/ha_recovery.conf"));
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_millis(3000));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.dcs_status_dir.is_none());
    }

    #[test]
    fn member_name_is_required() {
        assert!(load(&[]).is_err());
        let Ok(config) = load(&[("HOSTNAME", "pg-0"), ("HA_MEMBER_NAME", "m1")]) else {
            panic!("explicit name should load");
        };
        assert_eq!(config.member_name, "m1");
    }

    #[test]
    fn probe_timeout_must_fit_in_tick() {
        let result = load(&[
            ("HA_MEMBER_NAME", "m1"),
            ("HA_TICK_INTERVAL_SECS", "2"),
            ("HA_PROBE_TIMEOUT_MS", "2000"),
        ]);
        assert!(matches!(result, Err(HaError::Config(_))));
    }

    #[test]
    fn unknown_engine_rejected() {
        assert!(load(&[("HA_MEMBER_NAME", "m1"), ("HA_ENGINE", "oracle")]).is_err());
        let Ok(config) = load(&[("HA_MEMBER_NAME", "m1"), ("HA_ENGINE", "memory"), ("LOG_FORMAT", "json")])
        else {
            panic!("memory engine should load");
        };
        assert_eq!(config.engine, EngineKind::Memory);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let Ok(config) = load(&[("HA_MEMBER_NAME", "m1"), ("PG_PASSWORD", "hunter2")]) else {
            panic!("should load");
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
