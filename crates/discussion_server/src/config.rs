//! Server configuration loaded from `DISCUSSION_*` environment variables.
//!
//! # Invariants
//! - Unset variables fall back to defaults; set but malformed ones fail
//!   startup with the offending key.

use discussion_core::{default_log_level, Consistency, SerialConsistency, StoreOptions};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_BIND_ADDR: &str = "DISCUSSION_BIND_ADDR";
pub const ENV_BACKEND: &str = "DISCUSSION_BACKEND";
pub const ENV_DB_PATH: &str = "DISCUSSION_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "DISCUSSION_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "DISCUSSION_LOG_DIR";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DISCUSSION_REQUEST_TIMEOUT_MS";
pub const ENV_READ_CONSISTENCY: &str = "DISCUSSION_READ_CONSISTENCY";
pub const ENV_WRITE_CONSISTENCY: &str = "DISCUSSION_WRITE_CONSISTENCY";
pub const ENV_SERIAL_CONSISTENCY: &str = "DISCUSSION_SERIAL_CONSISTENCY";

const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 24130);
const DEFAULT_DB_PATH: &str = "discussion.sqlite3";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Storage behind the consistency table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableBackend {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for TableBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`; expected sqlite|memory")),
        }
    }
}

impl Display for TableBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// A configuration variable that is set but unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub details: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.details)
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub backend: TableBackend,
    pub db_path: PathBuf,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub request_timeout: Duration,
    pub store: StoreOptions,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let timeout_ms = parsed::<u64>(ENV_REQUEST_TIMEOUT_MS, value(ENV_REQUEST_TIMEOUT_MS))?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError {
                key: ENV_REQUEST_TIMEOUT_MS,
                details: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parsed::<SocketAddr>(ENV_BIND_ADDR, value(ENV_BIND_ADDR))?
                .unwrap_or_else(|| SocketAddr::from(DEFAULT_BIND_ADDR)),
            backend: parsed::<TableBackend>(ENV_BACKEND, value(ENV_BACKEND))?.unwrap_or_default(),
            db_path: value(ENV_DB_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            log_level: value(ENV_LOG_LEVEL).unwrap_or_else(|| default_log_level().to_string()),
            log_dir: value(ENV_LOG_DIR),
            request_timeout: Duration::from_millis(timeout_ms),
            store: StoreOptions {
                read: parsed::<Consistency>(ENV_READ_CONSISTENCY, value(ENV_READ_CONSISTENCY))?
                    .unwrap_or_default(),
                write: parsed::<Consistency>(ENV_WRITE_CONSISTENCY, value(ENV_WRITE_CONSISTENCY))?
                    .unwrap_or_default(),
                conditional: parsed::<SerialConsistency>(
                    ENV_SERIAL_CONSISTENCY,
                    value(ENV_SERIAL_CONSISTENCY),
                )?
                .unwrap_or_default(),
            },
        })
    }
}

fn parsed<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|raw| {
        raw.parse::<T>().map_err(|err| ConfigError {
            key,
            details: err.to_string(),
        })
    })
    .transpose()
}
