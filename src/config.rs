use std::env;
use std::path::PathBuf;

use crate::limits::{MAX_SLOT_DURATION, MIN_SLOT_DURATION};
use crate::model::{BusinessDefaults, TimeOfDay};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsConfig>,
    pub defaults: BusinessDefaults,
}

impl Config {
    /// Read `SLOTBOOK_*` variables, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = number(&lookup, "SLOTBOOK_PORT")?.unwrap_or(5433);
        let bind = text("SLOTBOOK_BIND", "0.0.0.0");
        let data_dir = PathBuf::from(text("SLOTBOOK_DATA_DIR", "./data"));
        let password = text("SLOTBOOK_PASSWORD", "slotbook");
        let max_connections = number(&lookup, "SLOTBOOK_MAX_CONNECTIONS")?.unwrap_or(256);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "SLOTBOOK_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        let compact_threshold = number(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000);
        let metrics_port = number(&lookup, "SLOTBOOK_METRICS_PORT")?;

        let tls = match (lookup("SLOTBOOK_TLS_CERT"), lookup("SLOTBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            _ => return Err(ConfigError::TlsPair),
        };

        let open_time = time(&lookup, "SLOTBOOK_DEFAULT_OPEN")?.unwrap_or(BusinessDefaults::STANDARD.open_time);
        let close_time = time(&lookup, "SLOTBOOK_DEFAULT_CLOSE")?.unwrap_or(BusinessDefaults::STANDARD.close_time);
        if open_time >= close_time {
            return Err(ConfigError::DefaultHours { open_time, close_time });
        }
        let slot_duration =
            number(&lookup, "SLOTBOOK_DEFAULT_SLOT_MINUTES")?.unwrap_or(BusinessDefaults::STANDARD.slot_duration);
        if !(MIN_SLOT_DURATION..=MAX_SLOT_DURATION).contains(&slot_duration) {
            return Err(ConfigError::Invalid {
                key: "SLOTBOOK_DEFAULT_SLOT_MINUTES",
                value: slot_duration.to_string(),
            });
        }

        Ok(Config {
            port,
            bind,
            data_dir,
            password,
            max_connections,
            compact_threshold,
            metrics_port,
            tls,
            defaults: BusinessDefaults {
                open_time,
                close_time,
                slot_duration,
                ..BusinessDefaults::STANDARD
            },
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }))
        .transpose()
}

fn time(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<TimeOfDay>, ConfigError> {
    lookup(key)
        .map(|value| value.parse().map_err(|_| ConfigError::Invalid { key, value }))
        .transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("both SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY must be set, or neither")]
    TlsPair,

    #[error("default opening hours {open_time}-{close_time} are empty")]
    DefaultHours { open_time: TimeOfDay, close_time: TimeOfDay },
}
