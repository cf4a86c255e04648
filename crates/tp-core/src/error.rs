use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors: anything the operator can fix by editing the config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("error parse ip: {value}")]
    InvalidAddress { value: String },

    #[error("invalid directory {path:?}: {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },

    #[error("too many items in {field}: {count} (max {max})")]
    TooManyItems {
        field: &'static str,
        count: usize,
        max: usize,
    },

    #[error("invalid port for {field}: {port}")]
    InvalidPort { field: &'static str, port: u16 },

    #[error("inbound and outbound redirect ports must differ (both {0})")]
    PortClash(u16),
}
