use std::io::Error as IoError;
use std::path::PathBuf;

/// Errors reported by the governor and its capabilities
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("invalid value {value:?} for {key}")]
    InvalidArgument { key: String, value: String },

    #[error("unknown tunable {0:?}")]
    UnknownKey(String),

    #[error("tunable {0} is read-only")]
    ReadOnly(String),

    #[error("failed to spawn hotplug worker: {0}")]
    WorkerSpawn(#[source] IoError),

    #[error("failed to register power-state notifier: {0}")]
    Registration(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error("invalid cpu list: {0}")]
    CpuList(String),
}

impl GovernorError {
    pub fn invalid(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidArgument {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = GovernorError> = std::result::Result<T, E>;
