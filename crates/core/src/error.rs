use std::fmt;

use crate::progress::ProgressValue;

/// Top-level error type. The relay itself never fails; these come from the
/// surfaces around it (config loading, joining a worker).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn workload thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Workload thread panicked: {0}")]
    WorkerPanicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid poll interval {0}ms: must be at least 1ms")]
    InvalidPollInterval(u64),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which consumer callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Update,
    Completion,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Update => write!(f, "update"),
            CallbackKind::Completion => write!(f, "completion"),
        }
    }
}

/// A consumer callback panicked and the panic was discarded. Only ever handed
/// to an error sink; delivery continues regardless.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} callback panicked at value {value}: {message}")]
pub struct CallbackFailure {
    pub kind: CallbackKind,
    pub value: ProgressValue,
    pub message: String,
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
