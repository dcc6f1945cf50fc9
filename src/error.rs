use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("failed to persist worker secret: {0}")]
    SecretPersistence(String),

    #[error("no free port (preferred {preferred}, range {start}..={end})")]
    NoPortAvailable { preferred: u16, start: u16, end: u16 },

    #[error("worker binary not found (searched {} locations)", searched.len())]
    BinaryNotFound { searched: Vec<PathBuf> },

    #[error("failed to spawn worker `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker health check timed out after {0:?}")]
    HealthCheckTimeout(Duration),

    #[error("worker exited before becoming healthy: {0}")]
    WorkerExited(String),

    #[error("worker is not running")]
    NotRunning,

    #[error("rpc request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("worker rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("release error: {0}")]
    Release(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Errors after which the host keeps running with downloads disabled.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BinaryNotFound { .. } | Self::SpawnFailed { .. })
    }

    /// Errors that mean the worker was started but never answered.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, Self::HealthCheckTimeout(_) | Self::WorkerExited(_))
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::SecretPersistence(_) => "secret-persistence",
            Self::NoPortAvailable { .. } => "no-port-available",
            Self::BinaryNotFound { .. } => "binary-not-found",
            Self::SpawnFailed { .. } => "spawn-failed",
            Self::HealthCheckTimeout(_) => "health-check-timeout",
            Self::WorkerExited(_) => "worker-exited",
            Self::NotRunning => "not-running",
            Self::Http(_) => "http",
            Self::Rejected { .. } => "rejected",
            Self::Config(_) => "config",
            Self::Release(_) => "release",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
