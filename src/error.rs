//! Crate-wide error taxonomy.
//!
//! Each variant corresponds to one of the error kinds named by the
//! orchestration design: config-missing, spawn-failure, process-lost,
//! stop-timeout, bus-unavailable, store-unavailable, malformed-envelope,
//! protocol-auth-failure, turn-failure. Infrastructure failures that don't
//! need a dedicated match arm fall through `Other`.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent configuration not found: {agent_id}")]
    ConfigMissing { agent_id: String },

    #[error("failed to spawn process for {process}: {detail}")]
    SpawnFailure { process: String, detail: String },

    #[error("process for {process} was expected to be alive but is gone")]
    ProcessLost { process: String },

    #[error("timed out waiting for {process} to stop gracefully")]
    StopTimeout { process: String },

    #[error("message bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("relational store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed envelope on {channel}: {detail}")]
    MalformedEnvelope { channel: String, detail: String },

    #[error("channel protocol authentication failed: {0}")]
    ProtocolAuthFailure(String),

    #[error("reasoning engine turn failed: {0}")]
    TurnFailure(String),

    #[error("invalid integration type: {0}")]
    UnknownIntegration(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code the control plane should answer with for this error,
    /// per the error propagation policy.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::ConfigMissing { .. } | Error::UnknownIntegration(_) => 404,
            Error::SpawnFailure { .. } | Error::StopTimeout { .. } => 202,
            Error::BusUnavailable(_) | Error::StoreUnavailable(_) => 500,
            Error::MalformedEnvelope { .. } => 400,
            Error::ProtocolAuthFailure(_) => 502,
            Error::TurnFailure(_) => 500,
            Error::Redis(_) | Error::Sqlx(_) | Error::Io(_) | Error::Other(_) => 500,
        }
    }

    pub fn config_missing(agent_id: impl Into<String>) -> Self {
        Error::ConfigMissing {
            agent_id: agent_id.into(),
        }
    }
}
