use std::time::Duration;

use tdship_api::ClientError;

use crate::encoder::EncodeError;
use crate::resolve::Destination;

/// Coarse error kind, for the host's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRecord,
    DestinationNotFound,
    InvalidDestination,
    Transient,
    RateLimited,
    Config,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    /// A single record could not be encoded. Never fails a batch on its own.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] EncodeError),

    /// Destination missing and auto-creation disabled.
    #[error(
        "table \"{destination}\" does not exist; use 'td table:create {} {}' to create it",
        .destination.database(),
        .destination.table()
    )]
    DestinationNotFound { destination: Destination },

    /// Database/table name rejected on the client side.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// Network, auth or server failure; the host may re-present the batch.
    #[error(
        "failed to upload to {destination}: {source} ({size} bytes; {:.3} seconds)",
        .elapsed.as_secs_f64()
    )]
    Transient {
        destination: Destination,
        size: u64,
        elapsed: Duration,
        #[source]
        source: ClientError,
    },

    #[error("rate limited while uploading to {destination}: {source}")]
    RateLimited {
        destination: Destination,
        #[source]
        source: ClientError,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShipError::InvalidRecord(_) => ErrorKind::InvalidRecord,
            ShipError::DestinationNotFound { .. } => ErrorKind::DestinationNotFound,
            ShipError::InvalidDestination(_) => ErrorKind::InvalidDestination,
            ShipError::Transient { .. } => ErrorKind::Transient,
            ShipError::RateLimited { .. } => ErrorKind::RateLimited,
            ShipError::Config(_) => ErrorKind::Config,
            ShipError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether re-presenting the same batch later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::RateLimited | ErrorKind::Io
        )
    }

    /// Add context to the error.
    ///
    /// For `Config` and `InvalidDestination` the context is prepended to the
    /// message. Other variants already carry structured context.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            ShipError::Config(msg) => ShipError::Config(format!("{ctx}: {msg}")),
            ShipError::InvalidDestination(msg) => {
                ShipError::InvalidDestination(format!("{ctx}: {msg}"))
            }
            other => other,
        }
    }
}
