//! Error types for the Grbl client.

use grbl_protocol::{CommandError, GrblError, ProtocolError};
use thiserror::Error;

/// Why a connection stopped reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Disconnect {
    /// The first line was not a valid version banner.
    #[error("malformed banner: {0}")]
    Banner(ProtocolError),

    /// The transport reached end of stream.
    #[error("end of stream")]
    Eof,

    /// Reading from or writing to the transport failed.
    #[error("transport failed: {0}")]
    Io(String),

    /// The client was shut down.
    #[error("connection shut down")]
    Shutdown,
}

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A response (or the boot banner) did not match its grammar.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The controller rejected the command.
    #[error("command rejected: {0}")]
    Command(#[from] CommandError),

    /// Writing to the transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is gone.
    #[error("connection closed: {0}")]
    Closed(Disconnect),
}

impl From<GrblError> for ClientError {
    fn from(err: GrblError) -> Self {
        match err {
            GrblError::Protocol(e) => ClientError::Protocol(e),
            GrblError::Command(e) => ClientError::Command(e),
        }
    }
}

impl From<Disconnect> for ClientError {
    fn from(reason: Disconnect) -> Self {
        match reason {
            Disconnect::Banner(e) => ClientError::Protocol(e),
            other => ClientError::Closed(other),
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
