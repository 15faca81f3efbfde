//! Error types for the Grbl protocol.

use thiserror::Error;

use crate::catalog::Catalog;

/// Input did not match the wire-format grammar expected for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, got {input:?}")]
pub struct ProtocolError {
    /// The raw offending input.
    pub input: String,
    /// Human description of the expected shape.
    pub expected: String,
}

impl ProtocolError {
    /// Create a new protocol error for the given input.
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        ProtocolError {
            input: input.into(),
            expected: expected.into(),
        }
    }
}

/// The controller rejected a command with an `error:<code>` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error {code}: {message}")]
pub struct CommandError {
    /// Error code as reported by the controller.
    pub code: String,
    /// Short message from the catalog, empty if the code is unknown.
    pub message: String,
    /// Long description from the catalog, empty if the code is unknown.
    pub description: String,
}

impl CommandError {
    /// Resolve an error code against the catalog.
    pub fn from_code(code: &str, catalog: &Catalog) -> Self {
        match catalog.error(code) {
            Some(entry) => CommandError {
                code: code.to_string(),
                message: entry.message.clone(),
                description: entry.description.clone(),
            },
            None => CommandError {
                code: code.to_string(),
                message: String::new(),
                description: String::new(),
            },
        }
    }
}

/// Errors that can occur while talking to a Grbl controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrblError {
    /// Input did not match the expected grammar.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The controller rejected a command.
    #[error("command rejected: {0}")]
    Command(#[from] CommandError),
}

/// Result type alias for Grbl protocol operations.
pub type GrblResult<T> = Result<T, GrblError>;
