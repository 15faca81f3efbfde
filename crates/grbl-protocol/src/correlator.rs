//! Collects the lines answering a single command.
//!
//! Grbl answers every command line with zero or more payload lines followed
//! by a terminal marker: `ok`, or `error:<code>`. Only one command may be
//! outstanding, so every message line seen between the write and the marker
//! belongs to that command.

use crate::catalog::Catalog;
use crate::error::{CommandError, GrblResult};

/// Marker ending a successful response.
pub const OK_MARKER: &str = "ok";

/// Prefix of the marker ending a rejected command.
pub const ERROR_PREFIX: &str = "error:";

/// How a single inbound line relates to the outstanding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `ok`.
    Ok,
    /// `error:<code>`; carries the code.
    Error(&'a str),
    /// Any other line: part of the response payload.
    Payload,
}

impl<'a> LineKind<'a> {
    /// Classify a line.
    pub fn classify(line: &'a str) -> Self {
        if line == OK_MARKER {
            LineKind::Ok
        } else if let Some(code) = line.strip_prefix(ERROR_PREFIX) {
            LineKind::Error(code)
        } else {
            LineKind::Payload
        }
    }
}

/// Response accumulator for the command currently in flight.
#[derive(Debug, Default)]
pub struct PendingResponse {
    lines: Vec<String>,
}

impl PendingResponse {
    /// Start collecting a new response.
    pub fn new() -> Self {
        PendingResponse { lines: Vec::new() }
    }

    /// Feed one message line.
    ///
    /// Returns `None` while the response is still open, otherwise the
    /// collected payload or the resolved command error. The terminal marker
    /// is never part of the payload.
    pub fn push(
        &mut self,
        line: &str,
        catalog: &Catalog,
    ) -> Option<GrblResult<Vec<String>>> {
        match LineKind::classify(line) {
            LineKind::Ok => Some(Ok(std::mem::take(&mut self.lines))),
            LineKind::Error(code) => Some(Err(CommandError::from_code(code, catalog).into())),
            LineKind::Payload => {
                self.lines.push(line.to_string());
                None
            }
        }
    }

    /// Lines collected so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}
