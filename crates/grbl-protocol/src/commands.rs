//! Commands that can be sent to a Grbl controller.
//!
//! Everything Grbl accepts is a single text line. The variants here name the
//! lines used by the high-level client operations; anything else goes through
//! [`Command::Raw`].

use crate::codec::LineCodec;

/// Target of a coordinate move. Absent axes are left out of the command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Position {
    /// Format as space-separated axis words with one decimal place,
    /// e.g. `X-100.0 Y-100.0`.
    pub fn to_command_string(&self) -> String {
        [('X', self.x), ('Y', self.y), ('Z', self.z)]
            .iter()
            .filter_map(|&(axis, value)| value.map(|v| format!("{}{:.1}", axis, v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Commands understood by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ========== Queries ==========
    /// Request a status report (`?`).
    Status,

    /// Request the help line (`$`).
    Help,

    /// Dump all settings (`$$`).
    Settings,

    // ========== System Commands ==========
    /// Run the homing cycle (`$H`).
    RunHomingCycle,

    /// Clear the alarm lock (`$X`).
    KillAlarmLock,

    // ========== Modal G-code ==========
    /// Rapid positioning mode (`G0`).
    RapidTravel,

    /// Inch units (`G20`).
    ImperialCoordinates,

    /// Millimeter units (`G21`).
    MetricCoordinates,

    /// Absolute distance mode (`G90`).
    AbsolutePositioning,

    /// Incremental distance mode (`G91`).
    IncrementalPositioning,

    /// Move to a position in the current modal state.
    Position(Position),

    // ========== Raw Command ==========
    /// Send a raw command line.
    Raw {
        /// The raw command text.
        command: String,
    },
}

impl Command {
    /// Encode the command as a line to send to the controller.
    /// Returns the bytes to send (including the `\r\n` terminator).
    pub fn encode(&self) -> Vec<u8> {
        LineCodec::encode_command(&self.to_command_string())
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Status => "?".to_string(),
            Command::Help => "$".to_string(),
            Command::Settings => "$$".to_string(),
            Command::RunHomingCycle => "$H".to_string(),
            Command::KillAlarmLock => "$X".to_string(),
            Command::RapidTravel => "G0".to_string(),
            Command::ImperialCoordinates => "G20".to_string(),
            Command::MetricCoordinates => "G21".to_string(),
            Command::AbsolutePositioning => "G90".to_string(),
            Command::IncrementalPositioning => "G91".to_string(),
            Command::Position(position) => position.to_command_string(),
            Command::Raw { command } => command.clone(),
        }
    }
}
