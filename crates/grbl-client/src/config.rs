//! Client configuration.

use serde::{Deserialize, Serialize};

/// Default capacity of the broadcast event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a Grbl connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection name (used in log messages).
    pub name: String,
    /// Capacity of the broadcast event channel created by `Client::connect`.
    /// Slow subscribers lose the oldest events beyond this.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            name: "grbl".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with the given connection name.
    pub fn named(name: impl Into<String>) -> Self {
        ClientConfig {
            name: name.into(),
            ..ClientConfig::default()
        }
    }
}
