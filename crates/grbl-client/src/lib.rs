//! Grbl Client
//!
//! Async command/response client for Grbl controllers, built on
//! [`grbl_protocol`]. The client works over any byte stream (serial port,
//! TCP socket, in-memory pipe): give it a reader and a writer half.
//!
//! # Example
//!
//! ```rust,ignore
//! use grbl_client::{Client, ClientConfig};
//! use grbl_protocol::{Catalog, Position};
//!
//! let client = Client::connect_tcp("127.0.0.1:9000", Catalog::grbl_v1_1(), ClientConfig::default()).await?;
//! client.ready().await?;
//!
//! client.kill_alarm_lock().await?;
//! client.position(Position { x: Some(-100.0), y: Some(-100.0), z: None }).await?;
//! let status = client.status().await?;
//! ```

mod client;
mod config;
mod error;
mod events;

pub use client::*;
pub use config::*;
pub use error::*;
pub use events::*;
