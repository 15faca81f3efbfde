//! Grbl Serial Protocol
//!
//! This crate provides the transport-independent core of the Grbl serial
//! protocol: turning received bytes into lines, recognizing the boot sequence,
//! attributing response lines to the command that caused them, and decoding
//! query responses.
//!
//! # Protocol Overview
//!
//! Grbl uses a line-based text interface in both directions:
//!
//! - **Commands** (host → controller): one G-code block or `$` command per
//!   line, terminated with `\r\n`
//! - **Responses** (controller → host): zero or more payload lines followed by
//!   `ok` or `error:<code>`
//! - **Boot**: a `Grbl 1.1f ['$' for help]` banner, then a free-form notice
//!
//! Only one command is outstanding at a time, so every line between a command
//! and its terminal marker belongs to that command.
//!
//! # Example
//!
//! ```rust
//! use grbl_protocol::{decode_settings, Catalog, GrblResult, LineCodec, PendingResponse};
//!
//! fn main() -> GrblResult<()> {
//!     let catalog = Catalog::grbl_v1_1();
//!     let mut codec = LineCodec::new();
//!     let mut pending = PendingResponse::new();
//!
//!     for line in codec.decode_chunk(b"$0=10\r\nok\r\n") {
//!         if let Some(result) = pending.push(&line, &catalog) {
//!             let settings = decode_settings(&result?, &catalog)?;
//!             assert_eq!(settings[0].value, "10");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod boot;
mod catalog;
mod codec;
mod commands;
mod correlator;
mod error;
mod responses;

pub use boot::*;
pub use catalog::*;
pub use codec::*;
pub use commands::*;
pub use correlator::*;
pub use error::*;
pub use responses::*;
