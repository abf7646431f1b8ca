//! Host-side hardware I/O for a bio-mimetic sonar head
//!
//! Talks to the four MCU boards that make up the head: the sonar
//! acquisition board, the echo emitter, the dual-channel echo listener
//! and the pinna tendon-motor controller. Each device gets its own
//! controller over a [`transport::Transport`], so the protocol logic is
//! testable without hardware attached.

pub mod config;
pub mod emitter;
pub mod error;
pub mod framing;
pub mod listener;
pub mod pinnae;
pub mod sonar;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
