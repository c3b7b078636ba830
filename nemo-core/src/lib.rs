//! Shared wire protocol, channel, and event-loop primitives for the
//! `nemo-rq` requester and `nemo-rp` responder binaries.
//!
//! This crate is intentionally `clap`-free: it has no opinion on how a
//! binary gathers its configuration, only on what a valid configuration
//! and a valid datagram look like.

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod packet_io;
pub mod payload;
pub mod plugin;
pub mod report;
pub mod signals;
pub mod target;
pub mod wait;

pub use error::{DatagramError, Error, PluginError};
pub use payload::Payload;
