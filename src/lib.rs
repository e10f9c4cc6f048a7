//! Debug Adapter Protocol server core.
//!
//! A single DAP client talks to a debuggee with many threads. Each debuggee thread that
//! stops gets a [`processor::CommandProcessor`] which serves the client requests aimed at
//! it, while the [`session::Session`] thread reads requests and either answers them itself
//! or hands them over.

pub mod breakpoint;
pub mod channel;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod handles;
pub mod log;
pub mod processor;
pub mod protocol;
pub mod server;
pub mod session;
