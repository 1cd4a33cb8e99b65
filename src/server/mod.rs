//! Relay server
//!
//! The viewer acceptor, its configuration, and the per-source reader task.

pub mod config;
pub mod listener;
pub(crate) mod source;

pub use config::{ServerConfig, SourceEndpoint};
pub use listener::RelayServer;
