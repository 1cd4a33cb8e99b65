//! Source and client registry
//!
//! The registry owns every upstream console connection and every downstream
//! viewer, and routes raw bytes from sources to the viewers attached to them.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<RelayHub>
//!                     ┌──────────────────────────┐
//!                     │ sources: RwLock<Map<     │
//!                     │   name, SourceHandle>>   │
//!                     │ clients: Mutex<Map<      │
//!                     │   name, ClientEntry>>    │
//!                     └────────────┬─────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!  [SourceReader]            [liveness task]           [RelayServer]
//!  read -> parse -> relay    HELO to waiting clients   accept -> register
//!        │                         │                         │
//!        └──────► hub.relay() ──► client writers ◄───────────┘
//! ```
//!
//! Relayed chunks are `bytes::Bytes`, so every client shares one allocation.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ClientSnapshot, ClientState, ClientWriter, SourceHandle, SourceState};
pub use error::RelayError;
pub use store::RelayHub;
