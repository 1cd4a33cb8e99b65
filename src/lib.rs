//! Live Slippi console stream parser and spectator relay
//!
//! Connects to consoles streaming match telemetry, splits their byte streams
//! into protocol commands, decodes match and per-frame player state, and
//! relays the raw stream to any number of viewers, each attached to at most
//! one console.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use slippi_relay::{RelayEvent, RelayServer, ServerConfig, SourceEndpoint};
//!
//! # async fn run() -> slippi_relay::Result<()> {
//! let server = RelayServer::new(ServerConfig::default());
//! let hub = Arc::clone(server.hub());
//!
//! let wii = SourceEndpoint::parse("left=192.168.1.20")?;
//! hub.add_source(&wii.name, &wii.host, wii.port).await?;
//!
//! let mut events = hub.events().subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let RelayEvent::ClientConnected { client, .. } = event {
//!             let _ = hub.attach(&client, "left").await;
//!         }
//!     }
//! });
//!
//! server.run().await
//! # }
//! ```

pub mod error;
pub mod events;
pub mod game;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sink;
pub mod stats;

pub use error::{Error, Result};
pub use events::{EventBus, RelayEvent};
pub use game::GameState;
pub use protocol::{ParseSummary, StreamParser};
pub use registry::{RegistryConfig, RelayError, RelayHub, SourceState};
pub use server::{RelayServer, ServerConfig, SourceEndpoint};
pub use sink::{ByteSink, MemorySink, NullSink};
pub use stats::{RelayStats, SourceStats};
