//! alfred-sdk: embeddable facade over the whiteboard event fabric and
//! manager orchestrator.
//!
//! # Overview
//!
//! `alfred-sdk` gives an embedding process a single entry point —
//! [`Client`] — onto the whiteboard (C1), the subscriber mechanism that
//! backs the HTTP subscriber endpoints (C2), the user-action ingress (C11),
//! and, optionally, the full Runtime Worker + subagent fleet (C6-C10) run in
//! the background via [`Client::run_fabric`].
//!
//! # Quickstart
//!
//! ```no_run
//! use alfred_sdk::Client;
//! use alfred_types::UserId;
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect_default()?;
//! let mut stream = client.watch(UserId::new("alice")).start();
//! while let Some(event) = stream.next().await {
//!     println!("whiteboard event: {:?}", event.values);
//!     break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Driving the fabric
//!
//! ```no_run
//! use alfred_sdk::Client;
//! use alfred_runtime::Config;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect_default()?;
//! let mut config = Config::default();
//! config.users.push("alice".to_string());
//! let fabric = client.run_fabric(config);
//! // ... the Runtime Worker and subagent fleet now run in the background ...
//! fabric.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! This SDK acts as a facade over:
//! - `alfred-types`: the whiteboard/checkpoint/typed-event data model (§3)
//! - `alfred-core`: the Whiteboard Bus and control-channel `ChannelBus` (C1)
//! - `alfred-engine`: the Normalizer and Manager Graph (C3/C4)
//! - `alfred-index`: the durable Checkpoint Store and whiteboard archive (C5)
//! - `alfred-agents`: the four autonomous subagents (C7-C10)
//! - `alfred-runtime`: the Runtime Worker, per-user supervisor, and
//!   subscriber-endpoint/user-action-ingress HTTP router (C6, C2, C11, C12)

pub mod client;
pub mod error;
pub mod watch;

pub use client::{Client, RunningFabric};
pub use error::{Error, Result};
pub use watch::{LiveStream, WatchBuilder};

// Re-exports an embedder reaches for without adding the lower layers as
// direct dependencies.
pub use alfred_core::{Bus, ChannelBus};
pub use alfred_index::Database;
pub use alfred_runtime::{Config, HttpState};
pub use alfred_types::{
    Checkpoint, Scalar, ScalarMap, ThreadId, TypedEvent, UserId, WbId, WhiteboardEvent,
};
