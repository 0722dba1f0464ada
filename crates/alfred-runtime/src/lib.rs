//! Runtime Worker (C6), §6.6 configuration, per-user supervisor, and
//! Observability/Policy (C12) for Alfred. Assembles the Manager Graph's
//! collaborators (§6.3-6.4) and drives the per-user consumer loop that
//! turns whiteboard events into routed side effects.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod http;
pub mod policy;
pub mod supervisor;
pub mod worker;

pub use collaborators::{BusWhiteboardSink, ChannelMailControlSink, ChannelProdControlSink};
pub use config::Config;
pub use error::{Error, Result};
pub use http::{router as http_router, HttpState};
pub use policy::{Metrics, RoleSnapshot};
pub use supervisor::{spawn_agent_fleets, Supervisor};
pub use worker::{Worker, RUNTIME_ROLE};
