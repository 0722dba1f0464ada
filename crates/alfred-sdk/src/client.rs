use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::watch::WatchBuilder;
use alfred_core::{Bus, ChannelBus};
use alfred_index::Database;
use alfred_runtime::{Config, Supervisor};
use alfred_types::{Checkpoint, Scalar, ScalarMap, ThreadId, UserId, WbId};
use tokio_util::sync::CancellationToken;

/// Entry point for embedding the whiteboard fabric in another process:
/// composes the in-process `Bus`/`ChannelBus` with the `alfred-index`
/// checkpoint store, and can optionally drive the full Runtime Worker +
/// subagent fleet in the background via [`Client::run_fabric`].
pub struct Client {
    bus: Arc<Bus>,
    channels: Arc<ChannelBus>,
    db: Arc<Database>,
}

impl Client {
    /// Opens (or creates) the SQLite-backed checkpoint/archive store at
    /// `path` and wires up fresh in-process buses.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path.as_ref())?;
        Ok(Self::from_parts(Arc::new(Bus::default()), Arc::new(ChannelBus::default()), Arc::new(db)))
    }

    /// Resolves the default workspace path (`ALFRED_PATH`, then the XDG data
    /// directory, then `~/.alfred`) and connects to it.
    pub fn connect_default() -> Result<Self> {
        let path = alfred_core::resolve_workspace_path(None)
            .map_err(|err| Error::InvalidInput(err.to_string()))?;
        Self::connect(path.join("alfred.sqlite3"))
    }

    /// Builds a client directly from already-open handles, e.g. to share a
    /// `Bus` between a `Client` and a hand-assembled worker for testing.
    pub fn from_parts(bus: Arc<Bus>, channels: Arc<ChannelBus>, db: Arc<Database>) -> Self {
        Self { bus, channels, db }
    }

    pub fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }

    pub fn channels(&self) -> Arc<ChannelBus> {
        self.channels.clone()
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Starts a watch over one user's whiteboard (C2 underlying mechanism,
    /// minus the HTTP framing the `alfred` binary layers on top).
    pub fn watch(&self, user_id: UserId) -> WatchBuilder {
        WatchBuilder::new(self.bus.clone(), user_id)
    }

    /// Appends a `manager.user_action` entry (C11): the single ingress path
    /// a user's choice on a prompt takes back into the Runtime Worker.
    pub fn user_action(
        &self,
        user_id: &UserId,
        thread_id: ThreadId,
        prompt_id: &str,
        choice: &str,
        fields: ScalarMap,
    ) -> WbId {
        let mut values = fields;
        values.insert("type".to_string(), Scalar::String("manager.user_action".to_string()));
        values.insert("prompt_id".to_string(), Scalar::String(prompt_id.to_string()));
        values.insert("choice".to_string(), Scalar::String(choice.to_string()));
        self.bus.append(user_id, Some(thread_id), values)
    }

    /// Reads the current checkpoint for `(user_id, thread_id)`, or a fresh
    /// one if the pair has never been seen.
    pub fn checkpoint(&self, user_id: &UserId, thread_id: &ThreadId) -> Result<Checkpoint> {
        Ok(self.db.get_checkpoint(user_id, thread_id)?)
    }

    /// Spawns the Runtime Worker supervisor and subagent fleets for every
    /// user in `config`, sharing this client's `Bus`/`ChannelBus`/`Database`.
    /// The returned [`RunningFabric`] owns the background tasks; dropping it
    /// without calling `shutdown` leaves them running until the process
    /// exits.
    pub fn run_fabric(&self, config: Config) -> RunningFabric {
        let supervisor = Supervisor::start(&config, self.bus.clone(), self.channels.clone(), self.db.clone());
        let agent_cancel = CancellationToken::new();
        let agent_handles = alfred_runtime::spawn_agent_fleets(
            &config,
            self.bus.clone(),
            self.channels.clone(),
            self.db.clone(),
            agent_cancel.clone(),
        );
        RunningFabric {
            supervisor,
            agent_cancel,
            agent_handles,
        }
    }
}

/// A running Runtime Worker supervisor plus subagent fleets, spawned by
/// [`Client::run_fabric`]. Call [`RunningFabric::shutdown`] to cancel and
/// drain every background task.
pub struct RunningFabric {
    supervisor: Supervisor,
    agent_cancel: CancellationToken,
    agent_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningFabric {
    pub fn metrics(&self) -> Arc<alfred_runtime::Metrics> {
        self.supervisor.metrics()
    }

    pub async fn shutdown(self) {
        self.agent_cancel.cancel();
        self.supervisor.shutdown().await;
        for handle in self.agent_handles {
            let _ = handle.await;
        }
    }
}

/// Unused directly by `Client`, but kept so embedders don't need to reach
/// into `alfred_core` just to build a workspace path string themselves.
pub fn default_workspace_path() -> Result<PathBuf> {
    alfred_core::resolve_workspace_path(None).map_err(|err| Error::InvalidInput(err.to_string()))
}
