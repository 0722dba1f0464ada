//! `TestWorld` pattern for declarative integration test setup.
//!
//! Unlike a log-provider CLI, Alfred's state lives in a `Bus` (in-process,
//! C1) and a `Database` (durable, C5) rather than files dropped under a
//! project directory, so this harness builds an isolated `Config`/`Database`/
//! `Bus` triple instead of copying sample files into a fake log root.

use alfred_core::{Bus, ChannelBus};
use alfred_index::Database;
use alfred_runtime::Config;
use alfred_types::{ScalarMap, ThreadId, UserId, WbId, WhiteboardEvent};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// An isolated fabric: an in-memory `Bus`/`ChannelBus` plus an on-disk
/// SQLite `Database`, all scoped to a throwaway temp directory.
///
/// # Example
/// ```no_run
/// use alfred_testing::TestWorld;
/// use alfred_testing::fixtures;
/// use alfred_types::{ThreadId, UserId};
///
/// let world = TestWorld::new();
/// let user = UserId::new("alice");
/// world.append(&user, ThreadId::new("t1"), fixtures::heartbeat("vscode"));
/// ```
pub struct TestWorld {
    _temp_dir: TempDir,
    config_path: PathBuf,
    config: Config,
    bus: Arc<Bus>,
    channels: Arc<ChannelBus>,
    db: Arc<Database>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    /// Creates an isolated world with an on-disk database and the library's
    /// default `Config` (no users configured yet — see [`Self::with_user`]).
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("config.toml");
        let config = Config::default();
        let db_path = temp_dir.path().join("alfred.db");
        let db = Database::open(&db_path).expect("failed to open test database");

        Self {
            _temp_dir: temp_dir,
            config_path,
            config,
            bus: Arc::new(Bus::new(64)),
            channels: Arc::new(ChannelBus::new(64)),
            db: Arc::new(db),
        }
    }

    /// Registers `user_id` in this world's `Config` (for `Supervisor`/
    /// `spawn_agent_fleets` callers) and returns `self` for chaining.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.config.users.push(user_id.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }

    pub fn channels(&self) -> Arc<ChannelBus> {
        self.channels.clone()
    }

    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Writes this world's `Config` to disk at [`Self::config_path`], for
    /// tests that exercise `alfred --config <path> ...` directly.
    pub fn save_config(&self) -> Result<()> {
        self.config.save_to(&self.config_path.to_path_buf())?;
        Ok(())
    }

    /// Appends a whiteboard entry and also archives it, mirroring what the
    /// Runtime Worker does on every tail (§4.6 step 2) so a cold-start
    /// replay test sees it without running the worker loop.
    pub fn append(&self, user_id: &UserId, thread_id: Option<ThreadId>, values: ScalarMap) -> WbId {
        let wb_id = self.bus.append(user_id, thread_id, values);
        let (events, _) = futures::executor::block_on(self.bus.tail(user_id, WbId::ZERO));
        if let Some(event) = events.into_iter().find(|e| e.wb_id == wb_id) {
            let _ = self.db.archive_whiteboard_event(&event);
        }
        wb_id
    }

    /// Blocks (with the default 5s tail timeout) until at least one new
    /// event for `user_id` arrives after `after`, returning the batch.
    pub async fn tail(&self, user_id: &UserId, after: WbId) -> Vec<WhiteboardEvent> {
        let (events, _) = self.bus.tail(user_id, after).await;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn new_world_has_no_users_until_added() {
        let world = TestWorld::new().with_user("alice");
        assert_eq!(world.config().users, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn append_archives_so_replay_sees_it() {
        let world = TestWorld::new();
        let user = UserId::new("alice");
        let thread = ThreadId::new("t1");
        world.append(&user, thread, fixtures::heartbeat("vscode"));

        let replayed = world
            .db()
            .replay_whiteboard_events_after(&user, WbId::ZERO, 10)
            .unwrap();
        assert_eq!(replayed.len(), 1);
    }
}
