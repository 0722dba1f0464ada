//! Per-user supervision of the Runtime Worker (§4.6 SUPPLEMENT): one
//! `tokio::task` per configured user, restarted with capped backoff if it
//! returns an error, and a `shutdown()` that cancels every worker's token
//! and waits for drain.

use crate::collaborators::{BusWhiteboardSink, ChannelMailControlSink, ChannelProdControlSink};
use crate::config::Config;
use crate::policy::Metrics;
use crate::worker::Worker;
use alfred_agents::registry;
use alfred_agents::PlannerClient;
use alfred_core::{Bus, ChannelBus};
use alfred_engine::GraphDeps;
use alfred_index::Database;
use alfred_types::UserId;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Restart backoff ladder; capped so a persistently crashing worker doesn't
/// spin the process.
const RESTART_BACKOFFS: [Duration; 5] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
];

struct SupervisedUser {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns one `tokio::task` per configured user; each task runs a restart loop
/// around a [`Worker`].
pub struct Supervisor {
    users: Vec<SupervisedUser>,
    metrics: Arc<Metrics>,
}

impl Supervisor {
    /// Spawns one supervised worker per `config.users`, sharing the given
    /// `Bus`/`ChannelBus`/`Database` handles (§5 "the event store and
    /// checkpoint store are the only shared mutables").
    pub fn start(config: &Config, bus: Arc<Bus>, channels: Arc<ChannelBus>, db: Arc<Database>) -> Self {
        let metrics = Arc::new(Metrics::new());
        let start_after_id = config
            .start_after_id
            .as_deref()
            .and_then(|s| alfred_types::WbId::from_str(s).ok());

        let users = config
            .user_ids()
            .into_iter()
            .map(|user_id| {
                let cancel = CancellationToken::new();
                let handle = spawn_supervised(
                    user_id,
                    config.clone(),
                    bus.clone(),
                    channels.clone(),
                    db.clone(),
                    metrics.clone(),
                    start_after_id,
                    cancel.clone(),
                );
                SupervisedUser { handle, cancel }
            })
            .collect();

        Self { users, metrics }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Cancels every worker's token and waits for the tasks to drain.
    pub async fn shutdown(self) {
        for user in &self.users {
            user.cancel.cancel();
        }
        for user in self.users {
            let _ = user.handle.await;
        }
    }
}

fn spawn_supervised(
    user_id: UserId,
    config: Config,
    bus: Arc<Bus>,
    channels: Arc<ChannelBus>,
    db: Arc<Database>,
    metrics: Arc<Metrics>,
    start_after_id: Option<alfred_types::WbId>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let planner = Arc::new(PlannerClient::new(
                config.planner_url.clone(),
                config.planner_rate_per_min,
                config.planner_rate_per_hour,
            ));
            let graph_deps = GraphDeps {
                planner: planner.clone(),
                prod_control: Arc::new(ChannelProdControlSink::new(channels.clone())),
                mail_control: Arc::new(ChannelMailControlSink::new(channels.clone())),
                whiteboard: Arc::new(BusWhiteboardSink::new(bus.clone())),
            };

            let worker = Worker::new(user_id.clone(), bus.clone(), db.clone(), graph_deps, metrics.clone());
            let result = worker.run(start_after_id, cancel.clone()).await;

            if cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => return,
                Err(err) => {
                    tracing::error!(user = %user_id, error = %err, attempt, "runtime worker exited, restarting");
                    let backoff = RESTART_BACKOFFS[attempt.min(RESTART_BACKOFFS.len() - 1)];
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    })
}

/// Spawns the subagent fleet (§4.10 `registry::build_fleet`) for every
/// configured user as a cooperative poll loop, one `tokio::task` per user.
/// Each tick drains a bounded batch from every subagent before yielding.
pub fn spawn_agent_fleets(
    config: &Config,
    bus: Arc<Bus>,
    channels: Arc<ChannelBus>,
    db: Arc<Database>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let agent_config = config.to_agent_config();
    config
        .user_ids()
        .into_iter()
        .map(|user_id| {
            let deps = registry::AgentDeps {
                whiteboard: bus.clone(),
                channels: channels.clone(),
                db: db.clone(),
            };
            let agent_config = agent_config.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let fleet = registry::build_fleet(&user_id, &agent_config, &deps);
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    for agent in &fleet {
                        if let Err(err) = agent.consume_batch(10).await {
                            tracing::warn!(user = %user_id, role = agent.id(), error = %err, "subagent batch failed");
                        }
                        if let Err(err) = agent.tick().await {
                            tracing::warn!(user = %user_id, role = agent.id(), error = %err, "subagent tick failed");
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            })
        })
        .collect()
}
