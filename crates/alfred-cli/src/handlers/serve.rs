use alfred_core::{Bus, ChannelBus};
use alfred_index::Database;
use alfred_runtime::{http_router, Config, HttpState, Supervisor};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Assembles and runs the whole fabric (C1-C12) in one process: the shared
/// `Bus`/`ChannelBus`/`Database`, the per-user Runtime Worker supervisor
/// (C6), the subagent fleets (C7-C10), and the HTTP subscriber/user-action
/// surface (C2/C11). Runs until Ctrl-C, then drains everything in order.
pub async fn handle(config: Config, addr: &str) -> Result<()> {
    if config.users.is_empty() {
        bail!("no users configured; run `alfred init --user <id>` first");
    }

    let db = Arc::new(Database::open(&config.database_path()?)?);
    let bus = Arc::new(Bus::new(config.maxlen_approx));
    let channels = Arc::new(ChannelBus::new(config.maxlen_approx));

    let supervisor = Supervisor::start(&config, bus.clone(), channels.clone(), db.clone());
    let agent_cancel = CancellationToken::new();
    let agent_handles = alfred_runtime::spawn_agent_fleets(
        &config,
        bus.clone(),
        channels.clone(),
        db.clone(),
        agent_cancel.clone(),
    );

    let app = http_router(HttpState { bus, db });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, users = config.users.len(), "alfred whiteboard fabric listening");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, draining workers");
        }
    }

    agent_cancel.cancel();
    supervisor.shutdown().await;
    for handle in agent_handles {
        let _ = handle.await;
    }
    Ok(())
}
