//! Concrete `alfred_engine::graph` collaborators, assembled here because
//! `GraphDeps` is built wherever the Manager Graph is driven from (§6.3
//! AMBIENT Client note) — that's the Runtime Worker. `WhiteboardSink` wraps
//! `alfred_core::Bus` directly; `ProdControlSink`/`MailControlSink` write
//! onto the internal control channels (`user:{U}:control:prod`,
//! `user:{U}:control:mail`, §6.1) via `ChannelBus`, which is how C8/C10 pick
//! the messages back up — these are not external HTTP calls, only
//! `PlannerCollaborator` (`alfred_agents::planner::PlannerClient`) is.

use alfred_core::{Bus, ChannelBus};
use alfred_engine::{MailControlSink, MailSendConfirmed, ProdControlSink, ProdRecalcSignal, WhiteboardSink};
use alfred_types::{Scalar, ScalarMap, ThreadId, UserId, WbId};
use futures::future::BoxFuture;
use std::sync::Arc;

pub struct BusWhiteboardSink {
    bus: Arc<Bus>,
}

impl BusWhiteboardSink {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }
}

impl WhiteboardSink for BusWhiteboardSink {
    fn append(&self, user_id: &UserId, thread_id: &ThreadId, values: ScalarMap) -> WbId {
        self.bus.append(user_id, Some(thread_id.clone()), values)
    }
}

fn prod_control_key(user_id: &UserId) -> String {
    format!("user:{}:control:prod", user_id.as_str())
}

fn mail_control_key(user_id: &UserId) -> String {
    format!("user:{}:control:mail", user_id.as_str())
}

pub struct ChannelProdControlSink {
    channels: Arc<ChannelBus>,
}

impl ChannelProdControlSink {
    pub fn new(channels: Arc<ChannelBus>) -> Self {
        Self { channels }
    }
}

impl ProdControlSink for ChannelProdControlSink {
    fn send<'a>(&'a self, signal: &'a ProdRecalcSignal) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let mut values = ScalarMap::new();
            values.insert("type".to_string(), Scalar::String("prod.recompute".to_string()));
            values.insert("plan_id".to_string(), Scalar::String(signal.plan_id.clone()));
            values.insert("version".to_string(), Scalar::Int(signal.version as i64));
            values.insert("block_id".to_string(), Scalar::String(signal.block_id.clone()));
            self.channels.append(
                &prod_control_key(&signal.user_id),
                Some(signal.thread_id.clone()),
                values,
            );
            Ok(())
        })
    }
}

pub struct ChannelMailControlSink {
    channels: Arc<ChannelBus>,
}

impl ChannelMailControlSink {
    pub fn new(channels: Arc<ChannelBus>) -> Self {
        Self { channels }
    }
}

impl MailControlSink for ChannelMailControlSink {
    fn send<'a>(&'a self, confirmed: &'a MailSendConfirmed) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            let mut values = ScalarMap::new();
            values.insert(
                "type".to_string(),
                Scalar::String("email.send.confirmed".to_string()),
            );
            values.insert("message_id".to_string(), Scalar::String(confirmed.message_id.clone()));
            values.insert("draft_hash".to_string(), Scalar::String(confirmed.draft_hash.clone()));
            self.channels.append(
                &mail_control_key(&confirmed.user_id),
                Some(confirmed.thread_id.clone()),
                values,
            );
            Ok(())
        })
    }
}
