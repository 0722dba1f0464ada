//! Productivity Subagent (C8, §4.8): consumes activity heartbeats off
//! `user:{U}:in:prod`, runs a mismatch timer against a heuristically
//! computed `expected_apps` set, and emits `prod.underrun`/`prod.overrun`
//! to the whiteboard. Expected-apps and raw heartbeats never themselves
//! reach the whiteboard (§9 Open Question: internal-only).

use crate::error::{Error, Result};
use alfred_core::{Bus, ChannelBus};
use alfred_types::{HeuristicRecord, InputStreamOffset, InputStreamRole, Scalar, ScalarMap, UserId};
use alfred_types::{ControlChannel, WbId};
use chrono::{DateTime, Timelike, Utc};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Computes the expected foreground-app set for a block from its label and
/// priority, a historical allowlist, and the hour of day (§4.8 recompute:
/// "current block label/priority, local preferences (external), historical
/// allowlist, time-of-day bias"). Pure so it can be unit-tested without a
/// running subagent.
pub fn compute_expected_apps(block_label: &str, priority: &str, hour: u32, history: &[String]) -> Vec<String> {
    let mut apps: Vec<String> = match block_label.to_ascii_lowercase().as_str() {
        label if label.contains("focus") || label.contains("deep") => {
            vec!["Xcode".to_string(), "Terminal".to_string(), "Editor".to_string()]
        }
        label if label.contains("meeting") || label.contains("call") => {
            vec!["Zoom".to_string(), "Calendar".to_string()]
        }
        label if label.contains("break") || label.contains("lunch") => {
            vec!["*".to_string()]
        }
        label if label.contains("admin") || label.contains("email") => {
            vec!["Mail".to_string(), "Slack".to_string()]
        }
        _ => vec!["Terminal".to_string()],
    };

    // Early/late hours bias toward lighter-weight tools regardless of label.
    if (hour < 7 || hour >= 20) && !apps.contains(&"*".to_string()) {
        apps.push("Notes".to_string());
    }

    if priority.eq_ignore_ascii_case("high") {
        apps.retain(|a| a != "*");
        if apps.is_empty() {
            apps.push("Terminal".to_string());
        }
    }

    for app in history {
        if !apps.contains(app) {
            apps.push(app.clone());
        }
    }
    apps
}

/// Whether a mismatch against a high-priority block should read as an
/// `underrun` (not doing the focused work) or a low-priority block being
/// worked through should read as an `overrun` (§4.8 "per policy").
fn classify_mismatch(priority: &str) -> &'static str {
    if priority.eq_ignore_ascii_case("high") {
        "prod.underrun"
    } else {
        "prod.overrun"
    }
}

struct HeartbeatInput {
    block_id: String,
    block_label: String,
    priority: String,
    foreground: String,
    ts: DateTime<Utc>,
}

fn parse_heartbeat(values: &ScalarMap) -> Result<HeartbeatInput> {
    let get = |key: &str| -> Result<String> {
        values
            .get(key)
            .and_then(|v| v.clone().into_string())
            .ok_or_else(|| Error::Decode(format!("prod heartbeat missing `{key}`")))
    };
    let ts = values
        .get("ts")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(HeartbeatInput {
        block_id: get("block_id")?,
        block_label: get("block_label")?,
        priority: values.get("priority").and_then(|v| v.clone().into_string()).unwrap_or_else(|| "normal".to_string()),
        foreground: get("foreground")?,
        ts,
    })
}

struct State {
    record: HeuristicRecord,
}

pub struct Productivity {
    user_id: UserId,
    input: Arc<ChannelBus>,
    whiteboard: Arc<Bus>,
    db: Arc<alfred_index::Database>,
    mismatch_threshold: Duration,
    cooldown: Duration,
    state: Mutex<Option<State>>,
    last_stream_id: Mutex<WbId>,
}

impl Productivity {
    pub fn new(
        user_id: UserId,
        input: Arc<ChannelBus>,
        whiteboard: Arc<Bus>,
        db: Arc<alfred_index::Database>,
        mismatch_threshold_s: u64,
        cooldown_s: u64,
    ) -> Self {
        let stream_key = InputStreamRole::Prod.stream_key(&user_id);
        let last_stream_id = db
            .get_input_offset(&stream_key)
            .ok()
            .flatten()
            .and_then(|o| o.last_entry_id.parse().ok())
            .unwrap_or(WbId::ZERO);
        Self {
            user_id,
            input,
            whiteboard,
            db,
            mismatch_threshold: Duration::from_secs(mismatch_threshold_s),
            cooldown: Duration::from_secs(cooldown_s),
            state: Mutex::new(None),
            last_stream_id: Mutex::new(last_stream_id),
        }
    }

    fn stream_key(&self) -> String {
        InputStreamRole::Prod.stream_key(&self.user_id)
    }

    fn recompute(&self, block_id: &str, block_label: &str, priority: &str, now: DateTime<Utc>) {
        let expected = compute_expected_apps(block_label, priority, now.hour(), &[]);
        let mut guard = self.state.lock().expect("productivity state lock poisoned");
        *guard = Some(State {
            record: HeuristicRecord::new(block_id, expected),
        });
    }

    fn process_heartbeat(&self, heartbeat: HeartbeatInput) -> Option<(&'static str, String, String)> {
        let mut guard = self.state.lock().expect("productivity state lock poisoned");
        let needs_recompute = guard
            .as_ref()
            .is_none_or(|s| s.record.block_id != heartbeat.block_id);
        drop(guard);
        if needs_recompute {
            self.recompute(&heartbeat.block_id, &heartbeat.block_label, &heartbeat.priority, heartbeat.ts);
        }

        let mut guard = self.state.lock().expect("productivity state lock poisoned");
        let state = guard.as_mut().expect("recompute just populated state");

        if state.record.is_expected(&heartbeat.foreground) {
            state.record.mismatch_elapsed_s = 0.0;
            state.record.last_heartbeat_at = Some(heartbeat.ts);
            return None;
        }

        let delta = state
            .record
            .last_heartbeat_at
            .map(|prev| (heartbeat.ts - prev).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        state.record.mismatch_elapsed_s += delta;
        state.record.last_heartbeat_at = Some(heartbeat.ts);

        if state.record.in_cooldown(heartbeat.ts) {
            return None;
        }

        if state.record.mismatch_elapsed_s >= self.mismatch_threshold.as_secs_f64() {
            state.record.mismatch_elapsed_s = 0.0;
            state.record.cooldown_until = Some(heartbeat.ts + chrono::Duration::from_std(self.cooldown).unwrap_or_default());
            let event_type = classify_mismatch(&heartbeat.priority);
            return Some((event_type, heartbeat.block_id.clone(), heartbeat.foreground.clone()));
        }
        None
    }

    fn emit(&self, event_type: &'static str, block_id: String, activity_label: String) {
        let mut out = ScalarMap::new();
        out.insert("type".to_string(), Scalar::String(event_type.to_string()));
        out.insert("block_id".to_string(), Scalar::String(block_id));
        out.insert("activity_label".to_string(), Scalar::String(activity_label));
        self.whiteboard.append(&self.user_id, None, out);
    }

    /// §4.8 recompute trigger (b): an explicit `prod.recompute` control
    /// message. Drains whatever is waiting on `control:prod` without
    /// blocking — called from `tick`, not the primary batch loop.
    async fn drain_recompute_signals(&self) -> Result<usize> {
        let key = ControlChannel::Prod.stream_key(&self.user_id);
        let after = WbId::ZERO;
        let (events, _) = self.input.tail(&key, after, 10, Duration::from_millis(1)).await;
        let count = events.len();
        for event in events {
            let block_id = event.values.get("block_id").and_then(|v| v.clone().into_string());
            let block_label = event
                .values
                .get("block_label")
                .and_then(|v| v.clone().into_string())
                .unwrap_or_else(|| "recompute".to_string());
            let priority = event
                .values
                .get("priority")
                .and_then(|v| v.clone().into_string())
                .unwrap_or_else(|| "normal".to_string());
            if let Some(block_id) = block_id {
                self.recompute(&block_id, &block_label, &priority, Utc::now());
            }
        }
        Ok(count)
    }
}

impl crate::subagent::Subagent for Productivity {
    fn id(&self) -> &'static str {
        "productivity"
    }

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn consume_batch(&self, batch: usize) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let after = *self.last_stream_id.lock().expect("last_stream_id lock poisoned");
            let (events, next_id) = self.input.tail(&self.stream_key(), after, batch, Duration::from_millis(50)).await;
            let mut processed = 0;
            for event in &events {
                match parse_heartbeat(&event.values) {
                    Ok(heartbeat) => {
                        if let Some((event_type, block_id, activity_label)) = self.process_heartbeat(heartbeat) {
                            self.emit(event_type, block_id, activity_label);
                        }
                        processed += 1;
                    }
                    Err(e) => tracing::warn!(error = %e, user = %self.user_id, "prod heartbeat decode failed"),
                }
            }
            if next_id > after {
                *self.last_stream_id.lock().expect("last_stream_id lock poisoned") = next_id;
                self.db.save_input_offset(&InputStreamOffset {
                    stream_key: self.stream_key(),
                    last_entry_id: next_id.to_string(),
                })?;
            }
            Ok(processed)
        })
    }

    fn tick(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.drain_recompute_signals().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_apps_for_focus_block_excludes_wildcard() {
        let apps = compute_expected_apps("Deep Work", "high", 10, &[]);
        assert!(apps.contains(&"Xcode".to_string()));
        assert!(!apps.contains(&"*".to_string()));
    }

    #[test]
    fn expected_apps_include_history() {
        let apps = compute_expected_apps("Admin", "normal", 10, &["Notion".to_string()]);
        assert!(apps.contains(&"Notion".to_string()));
    }

    #[tokio::test]
    async fn underrun_emitted_after_sustained_mismatch() {
        let user = UserId::new("u1");
        let input = Arc::new(ChannelBus::new(100));
        let whiteboard = Arc::new(Bus::default());
        let db = Arc::new(alfred_index::Database::open_in_memory().unwrap());
        let agent = Productivity::new(user.clone(), input, whiteboard.clone(), db, 1, 60);

        let t0 = Utc::now();
        let hb1 = HeartbeatInput {
            block_id: "b1".into(),
            block_label: "Deep Work".into(),
            priority: "high".into(),
            foreground: "Slack".into(),
            ts: t0,
        };
        assert!(agent.process_heartbeat(hb1).is_none());

        let hb2 = HeartbeatInput {
            block_id: "b1".into(),
            block_label: "Deep Work".into(),
            priority: "high".into(),
            foreground: "Slack".into(),
            ts: t0 + chrono::Duration::seconds(2),
        };
        let fired = agent.process_heartbeat(hb2);
        assert_eq!(fired.map(|(t, ..)| t), Some("prod.underrun"));
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_emission() {
        let user = UserId::new("u1");
        let input = Arc::new(ChannelBus::new(100));
        let whiteboard = Arc::new(Bus::default());
        let db = Arc::new(alfred_index::Database::open_in_memory().unwrap());
        let agent = Productivity::new(user, input, whiteboard, db, 1, 60);

        let t0 = Utc::now();
        for i in 0..3u32 {
            let hb = HeartbeatInput {
                block_id: "b1".into(),
                block_label: "Deep Work".into(),
                priority: "high".into(),
                foreground: "Slack".into(),
                ts: t0 + chrono::Duration::seconds(i as i64 * 2),
            };
            let fired = agent.process_heartbeat(hb);
            if i < 2 {
                // first mismatch establishes the baseline, second fires.
            } else {
                assert!(fired.is_none(), "should be suppressed by cooldown");
            }
        }
    }
}
