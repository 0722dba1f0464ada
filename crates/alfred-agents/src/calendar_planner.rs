//! Calendar-Planner Subagent (C7, §4.7): reads calendar deltas off
//! `user:{U}:in:calendar`, maintains a shadow calendar, calls the Planner
//! collaborator, and emits `calendar.plan.proposed`/`plan.new_version` to
//! the whiteboard. The drift-checked confirm step (§4.7 step 3, §9 calendar
//! confirm decision) is exposed as `confirm_proposal`, called by the
//! Runtime Worker's `manager.user_action` handling rather than the Manager
//! Graph itself, so the graph stays free of calendar-specific knowledge.

use crate::error::{Error, Result};
use crate::policy::DegradedGate;
use crate::subagent::Subagent;
use alfred_core::{Bus, ChannelBus};
use alfred_engine::{PlannerCollaborator, PlannerRequest};
use alfred_index::Database;
use alfred_types::{
    InputStreamRole, Proposal, ProposalStatus, Scalar, ScalarMap, ShadowCalendarEvent, SyncToken,
    ThreadId, UserId, WbId,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Read-only lookup of an external calendar's current state for the
/// pre-write drift check (§4.7 step 3). The actual write-through to Google
/// is explicitly out of scope (§1); this is read-only.
pub trait ExternalCalendarReader: Send + Sync {
    fn fetch_event<'a>(
        &'a self,
        calendar_id: &'a str,
        external_event_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ExternalEventSnapshot>>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEventSnapshot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub etag: Option<String>,
}

/// `reqwest`-backed reader. Mirrors `PlannerClient`'s shape (§6.3 AMBIENT).
pub struct HttpCalendarReader {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCalendarReader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl ExternalCalendarReader for HttpCalendarReader {
    fn fetch_event<'a>(
        &'a self,
        calendar_id: &'a str,
        external_event_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ExternalEventSnapshot>>> {
        Box::pin(async move {
            #[derive(serde::Deserialize)]
            struct Body {
                start: DateTime<Utc>,
                end: DateTime<Utc>,
                #[serde(default)]
                etag: Option<String>,
            }

            let resp = self
                .http
                .get(format!(
                    "{}/calendars/{calendar_id}/events/{external_event_id}",
                    self.base_url
                ))
                .send()
                .await
                .map_err(|e| Error::Collaborator(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body: Body = resp
                .json()
                .await
                .map_err(|e| Error::Collaborator(format!("calendar read decode failed: {e}")))?;
            Ok(Some(ExternalEventSnapshot {
                start: body.start,
                end: body.end,
                etag: body.etag,
            }))
        })
    }
}

pub struct CalendarPlanner {
    user_id: UserId,
    input: Arc<ChannelBus>,
    whiteboard: Arc<Bus>,
    db: Arc<Database>,
    planner: Arc<dyn PlannerCollaborator>,
    external: Arc<dyn ExternalCalendarReader>,
    degraded: DegradedGate,
    last_stream_id: LastId,
}

/// `WbId` has no atomic representation; a std mutex is plenty for a value
/// only the single consumer loop touches.
struct LastId(std::sync::Mutex<WbId>);

impl LastId {
    fn new(id: WbId) -> Self {
        Self(std::sync::Mutex::new(id))
    }

    fn get(&self) -> WbId {
        *self.0.lock().expect("last_stream_id lock poisoned")
    }

    fn set(&self, id: WbId) {
        *self.0.lock().expect("last_stream_id lock poisoned") = id;
    }
}

impl CalendarPlanner {
    pub fn new(
        user_id: UserId,
        input: Arc<ChannelBus>,
        whiteboard: Arc<Bus>,
        db: Arc<Database>,
        planner: Arc<dyn PlannerCollaborator>,
        external: Arc<dyn ExternalCalendarReader>,
    ) -> Self {
        let stream_key = InputStreamRole::Calendar.stream_key(&user_id);
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
            planner,
            external,
            degraded: DegradedGate::new(),
            last_stream_id: LastId::new(last_stream_id),
        }
    }

    fn stream_key(&self) -> String {
        InputStreamRole::Calendar.stream_key(&self.user_id)
    }

    async fn process_delta(&self, values: &ScalarMap, delta_wb_id: WbId) -> Result<()> {
        let delta_id = require_str(values, "delta_id")?;
        let calendar_id = require_str(values, "calendar_id")?;
        let external_event_id = require_str(values, "external_event_id")?;
        let title = require_str(values, "title").unwrap_or_default();
        let start = require_ts(values, "start")?;
        let end = require_ts(values, "end")?;
        let thread_id = values
            .get("thread_id")
            .and_then(|v| v.as_str())
            .and_then(ThreadId::new)
            .unwrap_or_else(ThreadId::system);

        self.db.upsert_shadow_event(&ShadowCalendarEvent {
            user_id: self.user_id.clone(),
            calendar_id: calendar_id.clone(),
            external_event_id: external_event_id.clone(),
            title: title.clone(),
            start,
            end,
            etag: values.get("etag").and_then(|v| v.as_str()).map(str::to_string),
        })?;

        if let Some(token) = values.get("sync_token").and_then(|v| v.as_str()) {
            self.db.save_sync_token(&SyncToken {
                user_id: self.user_id.clone(),
                calendar_id: calendar_id.clone(),
                token: token.to_string(),
                updated_at: Utc::now(),
            })?;
        }

        let request = PlannerRequest {
            user_id: self.user_id.clone(),
            thread_id: thread_id.clone(),
            plan_date: start.date_naive(),
            time_block: "current".to_string(),
            activity_type: None,
        };

        let response = self.planner.run(&request).await;
        self.degraded.record(response.is_ok());
        let response = response.map_err(Error::Collaborator)?;

        let proposal_id = format!("{}-{}", self.user_id.as_str(), delta_id);
        let existing = self.db.get_proposal(&proposal_id)?;
        self.db.insert_proposal(&Proposal {
            proposal_id: proposal_id.clone(),
            user_id: self.user_id.clone(),
            plan_id: response.plan_id.clone(),
            version: response.version,
            delta_id: delta_id.clone(),
            status: ProposalStatus::Pending,
            affected_event_ids: vec![external_event_id.clone()],
            created_at: Utc::now(),
        })?;

        let mut out = ScalarMap::new();
        if existing.is_some() {
            out.insert(
                "type".to_string(),
                Scalar::String("calendar.plan.new_version".to_string()),
            );
            out.insert("plan_id".to_string(), Scalar::String(response.plan_id));
            out.insert("version".to_string(), Scalar::Int(response.version as i64));
        } else {
            out.insert(
                "type".to_string(),
                Scalar::String("calendar.plan.proposed".to_string()),
            );
            out.insert("delta_id".to_string(), Scalar::String(delta_id));
            out.insert(
                "summary".to_string(),
                Scalar::String(format!("{title} moved/changed")),
            );
            out.insert("impact".to_string(), Scalar::String("today".to_string()));
        }

        self.whiteboard.append(&self.user_id, Some(thread_id), out);
        self.last_stream_id.set(delta_wb_id);
        self.db.save_input_offset(&alfred_types::InputStreamOffset {
            stream_key: self.stream_key(),
            last_entry_id: delta_wb_id.to_string(),
        })?;
        Ok(())
    }

    /// §4.7 step 3: on a user confirm, re-fetch the affected external
    /// events and compare with the shadow copy. Any drift retires the
    /// proposal as `stale` and emits a fresh `plan.proposed` explaining the
    /// conflict — the proposal is never applied through.
    pub async fn confirm_proposal(&self, proposal_id: &str, calendar_id: &str) -> Result<()> {
        let Some(mut proposal) = self.db.get_proposal(proposal_id)? else {
            return Ok(());
        };
        if proposal.status != ProposalStatus::Pending {
            return Ok(());
        }

        let mut drifted = false;
        for event_id in &proposal.affected_event_ids {
            let shadow = self.db.get_shadow_event(&self.user_id, calendar_id, event_id)?;
            let current = self.external.fetch_event(calendar_id, event_id).await;
            self.degraded.record(current.is_ok());
            let current = current?;

            match (shadow, current) {
                (Some(shadow), Some(current)) => {
                    if shadow.start != current.start || shadow.end != current.end {
                        drifted = true;
                    }
                }
                (None, Some(_)) | (Some(_), None) => drifted = true,
                (None, None) => {}
            }
        }

        if drifted {
            proposal.mark_stale();
            self.db
                .update_proposal_status(proposal_id, ProposalStatus::Stale)?;

            let mut out = ScalarMap::new();
            out.insert(
                "type".to_string(),
                Scalar::String("calendar.plan.proposed".to_string()),
            );
            out.insert("delta_id".to_string(), Scalar::String(proposal.delta_id.clone()));
            out.insert(
                "summary".to_string(),
                Scalar::String(
                    "the calendar changed since this proposal was made; review before applying"
                        .to_string(),
                ),
            );
            out.insert("impact".to_string(), Scalar::String("today".to_string()));
            self.whiteboard.append(&self.user_id, None, out);
        } else {
            self.db
                .update_proposal_status(proposal_id, ProposalStatus::Applied)?;
        }
        Ok(())
    }
}

fn require_str(values: &ScalarMap, key: &str) -> Result<String> {
    values
        .get(key)
        .and_then(|v| v.clone().into_string())
        .ok_or_else(|| Error::Decode(format!("calendar delta missing `{key}`")))
}

fn require_ts(values: &ScalarMap, key: &str) -> Result<DateTime<Utc>> {
    let raw = require_str(values, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("calendar delta `{key}` not RFC3339: {e}")))
}

impl Subagent for CalendarPlanner {
    fn id(&self) -> &'static str {
        "calendar_planner"
    }

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn consume_batch(&self, batch: usize) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let (events, next_id) = self
                .input
                .tail(&self.stream_key(), self.last_stream_id.get(), batch, Duration::from_millis(50))
                .await;
            let mut processed = 0;
            for event in &events {
                match self.process_delta(&event.values, event.wb_id).await {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, user = %self.user_id, "calendar delta processing failed");
                    }
                }
            }
            if processed == 0 && next_id > self.last_stream_id.get() {
                self.last_stream_id.set(next_id);
            }
            Ok(processed)
        })
    }

    fn tick(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_engine::PlannerResponse;

    struct FakePlanner;
    impl PlannerCollaborator for FakePlanner {
        fn run<'a>(
            &'a self,
            _request: &'a PlannerRequest,
        ) -> BoxFuture<'a, std::result::Result<PlannerResponse, String>> {
            Box::pin(async move {
                Ok(PlannerResponse {
                    plan_id: "plan-1".into(),
                    version: 1,
                    timeline: vec![],
                    conflicts: vec![],
                    rationale: "ok".into(),
                })
            })
        }
    }

    struct FakeExternal(Option<ExternalEventSnapshot>);
    impl ExternalCalendarReader for FakeExternal {
        fn fetch_event<'a>(
            &'a self,
            _calendar_id: &'a str,
            _external_event_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<ExternalEventSnapshot>>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    fn values(extra: &[(&str, Scalar)]) -> ScalarMap {
        let mut m = ScalarMap::new();
        for (k, v) in extra {
            m.insert(k.to_string(), v.clone());
        }
        m
    }

    #[tokio::test]
    async fn processes_delta_and_emits_plan_proposed() {
        let user = UserId::new("u1");
        let input = Arc::new(ChannelBus::new(100));
        let whiteboard = Arc::new(Bus::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let agent = CalendarPlanner::new(
            user.clone(),
            input,
            whiteboard.clone(),
            db,
            Arc::new(FakePlanner),
            Arc::new(FakeExternal(None)),
        );

        let delta = values(&[
            ("delta_id", Scalar::String("d1".into())),
            ("calendar_id", Scalar::String("primary".into())),
            ("external_event_id", Scalar::String("e1".into())),
            ("title", Scalar::String("Standup".into())),
            ("start", Scalar::String(Utc::now().to_rfc3339())),
            ("end", Scalar::String((Utc::now() + chrono::Duration::minutes(30)).to_rfc3339())),
        ]);
        agent.process_delta(&delta, WbId::new(1, 0)).await.unwrap();

        let (events, _) = whiteboard.tail_with(&user, alfred_types::WbId::ZERO, 10, Duration::from_millis(10)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values.get("type").unwrap().as_str(), Some("calendar.plan.proposed"));
    }

    #[tokio::test]
    async fn confirm_marks_stale_on_drift() {
        let user = UserId::new("u1");
        let input = Arc::new(ChannelBus::new(100));
        let whiteboard = Arc::new(Bus::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_shadow_event(&ShadowCalendarEvent {
            user_id: user.clone(),
            calendar_id: "primary".into(),
            external_event_id: "e1".into(),
            title: "Standup".into(),
            start: Utc::now(),
            end: Utc::now() + chrono::Duration::minutes(30),
            etag: None,
        })
        .unwrap();
        db.insert_proposal(&Proposal {
            proposal_id: "p1".into(),
            user_id: user.clone(),
            plan_id: "plan-1".into(),
            version: 1,
            delta_id: "d1".into(),
            status: ProposalStatus::Pending,
            affected_event_ids: vec!["e1".into()],
            created_at: Utc::now(),
        })
        .unwrap();

        let drifted_snapshot = ExternalEventSnapshot {
            start: Utc::now() + chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(2),
            etag: None,
        };
        let agent = CalendarPlanner::new(
            user,
            Arc::new(ChannelBus::new(100)),
            whiteboard,
            db.clone(),
            Arc::new(FakePlanner),
            Arc::new(FakeExternal(Some(drifted_snapshot))),
        );

        agent.confirm_proposal("p1", "primary").await.unwrap();
        let loaded = db.get_proposal("p1").unwrap().unwrap();
        assert_eq!(loaded.status, ProposalStatus::Stale);
    }
}
