use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local mirror of an external calendar event, maintained by the
/// Calendar-Planner subagent (C7) so planning can happen without writing
/// through to the external calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowCalendarEvent {
    pub user_id: UserId,
    pub calendar_id: String,
    pub external_event_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub etag: Option<String>,
}

/// Opaque continuation token for an external calendar's incremental sync
/// protocol. `None`/expired tokens trigger a full-window re-bootstrap
/// (§4.7 step 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncToken {
    pub user_id: UserId,
    pub calendar_id: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

/// A pending calendar change awaiting user confirmation via the whiteboard
/// user-action path (§4.7 step 2-3, §9 calendar confirm decision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub user_id: UserId,
    pub plan_id: String,
    pub version: u64,
    pub delta_id: String,
    pub status: ProposalStatus,
    pub affected_event_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Applied,
    Dismissed,
    /// Shadow calendar drifted from the external source between proposal and
    /// confirmation (§4.7 step 3); the proposal is retired, never applied.
    Stale,
}

impl Proposal {
    pub fn mark_stale(&mut self) {
        self.status = ProposalStatus::Stale;
    }
}
