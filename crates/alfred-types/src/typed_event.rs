use crate::ids::{ThreadId, UserId, WbId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of normalized domain events the Normalizer (C3) produces from
/// whiteboard entries. Every variant corresponds to exactly one `type` tag
/// in the whiteboard taxonomy; there is no catch-all "unknown" variant by
/// design — entries that don't match one of these are rejected at the
/// normalizer boundary, not represented here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum TypedEvent {
    #[serde(rename = "calendar.plan.proposed")]
    CalendarPlanProposed(CalendarPlanProposed),
    #[serde(rename = "calendar.plan.new_version")]
    CalendarPlanNewVersion(CalendarPlanNewVersion),
    #[serde(rename = "prod.underrun")]
    ProdUnderrun(ProdBlockEvent),
    #[serde(rename = "prod.overrun")]
    ProdOverrun(ProdBlockEvent),
    #[serde(rename = "prod.nudge")]
    ProdNudge(ProdBlockEvent),
    #[serde(rename = "email.reply_needed")]
    EmailReplyNeeded(EmailReplyNeeded),
    #[serde(rename = "manager.user_action")]
    ManagerUserAction(ManagerUserAction),
    #[serde(rename = "manager.prompt")]
    ManagerPrompt(ManagerPrompt),
}

impl TypedEvent {
    /// The whiteboard `type` tag this event normalizes to/from.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TypedEvent::CalendarPlanProposed(_) => "calendar.plan.proposed",
            TypedEvent::CalendarPlanNewVersion(_) => "calendar.plan.new_version",
            TypedEvent::ProdUnderrun(_) => "prod.underrun",
            TypedEvent::ProdOverrun(_) => "prod.overrun",
            TypedEvent::ProdNudge(_) => "prod.nudge",
            TypedEvent::EmailReplyNeeded(_) => "email.reply_needed",
            TypedEvent::ManagerUserAction(_) => "manager.user_action",
            TypedEvent::ManagerPrompt(_) => "manager.prompt",
        }
    }

    /// The router's dispatch source (§4.4 router node): which branch this
    /// event belongs to.
    pub fn source(&self) -> EventSource {
        match self {
            TypedEvent::CalendarPlanProposed(_) | TypedEvent::CalendarPlanNewVersion(_) => {
                EventSource::Calendar
            }
            TypedEvent::ProdUnderrun(_) | TypedEvent::ProdOverrun(_) | TypedEvent::ProdNudge(_) => {
                EventSource::Prod
            }
            TypedEvent::EmailReplyNeeded(_) => EventSource::Email,
            TypedEvent::ManagerUserAction(_) => EventSource::UserAction,
            TypedEvent::ManagerPrompt(_) => EventSource::Manager,
        }
    }
}

/// Router dispatch target (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Calendar,
    Prod,
    Email,
    UserAction,
    /// Manager-authored events (e.g. `manager.prompt`) are never re-routed;
    /// they only ever flow outward to subscribers.
    Manager,
}

/// Envelope common to every whiteboard-bound typed event: the identity of
/// the originating whiteboard entry plus the typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub wb_id: WbId,
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub ts: DateTime<Utc>,
    pub event: TypedEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarPlanProposed {
    pub delta_id: String,
    pub summary: String,
    pub impact: CalendarImpact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarImpact {
    Today,
    Future,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarPlanNewVersion {
    pub plan_id: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProdBlockEvent {
    pub block_id: String,
    pub activity_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailReplyNeeded {
    pub message_id: String,
    pub sender: String,
    pub summary: String,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerUserAction {
    pub action_id: String,
    pub choice: UserChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserChoice {
    Apply,
    Defer,
    Dismiss,
    Refocus,
    UpdatePlan,
    Send,
    ReadAloud,
}

impl UserChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserChoice::Apply => "apply",
            UserChoice::Defer => "defer",
            UserChoice::Dismiss => "dismiss",
            UserChoice::Refocus => "refocus",
            UserChoice::UpdatePlan => "update_plan",
            UserChoice::Send => "send",
            UserChoice::ReadAloud => "read_aloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apply" => Some(UserChoice::Apply),
            "defer" => Some(UserChoice::Defer),
            "dismiss" => Some(UserChoice::Dismiss),
            "refocus" => Some(UserChoice::Refocus),
            "update_plan" => Some(UserChoice::UpdatePlan),
            "send" => Some(UserChoice::Send),
            "read_aloud" => Some(UserChoice::ReadAloud),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerPrompt {
    pub content: String,
    pub options: Vec<UserChoice>,
    pub action_id: String,
    pub wb_parent_id: WbId,
}
