use crate::ids::{ThreadId, UserId, WbId};
use crate::scalar::ScalarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single append on a user's whiteboard: the per-user append-only event log
/// described in component C1. `values` carries the loosely-typed payload as
/// it arrived from the writer; the normalizer (C3) is what gives it a closed
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhiteboardEvent {
    pub wb_id: WbId,
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub ts: DateTime<Utc>,
    pub values: ScalarMap,
}

impl WhiteboardEvent {
    /// Stream key a writer/reader uses to address this user's whiteboard.
    pub fn stream_key(user_id: &UserId) -> String {
        format!("user:{}:wb", user_id)
    }

    /// `type` (preferred) or `kind` (fallback) discriminator the normalizer
    /// dispatches on.
    pub fn type_field(&self) -> Option<&str> {
        self.values
            .get("type")
            .or_else(|| self.values.get("kind"))
            .and_then(|v| v.as_str())
    }
}

/// Canonical input-stream key for external collaborators feeding a subagent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStreamRole {
    Calendar,
    Prod,
    Email,
}

impl InputStreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputStreamRole::Calendar => "calendar",
            InputStreamRole::Prod => "prod",
            InputStreamRole::Email => "email",
        }
    }

    pub fn stream_key(&self, user_id: &UserId) -> String {
        format!("user:{}:in:{}", user_id, self.as_str())
    }
}

/// Internal (non-whiteboard) control channel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChannel {
    /// `prod_recalc_signal` deliveries to the Productivity subagent.
    Prod,
    /// Confirmed-send deliveries to the Mailer worker.
    Mail,
}

impl ControlChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlChannel::Prod => "prod",
            ControlChannel::Mail => "mail",
        }
    }

    pub fn stream_key(&self, user_id: &UserId) -> String {
        format!("user:{}:control:{}", user_id, self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_keys_follow_the_canonical_naming() {
        let user = UserId::new("u1");
        assert_eq!(WhiteboardEvent::stream_key(&user), "user:u1:wb");
        assert_eq!(
            InputStreamRole::Calendar.stream_key(&user),
            "user:u1:in:calendar"
        );
        assert_eq!(ControlChannel::Mail.stream_key(&user), "user:u1:control:mail");
    }

    #[test]
    fn type_field_falls_back_to_kind() {
        let mut values = ScalarMap::new();
        values.insert(
            "kind".to_string(),
            crate::scalar::Scalar::String("prod.nudge".to_string()),
        );
        let event = WhiteboardEvent {
            wb_id: WbId::ZERO,
            user_id: UserId::new("u1"),
            thread_id: ThreadId::system(),
            ts: Utc::now(),
            values,
        };
        assert_eq!(event.type_field(), Some("prod.nudge"));
    }
}
