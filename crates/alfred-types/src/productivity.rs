use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal heuristic state the Productivity subagent (C8) uses to decide
/// whether the current foreground activity is on-task. Never written to the
/// whiteboard (§9 Open Question: expected-apps stay internal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicRecord {
    pub block_id: String,
    pub expected_apps: Vec<String>,
    pub mismatch_elapsed_s: f64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl HeuristicRecord {
    pub fn new(block_id: impl Into<String>, expected_apps: Vec<String>) -> Self {
        Self {
            block_id: block_id.into(),
            expected_apps,
            mismatch_elapsed_s: 0.0,
            last_heartbeat_at: None,
            cooldown_until: None,
        }
    }

    pub fn is_expected(&self, foreground: &str) -> bool {
        self.expected_apps.iter().any(|a| a == foreground)
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Per-input-stream consumer offset (§3 Input Stream Offset): the last
/// externally-sourced entry id a subagent has durably consumed, used for
/// de-dupe and resume-on-restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStreamOffset {
    pub stream_key: String,
    pub last_entry_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_apps_membership() {
        let h = HeuristicRecord::new("b1", vec!["Xcode".into(), "Terminal".into()]);
        assert!(h.is_expected("Xcode"));
        assert!(!h.is_expected("Slack"));
    }

    #[test]
    fn cooldown_window() {
        let mut h = HeuristicRecord::new("b1", vec![]);
        let now = Utc::now();
        h.cooldown_until = Some(now + chrono::Duration::seconds(60));
        assert!(h.in_cooldown(now));
        assert!(!h.in_cooldown(now + chrono::Duration::seconds(61)));
    }
}
