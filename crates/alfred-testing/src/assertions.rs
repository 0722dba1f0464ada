//! Custom assertions for whiteboard-fabric validation.
//!
//! Provides high-level assertions that make tests more readable:
//! - Event-count and event-type validation over a tailed batch
//! - Checkpoint/side-effect idempotency checks

use alfred_types::{Checkpoint, WbId, WhiteboardEvent};
use anyhow::{Context, Result};

/// Assert that a tailed batch contains exactly `expected` events.
pub fn assert_event_count(events: &[WhiteboardEvent], expected: usize) -> Result<()> {
    if events.len() != expected {
        anyhow::bail!("expected {} events, got {}", expected, events.len());
    }
    Ok(())
}

/// Assert that every event in `events` carries the given `type` tag.
pub fn assert_all_event_type(events: &[WhiteboardEvent], expected_type: &str) -> Result<()> {
    for (i, event) in events.iter().enumerate() {
        let actual = event
            .values
            .get("type")
            .and_then(|v| v.as_str())
            .with_context(|| format!("event {i} missing a `type` field"))?;
        if actual != expected_type {
            anyhow::bail!(
                "event {} has type {:?}, expected {:?}",
                i,
                actual,
                expected_type
            );
        }
    }
    Ok(())
}

/// Assert that `events` contains at least one entry for `thread_id`.
pub fn assert_thread_has_events(events: &[WhiteboardEvent], thread_id: &str) -> Result<()> {
    if !events.iter().any(|e| e.thread_id.as_str() == thread_id) {
        anyhow::bail!("no events found for thread {thread_id:?}");
    }
    Ok(())
}

/// Assert that a checkpoint has already recorded `(wb_id, node_name)` as a
/// side-effect, i.e. a second run of the same graph node would be a no-op.
pub fn assert_side_effect_recorded(
    checkpoint: &Checkpoint,
    wb_id: WbId,
    node_name: &str,
) -> Result<()> {
    let key = alfred_types::SideEffectKey::new(wb_id, node_name);
    if !checkpoint.has_side_effect(&key) {
        anyhow::bail!(
            "checkpoint for thread {:?} has no side-effect key for node {:?} at {:?}",
            checkpoint.thread_id,
            node_name,
            wb_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use alfred_types::{ThreadId, UserId, WbId};

    fn event(thread: &str, values: alfred_types::ScalarMap) -> WhiteboardEvent {
        WhiteboardEvent {
            wb_id: WbId::ZERO,
            user_id: UserId::new("u1"),
            thread_id: ThreadId::new(thread).unwrap(),
            ts: chrono::Utc::now(),
            values,
        }
    }

    #[test]
    fn assert_event_count_matches_length() {
        let events = vec![event("t1", fixtures::heartbeat("vscode"))];
        assert!(assert_event_count(&events, 1).is_ok());
        assert!(assert_event_count(&events, 2).is_err());
    }

    #[test]
    fn assert_all_event_type_rejects_a_mismatch() {
        let events = vec![
            event("t1", fixtures::heartbeat("vscode")),
            event("t1", fixtures::calendar_delta("e1", "Standup", "now")),
        ];
        assert!(assert_all_event_type(&events, "prod.heartbeat").is_err());
    }

    #[test]
    fn assert_thread_has_events_finds_the_thread() {
        let events = vec![event("t1", fixtures::heartbeat("vscode"))];
        assert!(assert_thread_has_events(&events, "t1").is_ok());
        assert!(assert_thread_has_events(&events, "t2").is_err());
    }
}
