//! Builders for sample whiteboard payloads.
//!
//! Provides ready-made `ScalarMap` values for every role the fabric
//! recognizes (§6.2's `TypedEvent` taxonomy), so integration tests can seed
//! a [`crate::TestWorld`] without hand-writing a `ScalarMap` literal per
//! test.

use alfred_types::{Scalar, ScalarMap};

/// A calendar delta, as the shadow-calendar sync would append it.
pub fn calendar_delta(event_id: &str, summary: &str, start_iso: &str) -> ScalarMap {
    let mut values = ScalarMap::new();
    values.insert(
        "type".to_string(),
        Scalar::String("calendar.delta".to_string()),
    );
    values.insert("event_id".to_string(), Scalar::String(event_id.to_string()));
    values.insert("summary".to_string(), Scalar::String(summary.to_string()));
    values.insert("start".to_string(), Scalar::String(start_iso.to_string()));
    values
}

/// A productivity heartbeat, as the OS-activity collector would append it.
pub fn heartbeat(app_label: &str) -> ScalarMap {
    let mut values = ScalarMap::new();
    values.insert(
        "type".to_string(),
        Scalar::String("prod.heartbeat".to_string()),
    );
    values.insert(
        "app_label".to_string(),
        Scalar::String(app_label.to_string()),
    );
    values
}

/// An inbound email candidate, as the mail poller would append it.
pub fn email_candidate(message_id: &str, from: &str, subject: &str) -> ScalarMap {
    let mut values = ScalarMap::new();
    values.insert(
        "type".to_string(),
        Scalar::String("email.candidate".to_string()),
    );
    values.insert(
        "message_id".to_string(),
        Scalar::String(message_id.to_string()),
    );
    values.insert("from".to_string(), Scalar::String(from.to_string()));
    values.insert("subject".to_string(), Scalar::String(subject.to_string()));
    values
}

/// A confirmed user choice, matching what `POST /wb/user_action` (C11)
/// appends.
pub fn user_action(action_id: &str, choice: &str) -> ScalarMap {
    let mut values = ScalarMap::new();
    values.insert(
        "type".to_string(),
        Scalar::String("manager.user_action".to_string()),
    );
    values.insert(
        "action_id".to_string(),
        Scalar::String(action_id.to_string()),
    );
    values.insert("choice".to_string(), Scalar::String(choice.to_string()));
    values
}
