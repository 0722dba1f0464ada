use alfred_types::{
    CalendarImpact, CalendarPlanNewVersion, CalendarPlanProposed, EmailReplyNeeded, Envelope,
    ManagerPrompt, ManagerUserAction, ProdBlockEvent, Scalar, ScalarMap, TypedEvent, UserChoice,
    WbId, WhiteboardEvent,
};
use std::fmt;
use std::str::FromStr;

/// Errors the Normalizer (C3) raises when a whiteboard entry can't be turned
/// into one of the closed set of typed events (§6.2). Every variant is
/// terminal: the caller logs and drops the entry rather than retrying, per
/// §7 "Dead-letter / unknown type".
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Neither `type` nor `kind` was present in `values`.
    MissingType,
    /// `type`/`kind` did not match one of the eight taxonomy entries.
    UnknownType(String),
    /// A required payload key for the matched variant was absent.
    MissingField { event_type: &'static str, field: &'static str },
    /// A payload key was present but couldn't be coerced to the expected shape.
    InvalidField {
        event_type: &'static str,
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::MissingType => {
                write!(f, "whiteboard entry has neither `type` nor `kind`")
            }
            NormalizeError::UnknownType(t) => write!(f, "unknown whiteboard event type: {t:?}"),
            NormalizeError::MissingField { event_type, field } => {
                write!(f, "{event_type}: missing required field `{field}`")
            }
            NormalizeError::InvalidField {
                event_type,
                field,
                reason,
            } => write!(f, "{event_type}: field `{field}` invalid: {reason}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Maps a whiteboard entry's `type` (falling back to `kind`) onto the closed
/// taxonomy in §6.2, projecting its loosely-typed `values` into the
/// variant's payload schema and dropping extraneous keys (§4.3).
pub fn normalize(event: &WhiteboardEvent) -> Result<Envelope, NormalizeError> {
    let type_tag = event.type_field().ok_or(NormalizeError::MissingType)?;

    let typed = match type_tag {
        "calendar.plan.proposed" => {
            TypedEvent::CalendarPlanProposed(CalendarPlanProposed {
                delta_id: require_str(&event.values, "calendar.plan.proposed", "delta_id")?,
                summary: require_str(&event.values, "calendar.plan.proposed", "summary")?,
                impact: require_impact(&event.values, "calendar.plan.proposed")?,
            })
        }
        "calendar.plan.new_version" => {
            TypedEvent::CalendarPlanNewVersion(CalendarPlanNewVersion {
                plan_id: require_str(&event.values, "calendar.plan.new_version", "plan_id")?,
                version: require_u64(&event.values, "calendar.plan.new_version", "version")?,
            })
        }
        "prod.underrun" => TypedEvent::ProdUnderrun(require_prod_block(&event.values, "prod.underrun")?),
        "prod.overrun" => TypedEvent::ProdOverrun(require_prod_block(&event.values, "prod.overrun")?),
        "prod.nudge" => TypedEvent::ProdNudge(require_prod_block(&event.values, "prod.nudge")?),
        "email.reply_needed" => TypedEvent::EmailReplyNeeded(EmailReplyNeeded {
            message_id: require_str(&event.values, "email.reply_needed", "message_id")?,
            sender: require_str(&event.values, "email.reply_needed", "sender")?,
            summary: require_str(&event.values, "email.reply_needed", "summary")?,
            draft: require_str(&event.values, "email.reply_needed", "draft")?,
        }),
        "manager.user_action" => TypedEvent::ManagerUserAction(ManagerUserAction {
            action_id: require_str(&event.values, "manager.user_action", "action_id")?,
            choice: require_choice(&event.values, "manager.user_action")?,
            metadata: event
                .values
                .get("metadata")
                .map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)),
        }),
        "manager.prompt" => TypedEvent::ManagerPrompt(ManagerPrompt {
            content: require_str(&event.values, "manager.prompt", "content")?,
            options: require_choice_list(&event.values, "manager.prompt")?,
            action_id: require_str(&event.values, "manager.prompt", "action_id")?,
            wb_parent_id: require_wb_id(&event.values, "manager.prompt", "wb_parent_id")?,
        }),
        other => return Err(NormalizeError::UnknownType(other.to_string())),
    };

    Ok(Envelope {
        wb_id: event.wb_id,
        user_id: event.user_id.clone(),
        thread_id: event.thread_id.clone(),
        ts: event.ts,
        event: typed,
    })
}

fn field<'a>(values: &'a ScalarMap, event_type: &'static str, key: &'static str) -> Result<&'a Scalar, NormalizeError> {
    values
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or(NormalizeError::MissingField { event_type, field: key })
}

fn require_str(values: &ScalarMap, event_type: &'static str, key: &'static str) -> Result<String, NormalizeError> {
    field(values, event_type, key)?
        .clone()
        .into_string()
        .ok_or_else(|| NormalizeError::InvalidField {
            event_type,
            field: key,
            reason: "expected a string-coercible value".to_string(),
        })
}

fn require_u64(values: &ScalarMap, event_type: &'static str, key: &'static str) -> Result<u64, NormalizeError> {
    let v = field(values, event_type, key)?;
    v.as_i64()
        .filter(|n| *n >= 0)
        .map(|n| n as u64)
        .ok_or_else(|| NormalizeError::InvalidField {
            event_type,
            field: key,
            reason: "expected a non-negative integer".to_string(),
        })
}

fn require_wb_id(values: &ScalarMap, event_type: &'static str, key: &'static str) -> Result<WbId, NormalizeError> {
    let raw = require_str(values, event_type, key)?;
    WbId::from_str(&raw).map_err(|_| NormalizeError::InvalidField {
        event_type,
        field: key,
        reason: "expected a `<millis>-<seq>` whiteboard id".to_string(),
    })
}

fn require_prod_block(values: &ScalarMap, event_type: &'static str) -> Result<ProdBlockEvent, NormalizeError> {
    Ok(ProdBlockEvent {
        block_id: require_str(values, event_type, "block_id")?,
        activity_label: require_str(values, event_type, "activity_label")?,
    })
}

fn require_impact(values: &ScalarMap, event_type: &'static str) -> Result<CalendarImpact, NormalizeError> {
    let raw = require_str(values, event_type, "impact")?;
    match raw.as_str() {
        "today" => Ok(CalendarImpact::Today),
        "future" => Ok(CalendarImpact::Future),
        "none" => Ok(CalendarImpact::None),
        other => Err(NormalizeError::InvalidField {
            event_type,
            field: "impact",
            reason: format!("expected today|future|none, got {other:?}"),
        }),
    }
}

fn require_choice(values: &ScalarMap, event_type: &'static str) -> Result<UserChoice, NormalizeError> {
    let raw = require_str(values, event_type, "choice")?;
    UserChoice::parse(&raw).ok_or_else(|| NormalizeError::InvalidField {
        event_type,
        field: "choice",
        reason: format!("unrecognized choice {raw:?}"),
    })
}

fn require_choice_list(values: &ScalarMap, event_type: &'static str) -> Result<Vec<UserChoice>, NormalizeError> {
    let raw = field(values, event_type, "options")?;
    let items = raw.as_array().ok_or_else(|| NormalizeError::InvalidField {
        event_type,
        field: "options",
        reason: "expected an array".to_string(),
    })?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .and_then(UserChoice::parse)
                .ok_or_else(|| NormalizeError::InvalidField {
                    event_type,
                    field: "options",
                    reason: format!("unrecognized choice in options: {v:?}"),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_types::{ThreadId, UserId};
    use chrono::Utc;

    fn wb_event(type_tag: &str, extra: &[(&str, Scalar)]) -> WhiteboardEvent {
        let mut values = ScalarMap::new();
        values.insert("type".to_string(), Scalar::String(type_tag.to_string()));
        for (k, v) in extra {
            values.insert(k.to_string(), v.clone());
        }
        WhiteboardEvent {
            wb_id: WbId::new(1, 0),
            user_id: UserId::new("u1"),
            thread_id: ThreadId::new("t1").unwrap(),
            ts: Utc::now(),
            values,
        }
    }

    #[test]
    fn normalizes_prod_overrun() {
        let event = wb_event(
            "prod.overrun",
            &[
                ("block_id", Scalar::String("B1".into())),
                ("activity_label", Scalar::String("coding".into())),
            ],
        );
        let envelope = normalize(&event).unwrap();
        match envelope.event {
            TypedEvent::ProdOverrun(p) => {
                assert_eq!(p.block_id, "B1");
                assert_eq!(p.activity_label, "coding");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let event = wb_event("unknown.event", &[]);
        assert_eq!(
            normalize(&event),
            Err(NormalizeError::UnknownType("unknown.event".to_string()))
        );
    }

    #[test]
    fn missing_type_is_rejected() {
        let mut event = wb_event("prod.overrun", &[]);
        event.values.remove("type");
        assert_eq!(normalize(&event), Err(NormalizeError::MissingType));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let event = wb_event("prod.overrun", &[("block_id", Scalar::String("B1".into()))]);
        assert_eq!(
            normalize(&event),
            Err(NormalizeError::MissingField {
                event_type: "prod.overrun",
                field: "activity_label",
            })
        );
    }

    #[test]
    fn coerces_int_version_from_string() {
        let event = wb_event(
            "calendar.plan.new_version",
            &[
                ("plan_id", Scalar::String("plan-1".into())),
                ("version", Scalar::String("3".into())),
            ],
        );
        let envelope = normalize(&event).unwrap();
        match envelope.event {
            TypedEvent::CalendarPlanNewVersion(p) => assert_eq!(p.version, 3),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_kind_field() {
        let mut values = ScalarMap::new();
        values.insert("kind".to_string(), Scalar::String("prod.nudge".to_string()));
        values.insert("block_id".to_string(), Scalar::String("B1".into()));
        values.insert("activity_label".to_string(), Scalar::String("deep-work".into()));
        let event = WhiteboardEvent {
            wb_id: WbId::new(1, 0),
            user_id: UserId::new("u1"),
            thread_id: ThreadId::new("t1").unwrap(),
            ts: Utc::now(),
            values,
        };
        assert!(normalize(&event).is_ok());
    }

    #[test]
    fn rejects_unrecognized_choice() {
        let event = wb_event("manager.user_action", &[
            ("action_id", Scalar::String("a1".into())),
            ("choice", Scalar::String("frobnicate".into())),
        ]);
        assert!(matches!(
            normalize(&event),
            Err(NormalizeError::InvalidField { field: "choice", .. })
        ));
    }
}
