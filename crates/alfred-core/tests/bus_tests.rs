use alfred_core::{resolve_workspace_path, Bus};
use alfred_types::{Scalar, ScalarMap, ThreadId, UserId, WbId};
use std::path::PathBuf;

fn values(kind: &str) -> ScalarMap {
    let mut m = ScalarMap::new();
    m.insert("type".to_string(), Scalar::String(kind.to_string()));
    m
}

#[test]
fn resolve_workspace_path_with_explicit_override() {
    let result = resolve_workspace_path(Some("~/custom-alfred")).unwrap();
    let home = std::env::var("HOME").unwrap_or_default();
    if !home.is_empty() {
        assert_eq!(result, PathBuf::from(home).join("custom-alfred"));
    }
}

#[tokio::test]
async fn independent_users_do_not_see_each_others_appends() {
    let bus = Bus::default();
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    bus.append(&alice, ThreadId::new("t1"), values("prod.nudge"));
    let (bob_events, _) = bus.tail_with(
        &bob,
        WbId::ZERO,
        10,
        std::time::Duration::from_millis(10),
    ).await;
    assert!(bob_events.is_empty());
}

#[tokio::test]
async fn tail_delivers_events_in_append_order() {
    let bus = Bus::default();
    let user = UserId::new("alice");
    for kind in ["prod.nudge", "prod.underrun", "prod.overrun"] {
        bus.append(&user, ThreadId::new("t1"), values(kind));
    }
    let (events, _) = bus.tail(&user, WbId::ZERO).await;
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| e.type_field().unwrap())
        .collect();
    assert_eq!(kinds, vec!["prod.nudge", "prod.underrun", "prod.overrun"]);
}
