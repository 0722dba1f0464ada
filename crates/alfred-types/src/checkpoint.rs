use crate::ids::{ThreadId, UserId, WbId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Durable per-`(user, thread)` state the Runtime Worker (C6) uses to resume
/// safely and the Manager Graph (C4) uses to enforce idempotency (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub last_wb_id_processed: WbId,
    pub last_plan_id: Option<String>,
    pub last_plan_version: Option<u64>,
    pub pending_prompt_id: Option<String>,
    pub side_effects_log: BTreeSet<SideEffectKey>,
}

impl Checkpoint {
    pub fn new(user_id: UserId, thread_id: ThreadId) -> Self {
        Self {
            user_id,
            thread_id,
            last_wb_id_processed: WbId::ZERO,
            last_plan_id: None,
            last_plan_version: None,
            pending_prompt_id: None,
            side_effects_log: BTreeSet::new(),
        }
    }

    /// §4.5 `should_skip`: true iff `wb_id` is not strictly after the last
    /// one this checkpoint has processed.
    pub fn should_skip(&self, wb_id: WbId) -> bool {
        wb_id <= self.last_wb_id_processed
    }

    /// Records a side-effect key, returning whether it was newly inserted
    /// (false means the caller already performed this side-effect and must
    /// not repeat it — §4.4 idempotent node contract).
    pub fn record_side_effect(&mut self, key: SideEffectKey) -> bool {
        self.side_effects_log.insert(key)
    }

    pub fn has_side_effect(&self, key: &SideEffectKey) -> bool {
        self.side_effects_log.contains(key)
    }

    pub fn advance(&mut self, wb_id: WbId) {
        if wb_id > self.last_wb_id_processed {
            self.last_wb_id_processed = wb_id;
        }
    }
}

/// `(user, thread, wb_id, node_name)` idempotency key recorded before an
/// external side-effect (Planner call, prod-recalc signal, mail send) is
/// allowed to run a second time for the same inbound event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SideEffectKey {
    pub wb_id: WbId,
    pub node_name: String,
}

impl SideEffectKey {
    pub fn new(wb_id: WbId, node_name: impl Into<String>) -> Self {
        Self {
            wb_id,
            node_name: node_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("u1")
    }

    fn thread() -> ThreadId {
        ThreadId::new("t1").unwrap()
    }

    #[test]
    fn should_skip_is_inclusive_of_last_processed() {
        let mut cp = Checkpoint::new(user(), thread());
        cp.advance(WbId::new(10, 0));
        assert!(cp.should_skip(WbId::new(10, 0)));
        assert!(cp.should_skip(WbId::new(5, 0)));
        assert!(!cp.should_skip(WbId::new(10, 1)));
    }

    #[test]
    fn side_effect_recorded_exactly_once() {
        let mut cp = Checkpoint::new(user(), thread());
        let key = SideEffectKey::new(WbId::new(1, 0), "planner_call");
        assert!(cp.record_side_effect(key.clone()));
        assert!(!cp.record_side_effect(key.clone()));
        assert!(cp.has_side_effect(&key));
    }

    #[test]
    fn advance_never_moves_backward() {
        let mut cp = Checkpoint::new(user(), thread());
        cp.advance(WbId::new(10, 0));
        cp.advance(WbId::new(5, 0));
        assert_eq!(cp.last_wb_id_processed, WbId::new(10, 0));
    }
}
