//! Observability & Policy (C12): per-`(user, role)` counters the Runtime
//! Worker and each subagent report into, sampled by a `/metrics`-shaped
//! snapshot (§4.12 AMBIENT). No Prometheus exporter is wired up — out of
//! scope — but the counters are exposed so one could be bolted on.
//!
//! `alfred_agents::policy::DegradedGate` is the per-subagent rolling
//! error-rate window that *decides* degraded mode; this module only
//! *aggregates* counts from the outside, as that module's own doc comment
//! describes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Counters for one `(user, role)` pair. `role` is `"runtime"` for the
/// Runtime Worker itself, or a subagent role name (§4.10).
#[derive(Default)]
struct RoleCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    prompts_emitted: AtomicU64,
    external_calls: AtomicU64,
    external_errors: AtomicU64,
}

/// Point-in-time view of one `(user, role)`'s counters, for a `/metrics`-
/// shaped snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub prompts_emitted: u64,
    pub external_calls: u64,
    pub external_errors: u64,
}

/// Aggregates counters across every `(user, role)` the process is running.
#[derive(Default)]
pub struct Metrics {
    roles: RwLock<HashMap<(String, String), RoleCounters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_counters<R>(&self, user: &str, role: &str, f: impl FnOnce(&RoleCounters) -> R) -> R {
        {
            let roles = self.roles.read().expect("metrics lock poisoned");
            if let Some(counters) = roles.get(&(user.to_string(), role.to_string())) {
                return f(counters);
            }
        }
        let mut roles = self.roles.write().expect("metrics lock poisoned");
        let counters = roles
            .entry((user.to_string(), role.to_string()))
            .or_insert_with(RoleCounters::default);
        f(counters)
    }

    pub fn record_processed(&self, user: &str, role: &str) {
        self.with_counters(user, role, |c| {
            c.processed.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_error(&self, user: &str, role: &str) {
        self.with_counters(user, role, |c| {
            c.errors.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_prompt_emitted(&self, user: &str, role: &str) {
        self.with_counters(user, role, |c| {
            c.prompts_emitted.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_external_call(&self, user: &str, role: &str, ok: bool) {
        self.with_counters(user, role, |c| {
            c.external_calls.fetch_add(1, Ordering::Relaxed);
            if !ok {
                c.external_errors.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    /// Snapshot of every `(user, role)` this process has recorded counters
    /// for, keyed by `"{user}:{role}"`.
    pub fn snapshot(&self) -> HashMap<String, RoleSnapshot> {
        let roles = self.roles.read().expect("metrics lock poisoned");
        roles
            .iter()
            .map(|((user, role), counters)| {
                (
                    format!("{user}:{role}"),
                    RoleSnapshot {
                        processed: counters.processed.load(Ordering::Relaxed),
                        errors: counters.errors.load(Ordering::Relaxed),
                        prompts_emitted: counters.prompts_emitted.load(Ordering::Relaxed),
                        external_calls: counters.external_calls.load(Ordering::Relaxed),
                        external_errors: counters.external_errors.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_per_user_role_pair() {
        let metrics = Metrics::new();
        metrics.record_processed("u1", "runtime");
        metrics.record_processed("u1", "runtime");
        metrics.record_error("u1", "runtime");
        metrics.record_processed("u1", "productivity");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["u1:runtime"].processed, 2);
        assert_eq!(snapshot["u1:runtime"].errors, 1);
        assert_eq!(snapshot["u1:productivity"].processed, 1);
    }

    #[test]
    fn external_call_failure_increments_both_counters() {
        let metrics = Metrics::new();
        metrics.record_external_call("u1", "calendar_planner", false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["u1:calendar_planner"].external_calls, 1);
        assert_eq!(snapshot["u1:calendar_planner"].external_errors, 1);
    }
}
