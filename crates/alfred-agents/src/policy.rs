//! Degraded-mode gate (§4.12 C12, §5 backpressure): a per-subagent rolling
//! error-rate window that decides whether non-critical external calls
//! (Planner, classifier, mailer) should be paused while the subagent keeps
//! draining its input stream. Lives here rather than `alfred-runtime`
//! because `alfred-runtime` depends on `alfred-agents`, not the reverse —
//! each subagent owns its own gate; `alfred-runtime`'s `policy::Metrics`
//! aggregates from the outside via `Subagent::consume_batch`/`tick` outcomes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
const ENTER_THRESHOLD: f64 = 0.20;
const EXIT_THRESHOLD: f64 = 0.05;

struct Window {
    started_at: Instant,
    calls: u32,
    errors: u32,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            started_at: now,
            calls: 0,
            errors: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}

/// Tracks external-call outcomes over a sliding 60s window and flips a
/// degraded flag when the error rate crosses 20%, clearing it again once
/// the rate (over a fresh window) falls below 5% (§4.12).
pub struct DegradedGate {
    state: Mutex<(Window, bool)>,
}

impl Default for DegradedGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DegradedGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((Window::fresh(Instant::now()), false)),
        }
    }

    /// Whether non-critical external calls should be paused right now.
    pub fn is_degraded(&self) -> bool {
        self.state.lock().expect("degraded gate lock poisoned").1
    }

    /// Records the outcome of one external call and re-evaluates the gate.
    pub fn record(&self, ok: bool) {
        let now = Instant::now();
        let mut guard = self.state.lock().expect("degraded gate lock poisoned");
        if now.duration_since(guard.0.started_at) >= WINDOW {
            guard.0 = Window::fresh(now);
        }
        guard.0.calls += 1;
        if !ok {
            guard.0.errors += 1;
        }

        let rate = guard.0.error_rate();
        if !guard.1 && rate > ENTER_THRESHOLD {
            guard.1 = true;
            tracing::warn!(error_rate = rate, "entering degraded mode");
        } else if guard.1 && guard.0.calls >= 1 && rate < EXIT_THRESHOLD {
            guard.1 = false;
            tracing::info!(error_rate = rate, "exiting degraded mode");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enters_degraded_after_sustained_errors() {
        let gate = DegradedGate::new();
        for _ in 0..2 {
            gate.record(true);
        }
        for _ in 0..3 {
            gate.record(false);
        }
        assert!(gate.is_degraded());
    }

    #[test]
    fn stays_healthy_under_threshold() {
        let gate = DegradedGate::new();
        for _ in 0..9 {
            gate.record(true);
        }
        gate.record(false);
        assert!(!gate.is_degraded());
    }
}
