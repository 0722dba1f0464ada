//! The Runtime Worker (C6, §4.6): one long-lived loop per user that tails
//! the whiteboard (C1), normalizes (C3), drives the Manager Graph (C4), and
//! advances the per-thread Checkpoint (C5) on success.
//!
//! The worker's own resume cursor — "where in the user's whiteboard did I
//! last leave off" — is distinct from a thread's `Checkpoint.last_wb_id_processed`
//! (which guards idempotency for that thread specifically). It's persisted
//! through the same `input_stream_offsets` mechanism `alfred-index` already
//! uses for C7-C9's external streams (§9 Open Question: `start_after_id`
//! empty resolves to this persisted cursor if one exists, else to
//! `WbId::ZERO`, since the in-process Bus has no independent "current tail"
//! to diff an empty cursor against).

use crate::error::Result;
use crate::policy::Metrics;
use alfred_core::Bus;
use alfred_engine::{normalize, run_graph, GraphDeps};
use alfred_index::Database;
use alfred_types::{InputStreamOffset, UserId, WbId};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// §5 "a single cooperative loop processes a bounded batch (≤10) before
/// yielding".
const BATCH_CEILING: usize = 10;
/// §4.6 step 3 "backoff ~350ms" after a graph error.
const GRAPH_ERROR_BACKOFF: Duration = Duration::from_millis(350);
/// §4.1 `tail`'s own default block; the worker loops on top of this.
const TAIL_TIMEOUT: Duration = Duration::from_secs(5);

pub const RUNTIME_ROLE: &str = "runtime";

/// Runs the Runtime Worker loop for a single user until `cancel` fires.
pub struct Worker {
    user_id: UserId,
    bus: Arc<Bus>,
    db: Arc<Database>,
    graph_deps: GraphDeps,
    metrics: Arc<Metrics>,
}

impl Worker {
    pub fn new(
        user_id: UserId,
        bus: Arc<Bus>,
        db: Arc<Database>,
        graph_deps: GraphDeps,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            user_id,
            bus,
            db,
            graph_deps,
            metrics,
        }
    }

    fn cursor_stream_key(&self) -> String {
        format!("user:{}:wb", self.user_id.as_str())
    }

    fn load_cursor(&self, start_after_id: Option<WbId>) -> Result<WbId> {
        if let Some(offset) = self.db.get_input_offset(&self.cursor_stream_key())? {
            if let Ok(id) = WbId::from_str(&offset.last_entry_id) {
                return Ok(id);
            }
        }
        Ok(start_after_id.unwrap_or(WbId::ZERO))
    }

    fn save_cursor(&self, id: WbId) -> Result<()> {
        self.db.save_input_offset(&InputStreamOffset {
            stream_key: self.cursor_stream_key(),
            last_entry_id: id.to_string(),
        })?;
        Ok(())
    }

    /// §4.6: tail → normalize → should_skip → graph.run → advance-on-success.
    /// Runs until `cancel` is triggered; a cancellation mid-batch drains the
    /// in-flight event (best-effort) and only persists the checkpoint if the
    /// graph run it was attached to completed (§5 "Cancellation & timeouts").
    pub async fn run(&self, start_after_id: Option<WbId>, cancel: CancellationToken) -> Result<()> {
        let mut cursor = self.load_cursor(start_after_id)?;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let (events, next_id) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.bus.tail_with(&self.user_id, cursor, BATCH_CEILING, TAIL_TIMEOUT) => result,
            };

            for event in &events {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.db.archive_whiteboard_event(event)?;

                let envelope = match normalize(event) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        // §7 "Dead-letter / unknown type": drop and advance past it.
                        tracing::warn!(wb_id = %event.wb_id, user = %self.user_id, error = %err, "dropping unnormalizable whiteboard entry");
                        cursor = event.wb_id;
                        self.save_cursor(cursor)?;
                        continue;
                    }
                };

                let mut checkpoint = self.db.get_checkpoint(&envelope.user_id, &envelope.thread_id)?;
                if checkpoint.should_skip(envelope.wb_id) {
                    cursor = event.wb_id;
                    self.save_cursor(cursor)?;
                    continue;
                }

                match run_graph(&envelope, &mut checkpoint, &self.graph_deps).await {
                    Ok(outcome) => {
                        checkpoint.advance(envelope.wb_id);
                        self.db.save_checkpoint(&checkpoint)?;
                        cursor = event.wb_id;
                        self.save_cursor(cursor)?;
                        self.metrics.record_processed(self.user_id.as_str(), RUNTIME_ROLE);
                        if !outcome.appended.is_empty() {
                            self.metrics.record_prompt_emitted(self.user_id.as_str(), RUNTIME_ROLE);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(wb_id = %event.wb_id, user = %self.user_id, error = %err, "graph run failed, checkpoint not advanced");
                        self.metrics.record_error(self.user_id.as_str(), RUNTIME_ROLE);
                        tokio::time::sleep(GRAPH_ERROR_BACKOFF).await;
                        // The batch is in ascending wb_id order; stop here so `cursor`
                        // stays behind this event and it gets re-tailed and retried,
                        // rather than a later event in the batch skipping past it.
                        break;
                    }
                }
            }

            if events.is_empty() {
                cursor = next_id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_engine::{MailControlSink, MailSendConfirmed, PlannerCollaborator, PlannerRequest, PlannerResponse, ProdControlSink, ProdRecalcSignal, WhiteboardSink};
    use alfred_types::{Scalar, ScalarMap, ThreadId};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoopPlanner;
    impl PlannerCollaborator for NoopPlanner {
        fn run<'a>(&'a self, _request: &'a PlannerRequest) -> BoxFuture<'a, std::result::Result<PlannerResponse, String>> {
            Box::pin(async {
                Ok(PlannerResponse {
                    plan_id: "plan-1".to_string(),
                    version: 1,
                    timeline: vec![],
                    conflicts: vec![],
                    rationale: "ok".to_string(),
                })
            })
        }
    }

    struct NoopProdControl;
    impl ProdControlSink for NoopProdControl {
        fn send<'a>(&'a self, _signal: &'a ProdRecalcSignal) -> BoxFuture<'a, std::result::Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct NoopMailControl;
    impl MailControlSink for NoopMailControl {
        fn send<'a>(&'a self, _confirmed: &'a MailSendConfirmed) -> BoxFuture<'a, std::result::Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct BusSink(Arc<Bus>);
    impl WhiteboardSink for BusSink {
        fn append(&self, user_id: &UserId, thread_id: &ThreadId, values: ScalarMap) -> WbId {
            self.0.append(user_id, Some(thread_id.clone()), values)
        }
    }

    fn test_deps(bus: Arc<Bus>) -> GraphDeps {
        GraphDeps {
            planner: Arc::new(NoopPlanner),
            prod_control: Arc::new(NoopProdControl),
            mail_control: Arc::new(NoopMailControl),
            whiteboard: Arc::new(BusSink(bus)),
        }
    }

    fn prod_overrun_values() -> ScalarMap {
        let mut values = ScalarMap::new();
        values.insert("type".to_string(), Scalar::String("prod.overrun".to_string()));
        values.insert("block_id".to_string(), Scalar::String("B1".to_string()));
        values.insert("activity_label".to_string(), Scalar::String("coding".to_string()));
        values
    }

    #[tokio::test]
    async fn processes_one_event_and_advances_checkpoint() {
        let bus = Arc::new(Bus::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = UserId::new("u1");
        let thread_id = ThreadId::new("t1").unwrap();
        let wb_id = bus.append(&user_id, Some(thread_id.clone()), prod_overrun_values());

        let worker = Worker::new(user_id.clone(), bus.clone(), db.clone(), test_deps(bus.clone()), Arc::new(Metrics::new()));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(None, token).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let checkpoint = db.get_checkpoint(&user_id, &thread_id).unwrap();
        assert_eq!(checkpoint.last_wb_id_processed, wb_id);
    }

    #[tokio::test]
    async fn unnormalizable_event_is_skipped_without_blocking_the_cursor() {
        let bus = Arc::new(Bus::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = UserId::new("u1");
        let mut bad_values = ScalarMap::new();
        bad_values.insert("type".to_string(), Scalar::String("unknown.event".to_string()));
        bus.append(&user_id, ThreadId::new("t1"), bad_values);

        let worker = Worker::new(user_id.clone(), bus.clone(), db.clone(), test_deps(bus.clone()), Arc::new(Metrics::new()));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(None, token).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let offset = db.get_input_offset("user:u1:wb").unwrap();
        assert!(offset.is_some());
    }

    struct FlakyPlanner {
        calls: AtomicU32,
    }
    impl PlannerCollaborator for FlakyPlanner {
        fn run<'a>(&'a self, _request: &'a PlannerRequest) -> BoxFuture<'a, std::result::Result<PlannerResponse, String>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err("planner unavailable".to_string());
                }
                Ok(PlannerResponse {
                    plan_id: "plan-1".to_string(),
                    version: 1,
                    timeline: vec![],
                    conflicts: vec![],
                    rationale: "ok".to_string(),
                })
            })
        }
    }

    fn calendar_plan_proposed_values(delta_id: &str) -> ScalarMap {
        let mut values = ScalarMap::new();
        values.insert("type".to_string(), Scalar::String("calendar.plan.proposed".to_string()));
        values.insert("delta_id".to_string(), Scalar::String(delta_id.to_string()));
        values.insert("summary".to_string(), Scalar::String("moved standup".to_string()));
        values.insert("impact".to_string(), Scalar::String("future".to_string()));
        values
    }

    /// Regression test for a fixed bug: a graph-node failure on an earlier
    /// event in a batch must not let a later event in the same batch advance
    /// the persisted cursor past the failed one, or the failed event would
    /// never be re-tailed and retried.
    #[tokio::test]
    async fn graph_failure_stops_the_batch_so_the_failed_event_is_retried() {
        let bus = Arc::new(Bus::default());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = UserId::new("u1");
        let thread_id = ThreadId::new("t1").unwrap();
        let first = bus.append(&user_id, Some(thread_id.clone()), calendar_plan_proposed_values("d1"));
        let second = bus.append(&user_id, Some(thread_id.clone()), calendar_plan_proposed_values("d2"));

        let deps = GraphDeps {
            planner: Arc::new(FlakyPlanner { calls: AtomicU32::new(0) }),
            prod_control: Arc::new(NoopProdControl),
            mail_control: Arc::new(NoopMailControl),
            whiteboard: Arc::new(BusSink(bus.clone())),
        };

        let worker = Worker::new(user_id.clone(), bus.clone(), db.clone(), deps, Arc::new(Metrics::new()));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(None, token).await });
        // Give the worker time to: fail on `first`, back off, retry `first`
        // (now succeeding), then process `second`.
        tokio::time::sleep(Duration::from_millis(600)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let checkpoint = db.get_checkpoint(&user_id, &thread_id).unwrap();
        assert_eq!(checkpoint.last_wb_id_processed, second);
        assert!(first < second);
    }
}
