use crate::error::Result;
use alfred_types::UserId;
use futures::future::BoxFuture;

/// Common interface for the four per-user subagents (C7-C10): Calendar-
/// Planner, Productivity, Email-Triage, Mailer. Each either drains a bounded
/// batch from an input stream, or does timer-driven work when there's
/// nothing to drain.
///
/// Async methods return a manually boxed future rather than using an
/// `async-trait` macro, keeping this trait object-safe without adding that
/// dependency.
pub trait Subagent: Send + Sync {
    /// Stable role identifier (`"calendar_planner"`, `"productivity"`,
    /// `"email_triage"`, `"mailer"`), used by the registry and by C12
    /// metrics labeling.
    fn id(&self) -> &'static str;

    fn user_id(&self) -> &UserId;

    /// Drains up to `batch` entries from this subagent's input stream,
    /// processing each one. Returns the number actually consumed (0 means
    /// nothing was waiting). §5: a worker processes a bounded batch (≤10)
    /// before yielding.
    fn consume_batch(&self, batch: usize) -> BoxFuture<'_, Result<usize>>;

    /// Timer-driven work with no inbound event: mismatch timers (C8),
    /// degraded-mode recovery checks (C12), midnight/DST rollovers (C12).
    fn tick(&self) -> BoxFuture<'_, Result<()>>;
}
