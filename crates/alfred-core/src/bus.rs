use alfred_types::{ScalarMap, ThreadId, UserId, WbId, WhiteboardEvent};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Default approximate retention length for a user's whiteboard (§6.6
/// `maxlen_approx`).
pub const DEFAULT_MAXLEN_APPROX: usize = 1000;

/// Default bound on how many events `tail()` returns per call (§4.1).
pub const DEFAULT_BATCH_COUNT: usize = 50;

/// Default bound on how long `tail()` blocks waiting for new events (§4.1).
pub const DEFAULT_TAIL_TIMEOUT: Duration = Duration::from_secs(5);

struct UserStream {
    log: VecDeque<WhiteboardEvent>,
    next_seq_for_millis: (u64, u64),
    sender: broadcast::Sender<WhiteboardEvent>,
}

impl UserStream {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_BATCH_COUNT.max(64));
        Self {
            log: VecDeque::new(),
            next_seq_for_millis: (0, 0),
            sender,
        }
    }

    fn next_id(&mut self) -> WbId {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let seq = if self.next_seq_for_millis.0 == millis {
            self.next_seq_for_millis.1 + 1
        } else {
            0
        };
        self.next_seq_for_millis = (millis, seq);
        WbId::new(millis, seq)
    }
}

/// The Whiteboard Bus (C1): a per-user append-only event log with live
/// fan-out to tailers. In-process storage backed by an approximate-length
/// ring; durable persistence/cold-start replay is layered on top by callers
/// that also write through to `alfred-index`.
pub struct Bus {
    maxlen_approx: usize,
    streams: Mutex<HashMap<UserId, UserStream>>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_MAXLEN_APPROX)
    }
}

impl Bus {
    pub fn new(maxlen_approx: usize) -> Self {
        Self {
            maxlen_approx,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a new entry to `user_id`'s whiteboard and returns its id.
    /// `thread_id` is stamped into the values if absent, defaulting to the
    /// system thread (§9 Open Question 3) rather than rejecting the write.
    pub fn append(
        &self,
        user_id: &UserId,
        thread_id: Option<ThreadId>,
        mut values: ScalarMap,
    ) -> WbId {
        let thread_id = thread_id.unwrap_or_else(ThreadId::system);
        values.insert(
            "thread_id".to_string(),
            alfred_types::Scalar::String(thread_id.as_str().to_string()),
        );

        let mut streams = self.streams.lock().expect("bus lock poisoned");
        let stream = streams
            .entry(user_id.clone())
            .or_insert_with(UserStream::new);
        let wb_id = stream.next_id();
        let event = WhiteboardEvent {
            wb_id,
            user_id: user_id.clone(),
            thread_id,
            ts: Utc::now(),
            values,
        };

        stream.log.push_back(event.clone());
        while stream.log.len() > self.maxlen_approx {
            stream.log.pop_front();
        }
        // A lagging or absent receiver must never block an append.
        let _ = stream.sender.send(event);

        wb_id
    }

    /// Subscribes to live appends for `user_id`, for use by subscriber
    /// endpoints (C2) and the Runtime Worker's tail loop (C6).
    fn subscribe(&self, user_id: &UserId) -> broadcast::Receiver<WhiteboardEvent> {
        let mut streams = self.streams.lock().expect("bus lock poisoned");
        streams
            .entry(user_id.clone())
            .or_insert_with(UserStream::new)
            .sender
            .subscribe()
    }

    fn events_after(&self, user_id: &UserId, after_id: WbId, limit: usize) -> Vec<WhiteboardEvent> {
        let streams = self.streams.lock().expect("bus lock poisoned");
        match streams.get(user_id) {
            Some(stream) => stream
                .log
                .iter()
                .filter(|e| e.wb_id > after_id)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// §4.1 `tail`: blocks up to `timeout` waiting for entries strictly
    /// after `after_id`, returning at most `DEFAULT_BATCH_COUNT` of them and
    /// the highest id observed (unchanged if nothing new arrived).
    pub async fn tail(&self, user_id: &UserId, after_id: WbId) -> (Vec<WhiteboardEvent>, WbId) {
        self.tail_with(user_id, after_id, DEFAULT_BATCH_COUNT, DEFAULT_TAIL_TIMEOUT)
            .await
    }

    pub async fn tail_with(
        &self,
        user_id: &UserId,
        after_id: WbId,
        batch_count: usize,
        timeout: Duration,
    ) -> (Vec<WhiteboardEvent>, WbId) {
        let backlog = self.events_after(user_id, after_id, batch_count);
        if !backlog.is_empty() {
            let next_id = backlog.last().map(|e| e.wb_id).unwrap_or(after_id);
            return (backlog, next_id);
        }

        let mut rx = self.subscribe(user_id);
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) if event.wb_id > after_id => {
                    collected.push(event);
                    if collected.len() >= batch_count {
                        break;
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    // Fall back to the durable backlog rather than miss events.
                    collected = self.events_after(user_id, after_id, batch_count);
                    break;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }

        let next_id = collected.last().map(|e| e.wb_id).unwrap_or(after_id);
        (collected, next_id)
    }
}

/// Sibling of `Bus` for the input streams (`user:{U}:in:{role}`) and control
/// channels (`user:{U}:control:{channel}`) that feed the subagents (C7-C10),
/// per §6.1. These are not the whiteboard: they carry raw external deliveries
/// (calendar deltas, heartbeats, recompute signals) that a subagent consumes
/// and, in most cases, never itself appears on `user:{U}:wb`. Namespacing by
/// stream key reuses `Bus`'s append/tail/broadcast machinery unchanged rather
/// than duplicating it.
pub struct ChannelBus {
    bus: Bus,
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAXLEN_APPROX)
    }
}

impl ChannelBus {
    pub fn new(maxlen_approx: usize) -> Self {
        Self {
            bus: Bus::new(maxlen_approx),
        }
    }

    fn namespaced(stream_key: &str) -> UserId {
        UserId::new(stream_key)
    }

    pub fn append(&self, stream_key: &str, thread_id: Option<ThreadId>, values: ScalarMap) -> WbId {
        self.bus.append(&Self::namespaced(stream_key), thread_id, values)
    }

    pub async fn tail(
        &self,
        stream_key: &str,
        after_id: WbId,
        batch_count: usize,
        timeout: Duration,
    ) -> (Vec<WhiteboardEvent>, WbId) {
        self.bus
            .tail_with(&Self::namespaced(stream_key), after_id, batch_count, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_types::Scalar;

    fn values(kind: &str) -> ScalarMap {
        let mut m = ScalarMap::new();
        m.insert("type".to_string(), Scalar::String(kind.to_string()));
        m
    }

    #[test]
    fn append_stamps_system_thread_when_absent() {
        let bus = Bus::default();
        let user = UserId::new("u1");
        bus.append(&user, None, values("prod.nudge"));
        let events = bus.events_after(&user, WbId::ZERO, 10);
        assert_eq!(events[0].thread_id.as_str(), "system");
    }

    #[tokio::test]
    async fn append_then_tail_returns_backlog_immediately() {
        let bus = Bus::default();
        let user = UserId::new("u1");
        bus.append(&user, ThreadId::new("t1"), values("prod.nudge"));
        let (events, next_id) = bus.tail(&user, WbId::ZERO).await;
        assert_eq!(events.len(), 1);
        assert_eq!(next_id, events[0].wb_id);
    }

    #[tokio::test]
    async fn tail_respects_total_order_across_appends() {
        let bus = Bus::default();
        let user = UserId::new("u1");
        let id1 = bus.append(&user, ThreadId::new("t1"), values("prod.nudge"));
        let id2 = bus.append(&user, ThreadId::new("t1"), values("prod.underrun"));
        assert!(id1 < id2);
        let (events, next_id) = bus.tail(&user, id1).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wb_id, id2);
        assert_eq!(next_id, id2);
    }

    #[tokio::test]
    async fn tail_times_out_with_no_new_events() {
        let bus = Bus::default();
        let user = UserId::new("u1");
        let id = bus.append(&user, ThreadId::new("t1"), values("prod.nudge"));
        let (events, next_id) = bus
            .tail_with(&user, id, DEFAULT_BATCH_COUNT, Duration::from_millis(20))
            .await;
        assert!(events.is_empty());
        assert_eq!(next_id, id);
    }

    #[test]
    fn maxlen_approx_trims_oldest_entries() {
        let bus = Bus::new(2);
        let user = UserId::new("u1");
        bus.append(&user, ThreadId::new("t1"), values("a"));
        bus.append(&user, ThreadId::new("t1"), values("b"));
        bus.append(&user, ThreadId::new("t1"), values("c"));
        let events = bus.events_after(&user, WbId::ZERO, 10);
        assert_eq!(events.len(), 2);
    }
}
