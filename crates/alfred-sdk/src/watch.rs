use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::Stream;

use alfred_core::Bus;
use alfred_core::DEFAULT_TAIL_TIMEOUT;
use alfred_types::{UserId, WbId, WhiteboardEvent};

/// Builds a live tail over one user's whiteboard, bridging the polling
/// `Bus::tail_with` loop to an async `Stream` an embedder can consume with
/// `futures::StreamExt`. This is the same mechanism the Runtime Worker (C6)
/// and the HTTP subscriber endpoints (C2) drive internally.
pub struct WatchBuilder {
    bus: Arc<Bus>,
    user_id: UserId,
    after_id: WbId,
}

impl WatchBuilder {
    pub(crate) fn new(bus: Arc<Bus>, user_id: UserId) -> Self {
        Self {
            bus,
            user_id,
            after_id: WbId::ZERO,
        }
    }

    /// Resume from strictly after `after_id` instead of the start of the log.
    pub fn after(mut self, after_id: WbId) -> Self {
        self.after_id = after_id;
        self
    }

    pub fn start(self) -> LiveStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bus = self.bus;
        let user_id = self.user_id;
        let mut cursor = self.after_id;

        tokio::spawn(async move {
            loop {
                let (events, next_id) = bus.tail_with(&user_id, cursor, 50, DEFAULT_TAIL_TIMEOUT).await;
                if events.is_empty() {
                    cursor = next_id;
                    continue;
                }
                for event in events {
                    cursor = event.wb_id;
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        LiveStream { receiver: rx }
    }
}

pub struct LiveStream {
    receiver: tokio::sync::mpsc::UnboundedReceiver<WhiteboardEvent>,
}

impl LiveStream {
    /// Poll for the next event without awaiting; `None` if nothing is ready.
    pub fn try_next(&mut self) -> Option<WhiteboardEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for LiveStream {
    type Item = WhiteboardEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_types::{Scalar, ScalarMap, ThreadId};
    use futures::StreamExt;

    fn values() -> ScalarMap {
        let mut m = ScalarMap::new();
        m.insert("type".to_string(), Scalar::String("prod.nudge".to_string()));
        m
    }

    #[tokio::test]
    async fn watch_yields_appends_made_after_start() {
        let bus = Arc::new(Bus::default());
        let user_id = UserId::new("u1");
        let mut stream = WatchBuilder::new(bus.clone(), user_id.clone()).start();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.append(&user_id, ThreadId::new("t1"), values());

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.user_id, user_id);
    }
}
