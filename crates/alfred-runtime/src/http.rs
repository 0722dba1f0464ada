//! Subscriber Endpoints (C2, §4.2) and User-Action Ingress (C11, §4.11): the
//! two authenticated, externally-facing surfaces the fabric exposes. Both are
//! read-only against the whiteboard except `/wb/user_action`, which is the
//! single write path a client uses to push a confirmed choice back in.
//!
//! Grounded on `sven-node`'s `http::ws` bridge for the WebSocket
//! `tokio::select!`/`recv`-loop shape, generalized here to a read-only replay-
//! then-tail forward rather than a bidirectional command bridge.

use alfred_core::{Bus, DEFAULT_TAIL_TIMEOUT};
use alfred_index::Database;
use alfred_types::{Scalar, ScalarMap, ThreadId, UserId, WbId, WhiteboardEvent};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// §4.2 "25-second keepalive comment".
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);
/// Bound on how many archived entries a cold-start replay fetches in one go.
const REPLAY_BATCH: usize = 200;

#[derive(Clone)]
pub struct HttpState {
    pub bus: Arc<Bus>,
    pub db: Arc<Database>,
}

/// Builds the axum `Router` exposing C2 (SSE + WebSocket) and C11 (HTTP
/// ingress). `alfred-cli`'s `serve` handler binds this to a listener.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users/{user_id}/whiteboard/stream", get(subscribe_sse))
        .route("/users/{user_id}/whiteboard/socket", get(subscribe_ws))
        .route("/wb/user_action", post(user_action))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct SubscribeQuery {
    after: Option<String>,
    thread_id: Option<String>,
}

fn parse_after(after: &Option<String>) -> WbId {
    after
        .as_deref()
        .and_then(|s| WbId::from_str(s).ok())
        .unwrap_or(WbId::ZERO)
}

fn event_matches(event: &WhiteboardEvent, thread_filter: &Option<String>) -> bool {
    match thread_filter {
        Some(t) => event.thread_id.as_str() == t,
        None => true,
    }
}

/// §4.2 event-stream push: replay everything archived after `after`, then
/// tail live appends, one `id:`/`data:` SSE frame per whiteboard entry, never
/// reordered. `Sse::keep_alive` supplies the 25s comment during idle periods.
async fn subscribe_sse(
    Path(user_id): Path<String>,
    Query(query): Query<SubscribeQuery>,
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let user_id = UserId::new(user_id);
    let after_id = parse_after(&query.after);
    let thread_filter = query.thread_id;

    let backlog: VecDeque<WhiteboardEvent> = state
        .db
        .replay_whiteboard_events_after(&user_id, after_id, REPLAY_BATCH)
        .unwrap_or_default()
        .into_iter()
        .collect();

    let stream = stream::unfold(
        (state, user_id, after_id, thread_filter, backlog),
        |(state, user_id, mut cursor, thread_filter, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    cursor = event.wb_id;
                    if !event_matches(&event, &thread_filter) {
                        continue;
                    }
                    let frame = to_sse_event(&event);
                    return Some((Ok(frame), (state, user_id, cursor, thread_filter, pending)));
                }

                let (events, next_id) = state.bus.tail(&user_id, cursor).await;
                cursor = next_id;
                if events.is_empty() {
                    continue;
                }
                pending = events.into();
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive"))
}

fn to_sse_event(event: &WhiteboardEvent) -> SseEvent {
    SseEvent::default()
        .id(event.wb_id.to_string())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// §4.2 full-duplex socket surface: same replay-then-tail semantics as the
/// SSE endpoint, framed as JSON text messages instead of `id:`/`data:` lines.
/// The connection is read-only; any inbound client frame is ignored rather
/// than rejected, since a disconnect is the only action a reader can take.
async fn subscribe_ws(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(query): Query<SubscribeQuery>,
    State(state): State<HttpState>,
) -> impl IntoResponse {
    let user_id = UserId::new(user_id);
    let after_id = parse_after(&query.after);
    let thread_filter = query.thread_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, after_id, thread_filter))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: HttpState,
    user_id: UserId,
    mut cursor: WbId,
    thread_filter: Option<String>,
) {
    let backlog = state
        .db
        .replay_whiteboard_events_after(&user_id, cursor, REPLAY_BATCH)
        .unwrap_or_default();
    for event in &backlog {
        cursor = event.wb_id;
        if event_matches(event, &thread_filter) && send_event(&mut socket, event).await.is_err() {
            return;
        }
    }

    let mut idle = Duration::ZERO;
    loop {
        tokio::select! {
            // A disconnect surfaces here as `None`/`Err`; any other inbound
            // frame is read-only noise on this surface and is dropped.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
            tailed = state.bus.tail(&user_id, cursor) => {
                let (events, next_id) = tailed;
                cursor = next_id;
                if events.is_empty() {
                    idle += DEFAULT_TAIL_TIMEOUT;
                    if idle >= KEEPALIVE_INTERVAL {
                        if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                            return;
                        }
                        idle = Duration::ZERO;
                    }
                    continue;
                }
                idle = Duration::ZERO;
                for event in &events {
                    if event_matches(event, &thread_filter) && send_event(&mut socket, event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &WhiteboardEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(payload.into())).await
}

#[derive(Debug, Deserialize)]
struct UserActionRequest {
    user_id: String,
    thread_id: String,
    action_id: String,
    choice: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// §4.11/§6.5 `POST /wb/user_action`: the sole write path a client uses to
/// feed a confirmed choice back through the graph. Validates `thread_id` is
/// non-empty (§3 "entries missing it are dropped downstream") and appends
/// `manager.user_action` via the Bus; no other side-effect happens here.
async fn user_action(
    State(state): State<HttpState>,
    Json(body): Json<UserActionRequest>,
) -> impl IntoResponse {
    let Some(thread_id) = ThreadId::new(body.thread_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "thread_id must be non-empty"})),
        )
            .into_response();
    };
    let user_id = UserId::new(body.user_id);

    let mut values = ScalarMap::new();
    values.insert(
        "type".to_string(),
        Scalar::String("manager.user_action".to_string()),
    );
    values.insert("action_id".to_string(), Scalar::String(body.action_id));
    values.insert("choice".to_string(), Scalar::String(body.choice));
    if let Some(metadata) = body.metadata {
        values.insert("metadata".to_string(), Scalar::from(metadata));
    }

    let wb_id = state.bus.append(&user_id, Some(thread_id), values);
    (StatusCode::OK, Json(json!({"wb_id": wb_id.to_string()}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> HttpState {
        HttpState {
            bus: Arc::new(Bus::default()),
            db: Arc::new(Database::open_in_memory().unwrap()),
        }
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn user_action_rejects_blank_thread_id() {
        let app = router(test_state());
        let body = json!({
            "user_id": "u1",
            "thread_id": "",
            "action_id": "a1",
            "choice": "refocus",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/wb/user_action")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_action_appends_to_the_whiteboard() {
        let state = test_state();
        let bus = state.bus.clone();
        let app = router(state);
        let body = json!({
            "user_id": "u1",
            "thread_id": "t1",
            "action_id": "a1",
            "choice": "update_plan",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/wb/user_action")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (events, _) = bus.tail(&UserId::new("u1"), WbId::ZERO).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].values.get("type").and_then(|v| v.as_str()),
            Some("manager.user_action")
        );
    }

    #[tokio::test]
    async fn sse_stream_replays_then_forwards_new_events() {
        let state = test_state();
        state.bus.append(
            &UserId::new("u1"),
            ThreadId::new("t1"),
            [("type".to_string(), Scalar::String("prod.nudge".to_string()))]
                .into_iter()
                .collect(),
        );
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users/u1/whiteboard/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }
}
