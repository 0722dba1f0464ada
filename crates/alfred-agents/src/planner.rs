//! `alfred_agents::planner::PlannerClient` (§6.3 AMBIENT): the `reqwest`-
//! backed implementation of `alfred_engine::PlannerCollaborator`, shared by
//! the Manager Graph (via `GraphDeps`, assembled in `alfred-runtime`) and the
//! Calendar-Planner subagent's own "compute candidate plan" step (§4.7 step
//! 2) — both call the same `POST /planner/run` endpoint.

use alfred_engine::{PlannerCollaborator, PlannerRequest, PlannerResponse};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct PlannerRunBody<'a> {
    user_id: &'a str,
    thread_id: &'a str,
    plan_date: String,
    time_block: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct PlannerRunResponseBody {
    plan_id: String,
    version: u64,
    #[serde(default)]
    timeline: Vec<serde_json::Value>,
    #[serde(default)]
    conflicts: Vec<serde_json::Value>,
    #[serde(default)]
    rationale: String,
}

/// Fixed-window per-minute/per-hour call budget (§4.7 step 4, §6.6
/// `planner_rate_per_min/hour`). Calls beyond the budget are refused
/// locally rather than sent, so a runaway caller can't itself trip the
/// external collaborator's own rate limiting.
struct RateLimiter {
    per_min: u32,
    per_hour: u32,
    minute_window: Mutex<(Instant, u32)>,
    hour_window: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    fn new(per_min: u32, per_hour: u32) -> Self {
        let now = Instant::now();
        Self {
            per_min,
            per_hour,
            minute_window: Mutex::new((now, 0)),
            hour_window: Mutex::new((now, 0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        {
            let mut window = self.minute_window.lock().expect("rate limiter lock poisoned");
            if now.duration_since(window.0) >= Duration::from_secs(60) {
                *window = (now, 0);
            }
            if window.1 >= self.per_min {
                return false;
            }
        }
        {
            let mut window = self.hour_window.lock().expect("rate limiter lock poisoned");
            if now.duration_since(window.0) >= Duration::from_secs(3600) {
                *window = (now, 0);
            }
            if window.1 >= self.per_hour {
                return false;
            }
        }
        self.minute_window.lock().expect("rate limiter lock poisoned").1 += 1;
        self.hour_window.lock().expect("rate limiter lock poisoned").1 += 1;
        true
    }
}

pub struct PlannerClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    calls_made: AtomicU32,
}

impl PlannerClient {
    pub fn new(base_url: impl Into<String>, rate_per_min: u32, rate_per_hour: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter: RateLimiter::new(rate_per_min, rate_per_hour),
            calls_made: AtomicU32::new(0),
        }
    }

    pub fn calls_made(&self) -> u32 {
        self.calls_made.load(Ordering::Relaxed)
    }

    async fn run_once(&self, request: &PlannerRequest) -> Result<PlannerResponse, String> {
        let body = PlannerRunBody {
            user_id: request.user_id.as_str(),
            thread_id: request.thread_id.as_str(),
            plan_date: request.plan_date.to_string(),
            time_block: &request.time_block,
            activity_type: request.activity_type.as_deref(),
        };

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            if !self.limiter.try_acquire() {
                return Err("planner rate limit exceeded".to_string());
            }

            let response = self
                .http
                .post(format!("{}/planner/run", self.base_url))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    self.calls_made.fetch_add(1, Ordering::Relaxed);
                    let parsed: PlannerRunResponseBody = resp
                        .json()
                        .await
                        .map_err(|e| format!("planner response decode failed: {e}"))?;
                    return Ok(PlannerResponse {
                        plan_id: parsed.plan_id,
                        version: parsed.version,
                        timeline: parsed.timeline,
                        conflicts: parsed.conflicts,
                        rationale: parsed.rationale,
                    });
                }
                Ok(resp) if resp.status() == 429 || resp.status().is_server_error() => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(format!("planner call failed after {attempt} attempts: {}", resp.status()));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Ok(resp) => return Err(format!("planner call rejected: {}", resp.status())),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(format!("planner call failed after {attempt} attempts: {e}"));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

impl PlannerCollaborator for PlannerClient {
    fn run<'a>(&'a self, request: &'a PlannerRequest) -> BoxFuture<'a, Result<PlannerResponse, String>> {
        Box::pin(self.run_once(request))
    }
}
