//! Email-Triage Subagent (C9, §4.9): consumes inbound mail off
//! `user:{U}:in:email`, de-dupes by `(message_id, internal_date)`, filters
//! out bulk/automated mail by heuristic, classifies the rest via an
//! external model, and emits `email.reply_needed` for anything warranting
//! a reply.

use crate::error::{Error, Result};
use crate::policy::DegradedGate;
use alfred_core::{Bus, ChannelBus};
use alfred_index::Database;
use alfred_types::{InputStreamOffset, InputStreamRole, Scalar, ScalarMap, UserId, WbId};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Verdict an `EmailClassifier` returns for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub reply_warranted: bool,
    pub summary: String,
    pub draft: String,
}

pub trait EmailClassifier: Send + Sync {
    fn classify<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<Classification>>;
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub message_id: String,
    pub internal_date: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// `reqwest`-backed classifier, mirroring `PlannerClient`'s shape.
pub struct HttpEmailClassifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEmailClassifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl EmailClassifier for HttpEmailClassifier {
    fn classify<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<Classification>> {
        Box::pin(async move {
            #[derive(serde::Serialize)]
            struct Body<'b> {
                sender: &'b str,
                subject: &'b str,
                body: &'b str,
            }
            #[derive(serde::Deserialize)]
            struct ClassifyResponse {
                reply_warranted: bool,
                #[serde(default)]
                summary: String,
                #[serde(default)]
                draft: String,
            }

            let resp = self
                .http
                .post(format!("{}/classify/email", self.base_url))
                .json(&Body {
                    sender: &message.sender,
                    subject: &message.subject,
                    body: &message.body,
                })
                .send()
                .await
                .map_err(|e| Error::Collaborator(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(Error::Collaborator(format!(
                    "classifier rejected message: {}",
                    resp.status()
                )));
            }
            let parsed: ClassifyResponse = resp
                .json()
                .await
                .map_err(|e| Error::Collaborator(format!("classifier decode failed: {e}")))?;
            Ok(Classification {
                reply_warranted: parsed.reply_warranted,
                summary: parsed.summary,
                draft: parsed.draft,
            })
        })
    }
}

/// Fixed-window per-hour triage budget (§4.9 "configurable triage/hour"),
/// the same shape as `planner::RateLimiter` scaled to a single window.
struct HourlyLimiter {
    per_hour: u32,
    window: Mutex<(Instant, u32)>,
}

impl HourlyLimiter {
    fn new(per_hour: u32) -> Self {
        Self {
            per_hour,
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock().expect("triage limiter lock poisoned");
        if now.duration_since(window.0) >= Duration::from_secs(3600) {
            *window = (now, 0);
        }
        if window.1 >= self.per_hour {
            return false;
        }
        window.1 += 1;
        true
    }
}

/// Cheap local heuristic for bulk/automated mail that never warrants a
/// reply — classification is skipped entirely for these (§4.9 "Skip bulk/
/// automated by heuristic").
fn looks_automated(message: &EmailMessage) -> bool {
    let sender = message.sender.to_ascii_lowercase();
    let subject = message.subject.to_ascii_lowercase();
    let automated_local_parts = ["no-reply", "noreply", "donotreply", "notifications", "alerts"];
    if automated_local_parts.iter().any(|p| sender.contains(p)) {
        return true;
    }
    let automated_subjects = ["unsubscribe", "receipt", "your order", "password reset"];
    automated_subjects.iter().any(|s| subject.contains(s))
}

pub struct EmailTriage {
    user_id: UserId,
    input: Arc<ChannelBus>,
    whiteboard: Arc<Bus>,
    db: Arc<Database>,
    classifier: Arc<dyn EmailClassifier>,
    limiter: HourlyLimiter,
    degraded: DegradedGate,
    triaged_count: AtomicU32,
    last_stream_id: Mutex<WbId>,
}

impl EmailTriage {
    pub fn new(
        user_id: UserId,
        input: Arc<ChannelBus>,
        whiteboard: Arc<Bus>,
        db: Arc<Database>,
        classifier: Arc<dyn EmailClassifier>,
        triage_per_hour: u32,
    ) -> Self {
        let stream_key = InputStreamRole::Email.stream_key(&user_id);
        let last_stream_id = db
            .get_input_offset(&stream_key)
            .ok()
            .flatten()
            .and_then(|o| o.last_entry_id.parse().ok())
            .unwrap_or(WbId::ZERO);
        Self {
            user_id,
            input,
            whiteboard,
            db,
            classifier,
            limiter: HourlyLimiter::new(triage_per_hour),
            degraded: DegradedGate::new(),
            triaged_count: AtomicU32::new(0),
            last_stream_id: Mutex::new(last_stream_id),
        }
    }

    pub fn triaged_count(&self) -> u32 {
        self.triaged_count.load(Ordering::Relaxed)
    }

    fn stream_key(&self) -> String {
        InputStreamRole::Email.stream_key(&self.user_id)
    }

    async fn process_message(&self, values: &ScalarMap) -> Result<()> {
        let message = parse_message(values)?;

        if !self.db.mark_email_seen(&self.user_id, &message.message_id, &message.internal_date)? {
            return Ok(());
        }

        if looks_automated(&message) {
            return Ok(());
        }

        if !self.limiter.try_acquire() {
            tracing::warn!(user = %self.user_id, "email triage rate limit exceeded, deferring message");
            return Ok(());
        }

        let classification = self.classifier.classify(&message).await;
        self.degraded.record(classification.is_ok());
        let classification = classification?;
        self.triaged_count.fetch_add(1, Ordering::Relaxed);

        if !classification.reply_warranted {
            return Ok(());
        }

        let mut out = ScalarMap::new();
        out.insert("type".to_string(), Scalar::String("email.reply_needed".to_string()));
        out.insert("message_id".to_string(), Scalar::String(message.message_id));
        out.insert("sender".to_string(), Scalar::String(message.sender));
        out.insert("summary".to_string(), Scalar::String(classification.summary));
        out.insert("draft".to_string(), Scalar::String(classification.draft));
        self.whiteboard.append(&self.user_id, None, out);
        Ok(())
    }
}

fn parse_message(values: &ScalarMap) -> Result<EmailMessage> {
    let get = |key: &str| -> Result<String> {
        values
            .get(key)
            .and_then(|v| v.clone().into_string())
            .ok_or_else(|| Error::Decode(format!("email message missing `{key}`")))
    };
    Ok(EmailMessage {
        message_id: get("message_id")?,
        internal_date: get("internal_date")?,
        sender: get("sender")?,
        subject: values.get("subject").and_then(|v| v.clone().into_string()).unwrap_or_default(),
        body: values.get("body").and_then(|v| v.clone().into_string()).unwrap_or_default(),
    })
}

impl crate::subagent::Subagent for EmailTriage {
    fn id(&self) -> &'static str {
        "email_triage"
    }

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn consume_batch(&self, batch: usize) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let after = *self.last_stream_id.lock().expect("last_stream_id lock poisoned");
            let (events, next_id) = self
                .input
                .tail(&self.stream_key(), after, batch, Duration::from_millis(50))
                .await;
            let mut processed = 0;
            for event in &events {
                match self.process_message(&event.values).await {
                    Ok(()) => processed += 1,
                    Err(e) => tracing::warn!(error = %e, user = %self.user_id, "email triage failed"),
                }
            }
            if next_id > after {
                *self.last_stream_id.lock().expect("last_stream_id lock poisoned") = next_id;
                self.db.save_input_offset(&InputStreamOffset {
                    stream_key: self.stream_key(),
                    last_entry_id: next_id.to_string(),
                })?;
            }
            Ok(processed)
        })
    }

    fn tick(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClassifier(Classification);
    impl EmailClassifier for FakeClassifier {
        fn classify<'a>(&'a self, _message: &'a EmailMessage) -> BoxFuture<'a, Result<Classification>> {
            let result = self.0.clone();
            Box::pin(async move { Ok(result) })
        }
    }

    fn message_values(message_id: &str, sender: &str, subject: &str) -> ScalarMap {
        let mut m = ScalarMap::new();
        m.insert("message_id".into(), Scalar::String(message_id.into()));
        m.insert("internal_date".into(), Scalar::String("2026-01-01T00:00:00Z".into()));
        m.insert("sender".into(), Scalar::String(sender.into()));
        m.insert("subject".into(), Scalar::String(subject.into()));
        m.insert("body".into(), Scalar::String("body text".into()));
        m
    }

    fn agent(classification: Classification) -> EmailTriage {
        EmailTriage::new(
            UserId::new("u1"),
            Arc::new(ChannelBus::new(100)),
            Arc::new(Bus::default()),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeClassifier(classification)),
            100,
        )
    }

    #[tokio::test]
    async fn emits_reply_needed_when_warranted() {
        let agent = agent(Classification {
            reply_warranted: true,
            summary: "needs a reply".into(),
            draft: "Sure, works for me.".into(),
        });
        agent
            .process_message(&message_values("m1", "alice@example.com", "Quick question"))
            .await
            .unwrap();
        let (events, _) = agent.whiteboard.tail_with(&agent.user_id, WbId::ZERO, 10, Duration::from_millis(10)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values.get("type").unwrap().as_str(), Some("email.reply_needed"));
    }

    #[tokio::test]
    async fn skips_automated_senders_without_classifying() {
        let agent = agent(Classification {
            reply_warranted: true,
            summary: String::new(),
            draft: String::new(),
        });
        agent
            .process_message(&message_values("m1", "no-reply@example.com", "Your receipt"))
            .await
            .unwrap();
        assert_eq!(agent.triaged_count(), 0);
    }

    #[tokio::test]
    async fn dedupes_by_message_id_and_internal_date() {
        let agent = agent(Classification {
            reply_warranted: true,
            summary: "s".into(),
            draft: "d".into(),
        });
        let values = message_values("m1", "alice@example.com", "Hi");
        agent.process_message(&values).await.unwrap();
        agent.process_message(&values).await.unwrap();
        assert_eq!(agent.triaged_count(), 1);
    }
}
