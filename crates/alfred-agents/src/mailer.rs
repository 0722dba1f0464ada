//! Mailer Worker (C10, §4.10): consumes `email.send.confirmed` deliveries
//! off the internal `user:{U}:control:mail` channel and sends via an
//! external mail API, keyed by `(message_id, draft_hash)` so a retry of
//! the same key never sends twice.

use crate::error::{Error, Result};
use crate::policy::DegradedGate;
use alfred_core::ChannelBus;
use alfred_index::Database;
use alfred_types::{ControlChannel, ScalarMap, UserId, WbId};
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub message_id: String,
    pub draft_hash: String,
    pub recipient: String,
    pub body: String,
}

pub trait MailSender: Send + Sync {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>>;
}

/// `reqwest`-backed sender, mirroring `PlannerClient`'s shape.
pub struct HttpMailSender {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMailSender {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl MailSender for HttpMailSender {
    fn send<'a>(&'a self, mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            #[derive(serde::Serialize)]
            struct Body<'b> {
                recipient: &'b str,
                body: &'b str,
                idempotency_key: &'b str,
            }
            let idempotency_key = format!("{}:{}", mail.message_id, mail.draft_hash);
            let resp = self
                .http
                .post(format!("{}/mail/send", self.base_url))
                .json(&Body {
                    recipient: &mail.recipient,
                    body: &mail.body,
                    idempotency_key: &idempotency_key,
                })
                .send()
                .await
                .map_err(|e| Error::Collaborator(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(Error::Collaborator(format!("mail send rejected: {}", resp.status())));
            }
            Ok(())
        })
    }
}

pub fn draft_hash(draft: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(draft.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct Mailer {
    user_id: UserId,
    control: Arc<ChannelBus>,
    db: Arc<Database>,
    sender: Arc<dyn MailSender>,
    degraded: DegradedGate,
    last_stream_id: Mutex<WbId>,
}

impl Mailer {
    pub fn new(user_id: UserId, control: Arc<ChannelBus>, db: Arc<Database>, sender: Arc<dyn MailSender>) -> Self {
        Self {
            user_id,
            control,
            db,
            sender,
            degraded: DegradedGate::new(),
            last_stream_id: Mutex::new(WbId::ZERO),
        }
    }

    fn stream_key(&self) -> String {
        ControlChannel::Mail.stream_key(&self.user_id)
    }

    async fn process_confirmation(&self, values: &ScalarMap) -> Result<()> {
        let message_id = values
            .get("message_id")
            .and_then(|v| v.clone().into_string())
            .ok_or_else(|| Error::Decode("mail confirmation missing `message_id`".to_string()))?;
        let draft_hash = values
            .get("draft_hash")
            .and_then(|v| v.clone().into_string())
            .ok_or_else(|| Error::Decode("mail confirmation missing `draft_hash`".to_string()))?;
        let recipient = values
            .get("recipient")
            .and_then(|v| v.clone().into_string())
            .ok_or_else(|| Error::Decode("mail confirmation missing `recipient`".to_string()))?;
        let body = values
            .get("body")
            .and_then(|v| v.clone().into_string())
            .unwrap_or_default();

        if self.db.has_sent(&self.user_id, &message_id, &draft_hash)? {
            tracing::info!(user = %self.user_id, message_id, "skipping already-sent mail");
            return Ok(());
        }

        let mail = OutgoingMail {
            message_id,
            draft_hash,
            recipient,
            body,
        };
        let result = self.sender.send(&mail).await;
        self.degraded.record(result.is_ok());
        // Only record the idempotency key once the send has actually
        // completed (§7): a transient failure must leave it retriable.
        if result.is_ok() {
            self.db.mark_sent(&self.user_id, &mail.message_id, &mail.draft_hash)?;
        }
        result
    }
}

impl crate::subagent::Subagent for Mailer {
    fn id(&self) -> &'static str {
        "mailer"
    }

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn consume_batch(&self, batch: usize) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let after = *self.last_stream_id.lock().expect("last_stream_id lock poisoned");
            let (events, next_id) = self
                .control
                .tail(&self.stream_key(), after, batch, Duration::from_millis(50))
                .await;
            let mut processed = 0;
            for event in &events {
                match self.process_confirmation(&event.values).await {
                    Ok(()) => processed += 1,
                    Err(e) => tracing::warn!(error = %e, user = %self.user_id, "mail send failed"),
                }
            }
            if next_id > after {
                *self.last_stream_id.lock().expect("last_stream_id lock poisoned") = next_id;
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
    use alfred_types::Scalar;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSender(AtomicU32);
    impl MailSender for CountingSender {
        fn send<'a>(&'a self, _mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(()) })
        }
    }

    fn confirmation(message_id: &str, draft: &str) -> ScalarMap {
        let mut m = ScalarMap::new();
        m.insert("message_id".into(), Scalar::String(message_id.into()));
        m.insert("draft_hash".into(), Scalar::String(draft_hash(draft)));
        m.insert("recipient".into(), Scalar::String("bob@example.com".into()));
        m.insert("body".into(), Scalar::String(draft.into()));
        m
    }

    #[tokio::test]
    async fn sends_exactly_once_for_repeated_confirmation() {
        let sender = Arc::new(CountingSender(AtomicU32::new(0)));
        let mailer = Mailer::new(
            UserId::new("u1"),
            Arc::new(ChannelBus::new(100)),
            Arc::new(Database::open_in_memory().unwrap()),
            sender.clone(),
        );
        let values = confirmation("m1", "Sounds good.");
        mailer.process_confirmation(&values).await.unwrap();
        mailer.process_confirmation(&values).await.unwrap();
        assert_eq!(sender.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_drafts_for_same_message_both_send() {
        let sender = Arc::new(CountingSender(AtomicU32::new(0)));
        let mailer = Mailer::new(
            UserId::new("u1"),
            Arc::new(ChannelBus::new(100)),
            Arc::new(Database::open_in_memory().unwrap()),
            sender.clone(),
        );
        mailer.process_confirmation(&confirmation("m1", "draft one")).await.unwrap();
        mailer.process_confirmation(&confirmation("m1", "draft two")).await.unwrap();
        assert_eq!(sender.0.load(Ordering::SeqCst), 2);
    }

    struct FailOnceSender(AtomicU32);
    impl MailSender for FailOnceSender {
        fn send<'a>(&'a self, _mail: &'a OutgoingMail) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(Error::Collaborator("mail API unavailable".to_string()));
                }
                Ok(())
            })
        }
    }

    /// Regression test for a fixed bug: a transient send failure must not
    /// record the idempotency key, or the retried confirmation would be
    /// silently dropped as "already sent" without ever actually sending.
    #[tokio::test]
    async fn retries_after_transient_send_failure_instead_of_dropping_the_mail() {
        let sender = Arc::new(FailOnceSender(AtomicU32::new(0)));
        let mailer = Mailer::new(
            UserId::new("u1"),
            Arc::new(ChannelBus::new(100)),
            Arc::new(Database::open_in_memory().unwrap()),
            sender.clone(),
        );
        let values = confirmation("m1", "Sounds good.");

        assert!(mailer.process_confirmation(&values).await.is_err());
        assert!(!mailer.db.has_sent(&mailer.user_id, "m1", &draft_hash("Sounds good.")).unwrap());

        mailer.process_confirmation(&values).await.unwrap();
        assert!(mailer.db.has_sent(&mailer.user_id, "m1", &draft_hash("Sounds good.")).unwrap());
        assert_eq!(sender.0.load(Ordering::SeqCst), 2);
    }
}
