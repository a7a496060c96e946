// src/notify/mod.rs
//! Broadcast dispatch: render once, deliver to each recipient in turn, count
//! outcomes. One recipient's failure never stops the batch.

pub mod render;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use metrics::counter;
use serde::Serialize;

use crate::analyze::Digest;
use crate::error::DeliveryError;
use crate::shutdown::Shutdown;

pub use render::{render_digest, strip_markdown};
pub use telegram::BotApiTransport;

pub const DEFAULT_SEND_PAUSE: Duration = Duration::from_secs(1);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Markdown,
    Plain,
}

/// A recipient as resolved by one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientHandle {
    pub chat_id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Handle(RecipientHandle),
    RawId(i64),
}

impl SendTarget {
    pub fn chat_id(&self) -> i64 {
        match self {
            SendTarget::Handle(h) => h.chat_id,
            SendTarget::RawId(id) => *id,
        }
    }
}

/// One outbound identity (a bot account).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn resolve(&self, id: i64) -> Result<RecipientHandle, DeliveryError>;
    /// Returns the transport's message id.
    async fn send(&self, target: &SendTarget, text: &str, format: TextFormat) -> Result<i64, DeliveryError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryIdentity {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub recipient: i64,
    pub delivered: bool,
    pub via: Option<DeliveryIdentity>,
    pub message_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub via_fallback: usize,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.succeeded > 0
    }

    /// Share of attempted recipients reached; 0.0 when nobody was attempted.
    pub fn success_ratio(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// A message in both renderings; the plain one is used when the transport
/// refuses the markup.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub markdown: String,
    pub plain: String,
}

pub struct Dispatcher {
    primary: Arc<dyn Notifier>,
    fallback: Option<Arc<dyn Notifier>>,
    pause: Duration,
    send_timeout: Duration,
    tz: Tz,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(primary: Arc<dyn Notifier>) -> Self {
        Self {
            primary,
            fallback: None,
            pause: DEFAULT_SEND_PAUSE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            tz: chrono_tz::Asia::Singapore,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_fallback(mut self, fallback: Option<Arc<dyn Notifier>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn render(&self, digest: &Digest) -> Rendered {
        let now = Utc::now().with_timezone(&self.tz);
        Rendered {
            markdown: render_digest(digest, now, TextFormat::Markdown),
            plain: render_digest(digest, now, TextFormat::Plain),
        }
    }

    pub async fn deliver(&self, digest: &Digest, recipients: &[i64], identity: DeliveryIdentity) -> DeliveryReport {
        let rendered = self.render(digest);
        self.deliver_rendered(&rendered, recipients, identity).await
    }

    /// Deliver free-form Markdown text (announcements, command replies in
    /// bulk). The plain resend carries the same text with markup stripped.
    pub async fn deliver_text(&self, text: &str, recipients: &[i64], identity: DeliveryIdentity) -> DeliveryReport {
        let rendered = Rendered {
            markdown: text.to_string(),
            plain: strip_markdown(text),
        };
        self.deliver_rendered(&rendered, recipients, identity).await
    }

    pub async fn deliver_rendered(
        &self,
        msg: &Rendered,
        recipients: &[i64],
        identity: DeliveryIdentity,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut shutdown = self.shutdown.clone();

        for (i, &recipient) in recipients.iter().enumerate() {
            if shutdown.is_triggered() {
                tracing::warn!(
                    target: "notify",
                    skipped = recipients.len() - report.attempted,
                    "shutdown requested, stopping broadcast"
                );
                break;
            }

            report.attempted += 1;
            counter!("delivery_attempted_total").increment(1);
            let outcome = self.deliver_one(msg, recipient, identity).await;

            if outcome.delivered {
                report.succeeded += 1;
                counter!("delivery_succeeded_total").increment(1);
                if outcome.via == Some(DeliveryIdentity::Fallback) && identity == DeliveryIdentity::Primary {
                    report.via_fallback += 1;
                    counter!("delivery_fallback_total").increment(1);
                }
            }
            report.outcomes.push(outcome);

            // pause between recipients, success or not
            if i + 1 < recipients.len() {
                tokio::select! {
                    _ = tokio::time::sleep(self.pause) => {}
                    _ = shutdown.wait() => {}
                }
            }
        }

        tracing::info!(
            target: "notify",
            attempted = report.attempted,
            succeeded = report.succeeded,
            via_fallback = report.via_fallback,
            ratio = report.success_ratio(),
            "broadcast finished"
        );
        report
    }

    fn notifier_for(&self, identity: DeliveryIdentity) -> (DeliveryIdentity, &Arc<dyn Notifier>) {
        match (identity, &self.fallback) {
            (DeliveryIdentity::Fallback, Some(fb)) => (DeliveryIdentity::Fallback, fb),
            _ => (DeliveryIdentity::Primary, &self.primary),
        }
    }

    async fn deliver_one(&self, msg: &Rendered, recipient: i64, identity: DeliveryIdentity) -> RecipientOutcome {
        let (used, notifier) = self.notifier_for(identity);
        let first = self.attempt_via(notifier.as_ref(), recipient, msg).await;

        let result = match (first, used, &self.fallback) {
            (Err(e), DeliveryIdentity::Primary, Some(fb)) => {
                tracing::warn!(
                    target: "notify",
                    recipient,
                    error = %e,
                    "primary identity failed, trying fallback"
                );
                self.attempt_via(fb.as_ref(), recipient, msg)
                    .await
                    .map(|id| (DeliveryIdentity::Fallback, id))
            }
            (r, used, _) => r.map(|id| (used, id)),
        };

        match result {
            Ok((via, message_id)) => {
                tracing::debug!(target: "notify", recipient, ?via, message_id, "delivered");
                RecipientOutcome {
                    recipient,
                    delivered: true,
                    via: Some(via),
                    message_id: Some(message_id),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(target: "notify", recipient, error = %e, "delivery failed");
                RecipientOutcome {
                    recipient,
                    delivered: false,
                    via: None,
                    message_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Resolve then send through one identity; unresolvable recipients are
    /// addressed by raw id.
    async fn attempt_via(&self, notifier: &dyn Notifier, recipient: i64, msg: &Rendered) -> Result<i64, DeliveryError> {
        let target = match self.timed(notifier.resolve(recipient)).await {
            Ok(handle) => SendTarget::Handle(handle),
            Err(e) => {
                tracing::warn!(
                    target: "notify",
                    bot = notifier.name(),
                    recipient,
                    error = %e,
                    "could not resolve recipient, sending by raw id"
                );
                SendTarget::RawId(recipient)
            }
        };

        match self.timed(notifier.send(&target, &msg.markdown, TextFormat::Markdown)).await {
            Err(e) if e.is_format_rejection() => {
                tracing::warn!(target: "notify", recipient, "markup rejected, resending as plain text");
                self.timed(notifier.send(&target, &msg.plain, TextFormat::Plain)).await
            }
            other => other,
        }
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, DeliveryError>>,
    ) -> Result<T, DeliveryError> {
        tokio::time::timeout(self.send_timeout, fut)
            .await
            .map_err(|_| DeliveryError::Timeout(self.send_timeout))?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted notifier shared by unit tests.
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedNotifier {
        pub unresolvable: HashSet<i64>,
        pub failing: HashSet<i64>,
        pub reject_markdown: bool,
        pub sent: Mutex<Vec<(i64, TextFormat, String)>>,
        pub label: &'static str,
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn resolve(&self, id: i64) -> Result<RecipientHandle, DeliveryError> {
            if self.unresolvable.contains(&id) {
                return Err(DeliveryError::Unreachable(id, "chat not found".into()));
            }
            Ok(RecipientHandle {
                chat_id: id,
                username: None,
            })
        }

        async fn send(&self, target: &SendTarget, text: &str, format: TextFormat) -> Result<i64, DeliveryError> {
            let id = target.chat_id();
            if self.failing.contains(&id) {
                return Err(DeliveryError::Unreachable(id, "bot was blocked by the user".into()));
            }
            if self.reject_markdown && format == TextFormat::Markdown {
                return Err(DeliveryError::Rejected {
                    code: 400,
                    description: "Bad Request: can't parse entities".into(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((id, format, text.to_string()));
            Ok(sent.len() as i64)
        }

        fn name(&self) -> &'static str {
            if self.label.is_empty() { "scripted" } else { self.label }
        }
    }
}
