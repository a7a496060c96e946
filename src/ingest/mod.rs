// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::error::FeedError;
use crate::ingest::types::{ChannelHandle, FeedSource, MessageRecord};
use crate::shutdown::Shutdown;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Feed fetches attempted.");
        describe_counter!(
            "feed_messages_total",
            "Messages kept after window + empty-text filtering."
        );
        describe_counter!(
            "feed_rate_limited_total",
            "Fetches aborted by a source rate limit."
        );
        describe_counter!(
            "feed_source_unavailable_total",
            "Fetches where the channel could not be resolved or read."
        );
    });
}

/// Normalize post text: decode entities, turn `<br>` into newlines, strip tags,
/// collapse runs of spaces, trim every line and drop blank-line runs.
pub fn normalize_text(s: &str) -> String {
    static RE_BR: OnceCell<regex::Regex> = OnceCell::new();
    let re_br = RE_BR.get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>").unwrap());
    let out = re_br.replace_all(s, "\n");

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(&out, "");

    // Decode after stripping so escaped `&lt;b&gt;` survives as text
    let out = html_escape::decode_html_entities(&out).to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\u{00A0}\r]+").unwrap());

    let mut lines: Vec<String> = Vec::new();
    for line in out.split('\n') {
        let line = re_ws.replace_all(line, " ").trim().to_string();
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Alternate spelling of a channel name: `@name` ↔ `name`.
pub fn alternate_channel_name(channel: &str) -> String {
    match channel.strip_prefix('@') {
        Some(bare) => bare.to_string(),
        None => format!("@{channel}"),
    }
}

/// Enforce the reader's output contract on whatever a source returned:
/// inside the window, non-empty text, newest first, at most `limit`.
pub fn finalize_batch(
    mut items: Vec<MessageRecord>,
    since: DateTime<Utc>,
    limit: usize,
) -> Vec<MessageRecord> {
    items.retain(|m| m.timestamp >= since && !m.text.trim().is_empty());
    items.sort_by(|a, b| b.id.cmp(&a.id));
    items.dedup_by_key(|m| m.id);
    items.truncate(limit);
    items
}

/// Upper bound on a rate-limit cooldown, whatever the source advises.
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Reads the monitored channel through a [`FeedSource`].
#[derive(Clone)]
pub struct FeedReader {
    source: Arc<dyn FeedSource>,
    channel: String,
    page_limit: usize,
    max_cooldown: Duration,
    shutdown: Shutdown,
}

impl FeedReader {
    pub fn new(source: Arc<dyn FeedSource>, channel: impl Into<String>, page_limit: usize) -> Self {
        Self {
            source,
            channel: channel.into(),
            page_limit: page_limit.max(1),
            max_cooldown: DEFAULT_MAX_COOLDOWN,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_max_cooldown(mut self, max: Duration) -> Self {
        self.max_cooldown = max;
        self
    }

    /// A triggered shutdown cuts a rate-limit cooldown short.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.set_shutdown(shutdown);
        self
    }

    pub fn set_shutdown(&mut self, shutdown: Shutdown) {
        self.shutdown = shutdown;
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages newer than `now - window`, newest first.
    ///
    /// An unresolvable channel or a rate limit yields `Ok(vec![])` (the
    /// rate limit after sleeping the advised cooldown, capped at
    /// `max_cooldown` and abandoned on shutdown). Transport and parse
    /// failures are returned so the pipeline can treat them as a cycle fault.
    pub async fn fetch(&self, window: Duration) -> Result<Vec<MessageRecord>, FeedError> {
        ensure_metrics_described();
        counter!("feed_fetch_total").increment(1);

        let handle = match self.resolve().await {
            Ok(h) => h,
            Err(FeedError::RateLimited { retry_after }) => {
                self.cool_down(retry_after).await;
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::error!(
                    target: "ingest",
                    channel = %self.channel,
                    provider = self.source.name(),
                    error = %e,
                    "channel not found or not accessible"
                );
                counter!("feed_source_unavailable_total").increment(1);
                return Ok(Vec::new());
            }
        };

        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(4));
        let since = Utc::now() - window;

        match self.source.fetch_page(&handle, since, self.page_limit).await {
            Ok(items) => {
                let kept = finalize_batch(items, since, self.page_limit);
                counter!("feed_messages_total").increment(kept.len() as u64);
                tracing::info!(
                    target: "ingest",
                    channel = %handle.name,
                    fetched = kept.len(),
                    newest = kept.first().map(|m| m.id),
                    "fetched channel messages"
                );
                Ok(kept)
            }
            Err(FeedError::RateLimited { retry_after }) => {
                self.cool_down(retry_after).await;
                Ok(Vec::new())
            }
            Err(FeedError::SourceUnavailable(reason)) => {
                tracing::error!(target: "ingest", channel = %handle.name, %reason, "channel became unavailable");
                counter!("feed_source_unavailable_total").increment(1);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve(&self) -> Result<ChannelHandle, FeedError> {
        match self.source.resolve(&self.channel).await {
            Ok(h) => Ok(h),
            Err(e @ FeedError::RateLimited { .. }) => Err(e),
            Err(first) => {
                let alt = alternate_channel_name(&self.channel);
                tracing::debug!(
                    target: "ingest",
                    channel = %self.channel,
                    alternate = %alt,
                    error = %first,
                    "verbatim lookup failed, retrying alternate name"
                );
                self.source.resolve(&alt).await
            }
        }
    }

    async fn cool_down(&self, retry_after: Duration) {
        let wait = retry_after.min(self.max_cooldown);
        tracing::warn!(
            target: "ingest",
            channel = %self.channel,
            wait_secs = wait.as_secs(),
            advised_secs = retry_after.as_secs(),
            "rate limited by feed source; cooling down"
        );
        counter!("feed_rate_limited_total").increment(1);

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.wait() => {
                tracing::info!(target: "ingest", channel = %self.channel, "cooldown cut short by shutdown");
            }
        }
    }
}
