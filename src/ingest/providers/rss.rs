// src/ingest/providers/rss.rs
//! RSS bridge for Telegram channels (RSSHub-style `<base>/<channel>`).
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::FeedError;
use crate::ingest::normalize_text;
use crate::ingest::providers::preview::retry_after_from;
use crate::ingest::providers::PrimedBody;
use crate::ingest::types::{ChannelHandle, FeedSource, MessageRecord};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    title: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Post id from a `https://t.me/<channel>/<id>` style link.
fn post_id(link: &str) -> Option<i64> {
    link.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|tail| tail.split(['?', '#']).next())
        .and_then(|tail| tail.parse::<i64>().ok())
}

/// Parse a bridge feed into records, newest first. Items without a post id
/// or date are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<MessageRecord>, FeedError> {
    let rss: Rss = from_str(xml).map_err(|e| FeedError::Malformed(format!("rss: {e}")))?;
    let mut out = Vec::with_capacity(rss.channel.item.len());

    for it in rss.channel.item {
        let Some(id) = it
            .link
            .as_deref()
            .and_then(post_id)
            .or_else(|| it.guid.as_deref().and_then(post_id))
        else {
            tracing::debug!(target: "ingest", link = ?it.link, "rss item without post id");
            continue;
        };
        let Some(timestamp) = it.pub_date.as_deref().and_then(parse_rfc2822) else {
            tracing::debug!(target: "ingest", id, "rss item without pubDate");
            continue;
        };
        let raw = it
            .description
            .as_deref()
            .or(it.title.as_deref())
            .unwrap_or_default();
        out.push(MessageRecord {
            id,
            timestamp,
            text: normalize_text(raw),
        });
    }

    out.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(out)
}

pub struct RssFeed {
    client: Client,
    base: String,
    primed: PrimedBody,
}

impl RssFeed {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent("market-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            primed: PrimedBody::default(),
        })
    }

    async fn get_body(&self, url: &str) -> Result<String, FeedError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited {
                retry_after: retry_after_from(resp.headers()),
            });
        }
        if status.is_client_error() {
            return Err(FeedError::SourceUnavailable(format!(
                "{url} returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(FeedError::Transport(format!("{url} returned HTTP {status}")));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, FeedError> {
        let url = format!("{}/{}", self.base, channel);
        let body = self.get_body(&url).await?;
        if parse_feed(&body).is_err() {
            return Err(FeedError::SourceUnavailable(format!(
                "{url} is not an RSS feed"
            )));
        }
        self.primed.store(&url, body);
        Ok(ChannelHandle {
            name: channel.to_string(),
            url,
        })
    }

    async fn fetch_page(
        &self,
        handle: &ChannelHandle,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, FeedError> {
        let body = match self.primed.take(&handle.url) {
            Some(b) => b,
            None => self.get_body(&handle.url).await?,
        };
        let mut items = parse_feed(&body)?;
        items.retain(|m| m.timestamp >= since);
        items.truncate(limit);
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}
