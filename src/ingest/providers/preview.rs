// src/ingest/providers/preview.rs
//! Public channel web preview (`https://t.me/s/<channel>`).
//!
//! The preview page lists the latest ~20 posts oldest-first; older pages are
//! reached with `?before=<id>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};

use crate::error::FeedError;
use crate::ingest::normalize_text;
use crate::ingest::providers::PrimedBody;
use crate::ingest::types::{ChannelHandle, FeedSource, MessageRecord};

const MAX_PAGES: usize = 5;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

pub struct PreviewFeed {
    client: Client,
    base: String,
    primed: PrimedBody,
}

impl PreviewFeed {
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

    async fn get_page(&self, url: &str) -> Result<String, FeedError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited {
                retry_after: retry_after_from(resp.headers()),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FeedError::SourceUnavailable(format!("{url} returned 404")));
        }
        if !status.is_success() {
            return Err(FeedError::Transport(format!("{url} returned HTTP {status}")));
        }
        Ok(resp.text().await?)
    }
}

pub(crate) fn retry_after_from(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Public usernames: 5–32 chars, letter first, then letters/digits/underscores.
pub fn is_public_username(name: &str) -> bool {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{4,31}$").unwrap())
        .is_match(name)
}

/// Whether a preview page actually belongs to a readable channel.
pub fn looks_like_channel_page(html: &str) -> bool {
    html.contains("tgme_channel_info") || html.contains("tgme_widget_message")
}

/// Parse every post on a preview page. Media-only posts come back with empty
/// text; the reader drops them.
pub fn parse_preview_page(channel: &str, html: &str) -> Vec<MessageRecord> {
    static RE_TEXT: OnceCell<Regex> = OnceCell::new();
    static RE_TIME: OnceCell<Regex> = OnceCell::new();
    let re_text = RE_TEXT.get_or_init(|| {
        Regex::new(r#"(?s)<div class="tgme_widget_message_text[^"]*"[^>]*>(.*?)</div>"#).unwrap()
    });
    let re_time = RE_TIME.get_or_init(|| Regex::new(r#"<time[^>]*datetime="([^"]+)""#).unwrap());

    let marker = "data-post=\"";
    let mut out = Vec::new();

    for chunk in html.split(marker).skip(1) {
        let Some(post_ref) = chunk.split('"').next() else {
            continue;
        };
        // "<channel>/<id>"; the channel part may differ in case from ours
        let Some((owner, id_str)) = post_ref.rsplit_once('/') else {
            continue;
        };
        if !owner.eq_ignore_ascii_case(channel) {
            continue;
        }
        let Ok(id) = id_str.parse::<i64>() else {
            continue;
        };

        let Some(ts) = re_time
            .captures(chunk)
            .and_then(|c| DateTime::parse_from_rfc3339(&c[1]).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            tracing::debug!(target: "ingest", id, "preview post without timestamp, skipped");
            continue;
        };

        let text = re_text
            .captures(chunk)
            .map(|c| normalize_text(&c[1]))
            .unwrap_or_default();

        out.push(MessageRecord {
            id,
            timestamp: ts,
            text,
        });
    }

    out.sort_by(|a, b| b.id.cmp(&a.id));
    out
}

#[async_trait]
impl FeedSource for PreviewFeed {
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, FeedError> {
        if !is_public_username(channel) {
            return Err(FeedError::SourceUnavailable(format!(
                "{channel:?} is not a public channel username"
            )));
        }
        let url = format!("{}/{}", self.base, channel);
        let html = self.get_page(&url).await?;
        if !looks_like_channel_page(&html) {
            return Err(FeedError::SourceUnavailable(format!(
                "{channel} has no public preview"
            )));
        }
        self.primed.store(&url, html);
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
        let mut collected: Vec<MessageRecord> = Vec::new();
        let mut url = handle.url.clone();

        for _ in 0..MAX_PAGES {
            let html = match self.primed.take(&url) {
                Some(html) => html,
                None => self.get_page(&url).await?,
            };
            if !looks_like_channel_page(&html) {
                return Err(FeedError::Malformed(format!(
                    "{url} did not contain channel posts"
                )));
            }
            let page = parse_preview_page(&handle.name, &html);
            let Some(oldest) = page.last().cloned() else {
                break;
            };
            collected.extend(page.into_iter().filter(|m| m.timestamp >= since));

            if oldest.timestamp < since || collected.len() >= limit || oldest.id <= 1 {
                break;
            }
            url = format!("{}?before={}", handle.url, oldest.id);
        }

        collected.sort_by(|a, b| b.id.cmp(&a.id));
        collected.truncate(limit);
        Ok(collected)
    }

    fn name(&self) -> &'static str {
        "preview"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<div class="tgme_channel_info">marketfeed</div>
<div class="tgme_widget_message_wrap"><div class="tgme_widget_message js-widget_message" data-post="marketfeed/101">
  <div class="tgme_widget_message_text js-message_text" dir="auto">Fed holds rates<br/>Powell: <b>data dependent</b></div>
  <a class="tgme_widget_message_date" href="https://t.me/marketfeed/101"><time datetime="2025-03-01T10:00:00+00:00" class="time">10:00</time></a>
</div></div>
<div class="tgme_widget_message_wrap"><div class="tgme_widget_message js-widget_message" data-post="MarketFeed/102">
  <a class="tgme_widget_message_photo_wrap"></a>
  <time datetime="2025-03-01T10:05:00+00:00" class="time">10:05</time>
</div></div>
<div class="tgme_widget_message_wrap"><div class="tgme_widget_message js-widget_message" data-post="marketfeed/103">
  <div class="tgme_widget_message_text js-message_text" dir="auto">AAPL &amp; MSFT up 2%</div>
  <time datetime="2025-03-01T10:10:00+00:00" class="time">10:10</time>
</div></div>
<div class="tgme_widget_message js-widget_message" data-post="otherchan/999">
  <div class="tgme_widget_message_text js-message_text">forwarded widget</div>
  <time datetime="2025-03-01T10:11:00+00:00" class="time">10:11</time>
</div>
"#;

    #[test]
    fn parses_posts_newest_first() {
        let posts = parse_preview_page("marketfeed", PAGE);
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![103, 102, 101]);
        assert_eq!(posts[0].text, "AAPL & MSFT up 2%");
        assert_eq!(posts[2].text, "Fed holds rates\nPowell: data dependent");
        // media-only post parsed with empty text
        assert!(posts[1].text.is_empty());
    }

    #[test]
    fn username_validation() {
        assert!(is_public_username("marketfeed"));
        assert!(is_public_username("wall_st_news"));
        assert!(!is_public_username("@marketfeed"));
        assert!(!is_public_username("abc"));
        assert!(!is_public_username("1channel"));
    }

    #[test]
    fn page_detection() {
        assert!(looks_like_channel_page(PAGE));
        assert!(!looks_like_channel_page("<html>If you have Telegram, you can contact</html>"));
    }
}
