// src/ingest/providers/mod.rs
pub mod preview;
pub mod rss;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{FeedConfig, FeedProviderKind};
use crate::error::FeedError;
use crate::ingest::types::FeedSource;

/// Build the configured feed source.
pub fn build_source(cfg: &FeedConfig) -> Result<Arc<dyn FeedSource>, FeedError> {
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    Ok(match cfg.provider {
        FeedProviderKind::Preview => Arc::new(preview::PreviewFeed::new(&cfg.preview_base, timeout)?),
        FeedProviderKind::Rss => Arc::new(rss::RssFeed::new(&cfg.rss_base, timeout)?),
    })
}

/// Body fetched during `resolve`, handed to the first `fetch_page` for the
/// same URL so a cycle does not download the channel page twice.
#[derive(Default)]
pub(crate) struct PrimedBody(Mutex<Option<(String, String)>>);

impl PrimedBody {
    pub(crate) fn store(&self, url: &str, body: String) {
        if let Ok(mut g) = self.0.lock() {
            *g = Some((url.to_string(), body));
        }
    }

    /// Takes the stored body if it belongs to `url`; a stale entry is dropped.
    pub(crate) fn take(&self, url: &str) -> Option<String> {
        let mut g = self.0.lock().ok()?;
        match g.take() {
            Some((u, body)) if u == url => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primed_body_is_taken_once_and_only_for_its_url() {
        let primed = PrimedBody::default();
        primed.store("https://t.me/s/marketfeed", "page".into());
        assert_eq!(primed.take("https://t.me/s/other"), None);
        // the mismatched take discarded it
        assert_eq!(primed.take("https://t.me/s/marketfeed"), None);

        primed.store("https://t.me/s/marketfeed", "page".into());
        assert_eq!(primed.take("https://t.me/s/marketfeed").as_deref(), Some("page"));
        assert_eq!(primed.take("https://t.me/s/marketfeed"), None);
    }
}
