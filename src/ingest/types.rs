// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FeedError;

/// One channel post, reduced to what the digest needs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// A channel name the source has confirmed it can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub name: String,
    pub url: String,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Confirm `channel` exists and is readable under exactly this spelling.
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, FeedError>;

    /// Items published at or after `since`, at most `limit`, newest first.
    async fn fetch_page(
        &self,
        handle: &ChannelHandle,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, FeedError>;

    fn name(&self) -> &'static str;
}
