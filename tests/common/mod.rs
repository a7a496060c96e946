// tests/common/mod.rs
//
// In-memory stand-ins for the three external services: the channel feed,
// the summarization service and the Bot API identities.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use market_digest_bot::analyze::ai_adapter::MockService;
use market_digest_bot::analyze::DigestGenerator;
use market_digest_bot::error::{DeliveryError, FeedError};
use market_digest_bot::ingest::types::{ChannelHandle, FeedSource, MessageRecord};
use market_digest_bot::ingest::FeedReader;
use market_digest_bot::notify::{Dispatcher, Notifier, RecipientHandle, SendTarget, TextFormat};
use market_digest_bot::pipeline::Pipeline;
use market_digest_bot::subscribers::{SubscriberMeta, SubscriberRegistry};

pub fn message(id: i64, text: &str) -> MessageRecord {
    MessageRecord {
        id,
        timestamp: Utc::now(),
        text: text.to_string(),
    }
}

/// Scripted feed. Resolution can be made to fail per spelling.
#[derive(Default)]
pub struct FakeFeed {
    pub items: Mutex<Vec<MessageRecord>>,
    pub unknown_names: Mutex<HashSet<String>>,
    pub fetch_error: Mutex<Option<FeedError>>,
    pub resolved: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn with_ids(ids: &[i64]) -> Arc<Self> {
        let feed = Arc::new(Self::default());
        feed.set_ids(ids);
        feed
    }

    pub fn set_ids(&self, ids: &[i64]) {
        *self.items.lock().unwrap() = ids.iter().map(|&id| message(id, &format!("headline {id}"))).collect();
    }

    pub fn hide(&self, name: &str) {
        self.unknown_names.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_next_fetch(&self, e: FeedError) {
        *self.fetch_error.lock().unwrap() = Some(e);
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, FeedError> {
        self.resolved.lock().unwrap().push(channel.to_string());
        if self.unknown_names.lock().unwrap().contains(channel) {
            return Err(FeedError::SourceUnavailable(format!("{channel} not found")));
        }
        Ok(ChannelHandle {
            name: channel.to_string(),
            url: format!("mem://{channel}"),
        })
    }

    async fn fetch_page(
        &self,
        _handle: &ChannelHandle,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<MessageRecord>, FeedError> {
        if let Some(e) = self.fetch_error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.items.lock().unwrap().clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Records every send; recipients in `failing` raise.
#[derive(Default)]
pub struct RecordingNotifier {
    pub failing: Mutex<HashSet<i64>>,
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn failing_for(ids: &[i64]) -> Arc<Self> {
        let n = Arc::new(Self::default());
        n.failing.lock().unwrap().extend(ids.iter().copied());
        n
    }

    pub fn recipients(&self) -> Vec<i64> {
        self.sent.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn resolve(&self, id: i64) -> Result<RecipientHandle, DeliveryError> {
        Ok(RecipientHandle {
            chat_id: id,
            username: None,
        })
    }

    async fn send(&self, target: &SendTarget, text: &str, _format: TextFormat) -> Result<i64, DeliveryError> {
        let id = target.chat_id();
        if self.failing.lock().unwrap().contains(&id) {
            return Err(DeliveryError::Unreachable(id, "bot was blocked by the user".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((id, text.to_string()));
        Ok(sent.len() as i64)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct Harness {
    pub feed: Arc<FakeFeed>,
    pub summarizer: Arc<MockService>,
    pub notifier: Arc<RecordingNotifier>,
    pub registry: Arc<SubscriberRegistry>,
    pub pipeline: Pipeline,
}

pub fn harness(subscribers: &[i64], summarizer: MockService) -> Harness {
    let feed = Arc::new(FakeFeed::default());
    let summarizer = Arc::new(summarizer);
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(SubscriberRegistry::in_memory());
    for &id in subscribers {
        registry.add(id, SubscriberMeta::default()).unwrap();
    }
    let pipeline = Pipeline::new(
        FeedReader::new(feed.clone(), "marketfeed", 50),
        DigestGenerator::new(summarizer.clone()),
        Dispatcher::new(notifier.clone()).with_pause(Duration::from_millis(1)),
        registry.clone(),
    );
    Harness {
        feed,
        summarizer,
        notifier,
        registry,
        pipeline,
    }
}
