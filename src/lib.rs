// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod shutdown;
pub mod subscribers;

// Monitor → summarize → broadcast pipeline
pub mod analyze;
pub mod change_detector;
pub mod ingest;
pub mod notify;
pub mod pipeline;

// Chat command surface
pub mod commands;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{Digest, DigestGenerator, Sentiment};
pub use crate::api::router;
pub use crate::ingest::FeedReader;
pub use crate::notify::{DeliveryIdentity, DeliveryReport, Dispatcher};
pub use crate::pipeline::{CycleOutcome, Pipeline, PipelineState};
pub use crate::subscribers::{SubscriberMeta, SubscriberRegistry};

/// Text broadcast to active subscribers when the bot starts, if enabled.
pub const STARTUP_ANNOUNCEMENT: &str = "🤖 *Financial News Bot Started*

The bot is now monitoring financial news. You will receive regular summaries.

Available commands:
- /help - Show all available commands
- /status - Show bot status
- /test - Generate a test summary now
- /stop - Unsubscribe from updates";
