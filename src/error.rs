// src/error.rs
//! Error taxonomy for the pipeline components.
//!
//! Every variant here is recoverable: feed errors collapse to an empty fetch,
//! summarization errors collapse to a fallback digest, delivery errors are
//! counted per recipient, and cycle faults only shorten the next sleep.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("rate limited by source, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("malformed feed page: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(error: reqwest::Error) -> Self {
        FeedError::Transport(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarization service is not configured")]
    NotConfigured,

    #[error("summarization request failed: {0}")]
    Transport(String),

    #[error("summarization service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("summarization service returned no content")]
    EmptyResponse,
}

impl From<reqwest::Error> for SummarizeError {
    fn from(error: reqwest::Error) -> Self {
        SummarizeError::Transport(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient {0} is unreachable: {1}")]
    Unreachable(i64, String),

    #[error("message rejected ({code}): {description}")]
    Rejected { code: i64, description: String },

    #[error("outbound rate limit, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("delivery transport error: {0}")]
    Transport(String),

    #[error("send timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl DeliveryError {
    /// True when the transport refused the rich-text markup itself.
    pub fn is_format_rejection(&self) -> bool {
        matches!(self, DeliveryError::Rejected { description, .. }
            if description.contains("can't parse entities"))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(error: reqwest::Error) -> Self {
        DeliveryError::Transport(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("subscriber file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("subscriber file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("subscriber registry lock poisoned")]
    Poisoned,
}

/// Anything that escaped a single pipeline cycle.
#[derive(Debug, Error)]
pub enum CycleFault {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FeedError),

    #[error("registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    #[error("delivery aborted: {0}")]
    Delivery(String),
}
