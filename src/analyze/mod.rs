// src/analyze/mod.rs
//! Summarization: the service adapter and the digest generator built on it.

pub mod ai_adapter;
pub mod digest;

pub use ai_adapter::{build_service_from_config, DynSummarizer, SummarizationService};
pub use digest::{Digest, DigestGenerator, DigestOutcome, FallbackReason, Sentiment};
