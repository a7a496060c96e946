// src/analyze/digest.rs
//! Digest generation: one summarization request per batch, decoded into a
//! typed [`Digest`] or degraded into a fixed fallback.

use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyze::ai_adapter::DynSummarizer;
use crate::ingest::types::MessageRecord;

pub const MESSAGE_SEPARATOR: &str = "\n\n---\n\n";
pub const DEFAULT_MAX_INPUT_CHARS: usize = 15_000;
const TRUNCATION_MARK: &str = "...(truncated)";
const RAW_PREFIX_CHARS: usize = 200;

pub const SERVICE_ERROR_SUMMARY: &str = "Error generating summary";
pub const SERVICE_ERROR_POINT: &str = "Failed to analyze news due to an error";
pub const PARSE_ERROR_POINT: &str = "Error: Unable to parse structured data";
pub const EMPTY_BATCH_SUMMARY: &str = "No news updates to summarize";

pub const SYSTEM_PROMPT: &str = r#"You are a financial analyst assistant. Summarize the following financial news updates
and identify potentially impacted stocks or market sectors.

Format your response as a valid JSON object with the following structure exactly:
{
    "summary": "Brief 2-3 sentence summary of key points",
    "potentially_impacted_stocks": ["TICKER1", "TICKER2"],
    "market_sectors": ["Sector1", "Sector2"],
    "sentiment": "bullish/bearish/neutral",
    "key_points": ["Point 1", "Point 2", "Point 3"]
}
Make sure your response can be parsed as valid JSON."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Lenient parse: anything unrecognized is neutral.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullish" | "positive" => Sentiment::Bullish,
            "bearish" | "negative" => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub summary: String,
    #[serde(rename = "potentially_impacted_stocks", alias = "impacted_entities", default)]
    pub impacted_entities: Vec<String>,
    #[serde(rename = "market_sectors", alias = "sectors", default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub key_points: Vec<String>,
}

impl Digest {
    fn fallback(summary: String, key_point: Option<&str>) -> Self {
        Self {
            summary,
            impacted_entities: Vec::new(),
            sectors: Vec::new(),
            sentiment: Sentiment::Neutral,
            key_points: key_point.map(|p| vec![p.to_string()]).unwrap_or_default(),
        }
    }

    pub fn service_error() -> Self {
        Self::fallback(SERVICE_ERROR_SUMMARY.to_string(), Some(SERVICE_ERROR_POINT))
    }

    pub fn unparsable(raw: &str) -> Self {
        let prefix: String = raw.trim().chars().take(RAW_PREFIX_CHARS).collect();
        Self::fallback(format!("{prefix}..."), Some(PARSE_ERROR_POINT))
    }

    pub fn empty_batch() -> Self {
        Self::fallback(EMPTY_BATCH_SUMMARY.to_string(), None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    EmptyBatch,
    Service(String),
    Unparsable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigestOutcome {
    Parsed(Digest),
    Fallback { digest: Digest, reason: FallbackReason },
}

impl DigestOutcome {
    pub fn digest(&self) -> &Digest {
        match self {
            DigestOutcome::Parsed(d) => d,
            DigestOutcome::Fallback { digest, .. } => digest,
        }
    }

    pub fn into_digest(self) -> Digest {
        match self {
            DigestOutcome::Parsed(d) => d,
            DigestOutcome::Fallback { digest, .. } => digest,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DigestOutcome::Fallback { .. })
    }

    /// Label for the `digest_total{outcome}` series.
    pub fn label(&self) -> &'static str {
        match self {
            DigestOutcome::Parsed(_) => "parsed",
            DigestOutcome::Fallback { reason, .. } => match reason {
                FallbackReason::EmptyBatch => "empty",
                FallbackReason::Service(_) => "service_error",
                FallbackReason::Unparsable(_) => "unparsable",
            },
        }
    }
}

/// Join texts in fetch order and cap the combined length.
pub fn build_user_content(messages: &[MessageRecord], max_chars: usize) -> String {
    let combined = messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join(MESSAGE_SEPARATOR);

    let combined = if combined.chars().count() > max_chars {
        tracing::warn!(target: "digest", max_chars, "combined news text truncated");
        let mut cut: String = combined.chars().take(max_chars).collect();
        cut.push_str(TRUNCATION_MARK);
        cut
    } else {
        combined
    };

    format!("News updates to analyze:\n{combined}")
}

fn strip_code_fences(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match v {
        Some(Value::Array(xs)) => xs
            .iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn field<'a>(obj: &'a serde_json::Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

/// Decode a raw service response into a digest, repairing the common
/// deviations. Returns `None` when no usable object can be recovered.
pub fn decode_digest(raw: &str) -> Option<Digest> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let summary = obj.get("summary")?.as_str()?.trim().to_string();
    if summary.is_empty() {
        return None;
    }

    let sentiment = obj
        .get("sentiment")
        .and_then(Value::as_str)
        .map(Sentiment::from_label)
        .unwrap_or_default();

    Some(Digest {
        summary,
        impacted_entities: string_list(field(obj, &["potentially_impacted_stocks", "impacted_entities"])),
        sectors: string_list(field(obj, &["market_sectors", "sectors"])),
        sentiment,
        key_points: string_list(obj.get("key_points")),
    })
}

/// Typed decode-or-degrade over a raw response.
pub fn decode_or_degrade(raw: &str) -> DigestOutcome {
    match decode_digest(raw) {
        Some(d) => DigestOutcome::Parsed(d),
        None => {
            tracing::warn!(target: "digest", raw_len = raw.len(), "unparsable summarization response");
            DigestOutcome::Fallback {
                digest: Digest::unparsable(raw),
                reason: FallbackReason::Unparsable(raw.chars().take(RAW_PREFIX_CHARS).collect()),
            }
        }
    }
}

pub struct DigestGenerator {
    service: DynSummarizer,
    max_input_chars: usize,
}

impl DigestGenerator {
    pub fn new(service: DynSummarizer) -> Self {
        Self {
            service,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max.max(1);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.service.provider_name()
    }

    /// Always returns a well-formed digest.
    pub async fn generate(&self, messages: &[MessageRecord]) -> Digest {
        self.generate_outcome(messages).await.into_digest()
    }

    pub async fn generate_outcome(&self, messages: &[MessageRecord]) -> DigestOutcome {
        let outcome = if messages.is_empty() {
            DigestOutcome::Fallback {
                digest: Digest::empty_batch(),
                reason: FallbackReason::EmptyBatch,
            }
        } else {
            let user = build_user_content(messages, self.max_input_chars);
            match self.service.complete(SYSTEM_PROMPT, &user).await {
                Ok(raw) => {
                    tracing::debug!(target: "digest", raw = %raw, "summarization response");
                    decode_or_degrade(&raw)
                }
                Err(e) => {
                    tracing::error!(
                        target: "digest",
                        provider = self.service.provider_name(),
                        error = %e,
                        "summarization failed"
                    );
                    DigestOutcome::Fallback {
                        digest: Digest::service_error(),
                        reason: FallbackReason::Service(e.to_string()),
                    }
                }
            }
        };

        counter!("digest_total", "outcome" => outcome.label()).increment(1);
        tracing::info!(
            target: "digest",
            outcome = outcome.label(),
            messages = messages.len(),
            "digest generated"
        );
        outcome
    }
}
