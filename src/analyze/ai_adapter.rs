//! Summarization service abstraction + concrete providers.
//!
//! The digest generator only sees [`SummarizationService`]: one request in,
//! raw response text out. Parsing and fallback live in `analyze::digest`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::error::SummarizeError;

const OPENAI_BASE: &str = "https://api.openai.com/v1";

pub type SummaryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>>;

/// Opaque request/response summarization backend.
pub trait SummarizationService: Send + Sync {
    /// Send one system instruction + user content pair and return the raw
    /// response body the model produced.
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> SummaryFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynSummarizer = Arc<dyn SummarizationService>;

/// Factory: build a service according to config.
///
/// * `"mock"` → deterministic [`MockService`] with a well-formed digest.
/// * `"disabled"` → [`DisabledService`] (every digest degrades to the error fallback).
/// * anything else → [`OpenAiService`].
pub fn build_service_from_config(config: &AiConfig) -> Result<DynSummarizer, SummarizeError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockService::replying(MockService::SAMPLE_DIGEST))),
        "disabled" => Ok(Arc::new(DisabledService)),
        _ => Ok(Arc::new(OpenAiService::new(config)?)),
    }
}

// ------------------------------------------------------------
// OpenAI Chat Completions
// ------------------------------------------------------------

pub struct OpenAiService {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiService {
    pub fn new(config: &AiConfig) -> Result<Self, SummarizeError> {
        let http = reqwest::Client::builder()
            .user_agent("market-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn complete_impl(&self, system: &str, user: &str) -> Result<String, SummarizeError> {
        if self.api_key.is_empty() {
            return Err(SummarizeError::NotConfigured);
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let body: Resp = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(SummarizeError::EmptyResponse)
    }
}

impl SummarizationService for OpenAiService {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> SummaryFuture<'a> {
        Box::pin(self.complete_impl(system, user))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled + mock
// ------------------------------------------------------------

/// Always fails with `NotConfigured`.
pub struct DisabledService;

impl SummarizationService for DisabledService {
    fn complete<'a>(&'a self, _system: &'a str, _user: &'a str) -> SummaryFuture<'a> {
        Box::pin(async { Err(SummarizeError::NotConfigured) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted service for tests and local runs. Records every request.
pub struct MockService {
    reply: Result<String, String>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockService {
    pub const SAMPLE_DIGEST: &'static str = r#"{
  "summary": "Markets steady ahead of central bank decisions.",
  "potentially_impacted_stocks": ["SPY"],
  "market_sectors": ["Financials"],
  "sentiment": "neutral",
  "key_points": ["Rates on hold", "Volatility muted"]
}"#;

    pub fn replying(body: impl Into<String>) -> Self {
        Self {
            reply: Ok(body.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            reply: Err(reason.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl SummarizationService for MockService {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> SummaryFuture<'a> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system.to_string(), user.to_string()));
        }
        let out = self
            .reply
            .clone()
            .map_err(SummarizeError::Transport);
        Box::pin(async move { out })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_service_reports_not_configured() {
        let err = DisabledService.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, SummarizeError::NotConfigured));
    }

    #[tokio::test]
    async fn openai_without_key_fails_before_any_request() {
        let cfg = AiConfig {
            api_key: String::new(),
            ..AiConfig::default()
        };
        let svc = OpenAiService::new(&cfg).unwrap();
        let err = svc.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, SummarizeError::NotConfigured));
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let svc = MockService::replying("{}");
        assert_eq!(svc.complete("sys", "user").await.unwrap(), "{}");
        assert_eq!(svc.call_count(), 1);
        let calls = svc.calls.lock().unwrap();
        assert_eq!(calls[0].0, "sys");
        assert_eq!(calls[0].1, "user");
    }

    #[test]
    fn factory_picks_provider() {
        let mock = AiConfig {
            provider: "mock".into(),
            ..AiConfig::default()
        };
        assert_eq!(build_service_from_config(&mock).unwrap().provider_name(), "mock");
        let off = AiConfig {
            provider: "disabled".into(),
            ..AiConfig::default()
        };
        assert_eq!(build_service_from_config(&off).unwrap().provider_name(), "disabled");
    }
}
