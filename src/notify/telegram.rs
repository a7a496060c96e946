// src/notify/telegram.rs
//! Telegram Bot API transport (`getChat`, `sendMessage`, `getUpdates`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Notifier, RecipientHandle, SendTarget, TextFormat};
use crate::error::DeliveryError;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct SendMessageReq<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

/// Classify a failed Bot API envelope. Unknown/blocked chats are
/// `Unreachable`; everything else the API refused is `Rejected`.
fn api_error(chat_id: i64, code: i64, description: String, retry_after: Option<u64>) -> DeliveryError {
    if code == 429 {
        return DeliveryError::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(1)),
        };
    }
    let lower = description.to_ascii_lowercase();
    if code == 403
        || lower.contains("chat not found")
        || lower.contains("user not found")
        || lower.contains("peer_id_invalid")
    {
        return DeliveryError::Unreachable(chat_id, description);
    }
    DeliveryError::Rejected { code, description }
}

#[derive(Clone)]
pub struct BotApiTransport {
    client: Client,
    base: String,
    token: String,
    label: &'static str,
    max_retries: u8,
}

impl BotApiTransport {
    pub fn new(token: impl Into<String>, label: &'static str) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .user_agent("market-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            label,
            max_retries: 3,
        })
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base, self.token, method)
    }

    /// One Bot API call. Transport failures and 5xx answers are retried with
    /// exponential backoff; API refusals are returned at once.
    async fn call<B, T>(
        &self,
        method: &str,
        body: &B,
        chat_id: i64,
        timeout: Option<Duration>,
    ) -> Result<T, DeliveryError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let mut req = self.client.post(self.url(method)).json(body);
            if let Some(t) = timeout {
                req = req.timeout(t);
            }

            let err = match req.send().await {
                Ok(rsp) => {
                    let status = rsp.status();
                    match rsp.json::<ApiEnvelope<T>>().await {
                        Ok(env) if env.ok => {
                            return env.result.ok_or_else(|| {
                                DeliveryError::Transport(format!("{method}: ok without result"))
                            });
                        }
                        Ok(env) if !status.is_server_error() => {
                            let code = env.error_code.unwrap_or(i64::from(status.as_u16()));
                            let description = env.description.unwrap_or_else(|| status.to_string());
                            return Err(api_error(
                                chat_id,
                                code,
                                description,
                                env.parameters.and_then(|p| p.retry_after),
                            ));
                        }
                        Ok(env) => DeliveryError::Transport(format!(
                            "{method}: HTTP {status}: {}",
                            env.description.unwrap_or_default()
                        )),
                        Err(e) if status.is_success() => {
                            return Err(DeliveryError::Transport(format!("{method}: bad body: {e}")));
                        }
                        Err(_) => DeliveryError::Transport(format!("{method}: HTTP {status}")),
                    }
                }
                Err(e) => DeliveryError::from(e),
            };

            if attempt < self.max_retries {
                tracing::debug!(target: "notify", bot = self.label, method, attempt, error = %err, "retrying Bot API call");
                tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                continue;
            }
            return Err(err);
        }
    }

    pub async fn get_me(&self) -> Result<User, DeliveryError> {
        self.call("getMe", &serde_json::json!({}), 0, None).await
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Chat, DeliveryError> {
        self.call("getChat", &serde_json::json!({ "chat_id": chat_id }), chat_id, None)
            .await
    }

    /// Long poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>, poll_timeout: Duration) -> Result<Vec<Update>, DeliveryError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body, 0, Some(poll_timeout + Duration::from_secs(10)))
            .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<i64, DeliveryError> {
        let req = SendMessageReq {
            chat_id,
            text,
            parse_mode: match format {
                TextFormat::Markdown => Some("Markdown"),
                TextFormat::Plain => None,
            },
            disable_web_page_preview: true,
        };
        let sent: SentMessage = self.call("sendMessage", &req, chat_id, None).await?;
        Ok(sent.message_id)
    }
}

#[async_trait]
impl Notifier for BotApiTransport {
    async fn resolve(&self, id: i64) -> Result<RecipientHandle, DeliveryError> {
        let chat = self.get_chat(id).await?;
        Ok(RecipientHandle {
            chat_id: chat.id,
            username: chat.username,
        })
    }

    async fn send(&self, target: &SendTarget, text: &str, format: TextFormat) -> Result<i64, DeliveryError> {
        self.send_message(target.chat_id(), text, format).await
    }

    fn name(&self) -> &'static str {
        self.label
    }
}
