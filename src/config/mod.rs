// src/config/mod.rs
//! Runtime configuration: TOML file + environment overrides.
//!
//! Lookup order for the file:
//! 1) $BOT_CONFIG_PATH
//! 2) config/bot.toml
//! 3) built-in defaults
//!
//! Secrets are never written in the file; `"ENV"` (or an empty value) means
//! "read from the matching environment variable".

pub mod ai;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use ai::AiConfig;

pub const ENV_CONFIG_PATH: &str = "BOT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/bot.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub subscribers: SubscribersConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Primary delivery identity; also runs the command surface.
    #[serde(default = "env_marker")]
    pub bot_token: String,
    /// Optional fallback delivery identity.
    #[serde(default)]
    pub fallback_bot_token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: env_marker(),
            fallback_bot_token: None,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedProviderKind {
    /// Public web preview at `t.me/s/<channel>`.
    Preview,
    /// RSS bridge serving `<base>/<channel>`.
    Rss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_provider_kind")]
    pub provider: FeedProviderKind,
    #[serde(default = "default_preview_base")]
    pub preview_base: String,
    #[serde(default = "default_rss_base")]
    pub rss_base: String,
    /// Upper bound of items read per fetch.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            provider: default_provider_kind(),
            preview_base: default_preview_base(),
            rss_base: default_rss_base(),
            page_limit: default_page_limit(),
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Fetch window; defaults to the interval when absent.
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Window used by forced cycles (`/force_update`, `/test`).
    #[serde(default = "default_forced_window_secs")]
    pub forced_window_secs: u64,
    #[serde(default = "default_fault_cooldown_secs")]
    pub fault_cooldown_secs: u64,
    #[serde(default = "default_send_pause_ms")]
    pub send_pause_ms: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub announce_startup: bool,
    /// IANA zone used for "Generated at" timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window_secs: None,
            forced_window_secs: default_forced_window_secs(),
            fault_cooldown_secs: default_fault_cooldown_secs(),
            send_pause_ms: default_send_pause_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            announce_startup: false,
            timezone: default_timezone(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.unwrap_or(self.interval_secs).max(1))
    }

    pub fn forced_window(&self) -> Duration {
        Duration::from_secs(self.forced_window_secs.max(1))
    }

    pub fn fault_cooldown(&self) -> Duration {
        Duration::from_secs(self.fault_cooldown_secs)
    }

    pub fn send_pause(&self) -> Duration {
        Duration::from_millis(self.send_pause_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribersConfig {
    #[serde(default = "default_subscribers_path")]
    pub path: PathBuf,
    /// Subscribed automatically at start when set.
    #[serde(default)]
    pub admin_id: Option<i64>,
}

impl Default for SubscribersConfig {
    fn default() -> Self {
        Self {
            path: default_subscribers_path(),
            admin_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid http bind address {:?}", self.bind))
    }
}

fn env_marker() -> String {
    "ENV".to_string()
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_timeout_secs() -> u64 {
    30
}
fn default_channel() -> String {
    "marketfeed".to_string()
}
fn default_provider_kind() -> FeedProviderKind {
    FeedProviderKind::Preview
}
fn default_preview_base() -> String {
    "https://t.me/s".to_string()
}
fn default_rss_base() -> String {
    "https://rsshub.app/telegram/channel".to_string()
}
fn default_page_limit() -> usize {
    50
}
fn default_feed_timeout_secs() -> u64 {
    20
}
fn default_interval_secs() -> u64 {
    30 * 60
}
fn default_forced_window_secs() -> u64 {
    2 * 3600
}
fn default_fault_cooldown_secs() -> u64 {
    60
}
fn default_send_pause_ms() -> u64 {
    1000
}
fn default_send_timeout_secs() -> u64 {
    15
}
fn default_timezone() -> String {
    "Asia/Singapore".to_string()
}
fn default_max_input_chars() -> usize {
    15_000
}
fn default_subscribers_path() -> PathBuf {
    PathBuf::from("subscribers.json")
}
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl BotConfig {
    /// Parse a TOML file without touching the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Locate the file ($BOT_CONFIG_PATH, then config/bot.toml), fall back to
    /// defaults, then apply environment overrides and resolve secrets.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("BOT_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        base.with_env_overrides()?.resolve()
    }

    /// Apply the handful of plain env overrides the deployment uses.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(ch) = env_nonempty("TARGET_CHANNEL") {
            self.feed.channel = ch;
        }
        if let Some(m) = env_nonempty("SUMMARY_INTERVAL_MINUTES") {
            let minutes: u64 = m
                .parse()
                .with_context(|| format!("SUMMARY_INTERVAL_MINUTES={m:?} is not a number"))?;
            self.pipeline.interval_secs = minutes.max(1) * 60;
        }
        if let Some(p) = env_nonempty("SUBSCRIBERS_FILE") {
            self.subscribers.path = PathBuf::from(p);
        }
        if let Some(id) = env_nonempty("ADMIN_ID") {
            let id: i64 = id
                .parse()
                .with_context(|| format!("ADMIN_ID={id:?} is not a numeric id"))?;
            self.subscribers.admin_id = Some(id);
        }
        if let Some(bind) = env_nonempty("HTTP_BIND") {
            self.http.bind = bind;
        }
        Ok(self)
    }

    /// Resolve `"ENV"` secrets and validate what the service cannot run without.
    pub fn resolve(mut self) -> Result<Self> {
        self.telegram.bot_token = resolve_secret(&self.telegram.bot_token, "TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| anyhow!("Missing TELEGRAM_BOT_TOKEN env var"))?;

        self.telegram.fallback_bot_token = match self.telegram.fallback_bot_token.as_deref() {
            Some(raw) => resolve_secret(raw, "TELEGRAM_FALLBACK_BOT_TOKEN"),
            None => env_nonempty("TELEGRAM_FALLBACK_BOT_TOKEN"),
        };

        self.feed.channel = self.feed.channel.trim().to_string();
        if self.feed.channel.is_empty() {
            anyhow::bail!("feed.channel must not be empty");
        }
        if self.feed.page_limit == 0 {
            self.feed.page_limit = default_page_limit();
        }

        self.pipeline.tz()?;
        self.ai = self.ai.resolve()?;
        Ok(self)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_secret(raw: &str, env_key: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("env") {
        env_nonempty(env_key)
    } else {
        Some(t.to_string())
    }
}
