// tests/config_load.rs
//
// The shipped config file parses, and the loader honours BOT_CONFIG_PATH
// plus the environment overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use market_digest_bot::config::{BotConfig, FeedProviderKind, ENV_CONFIG_PATH};

const ENV_KEYS: &[&str] = &[
    ENV_CONFIG_PATH,
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_FALLBACK_BOT_TOKEN",
    "OPENAI_API_KEY",
    "TARGET_CHANNEL",
    "SUMMARY_INTERVAL_MINUTES",
    "SUBSCRIBERS_FILE",
    "ADMIN_ID",
    "HTTP_BIND",
];

fn clear_env() {
    for k in ENV_KEYS {
        env::remove_var(k);
    }
}

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/bot.toml")
}

#[test]
fn shipped_config_matches_defaults() {
    let cfg = BotConfig::load_from(&shipped_config()).expect("config/bot.toml parses");
    let defaults = BotConfig::default();

    assert_eq!(cfg.feed.channel, defaults.feed.channel);
    assert_eq!(cfg.feed.provider, FeedProviderKind::Preview);
    assert_eq!(cfg.pipeline.interval(), Duration::from_secs(30 * 60));
    assert_eq!(cfg.pipeline.window(), cfg.pipeline.interval());
    assert_eq!(cfg.pipeline.forced_window(), Duration::from_secs(2 * 3600));
    assert_eq!(cfg.pipeline.timezone, "Asia/Singapore");
    assert_eq!(cfg.telegram.bot_token, "ENV");
    assert!(cfg.telegram.fallback_bot_token.is_none());
    assert_eq!(cfg.http.addr().unwrap().port(), 8080);
}

#[serial]
#[test]
fn env_path_and_overrides_apply() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot.toml");
    std::fs::write(
        &path,
        r#"
[telegram]
bot_token = "ENV"
fallback_bot_token = "ENV"

[feed]
channel = "@wallstreet_wire"
provider = "rss"

[ai]
provider = "mock"
"#,
    )
    .unwrap();

    env::set_var(ENV_CONFIG_PATH, &path);
    env::set_var("TELEGRAM_BOT_TOKEN", "111:primary");
    env::set_var("TELEGRAM_FALLBACK_BOT_TOKEN", "222:fallback");
    env::set_var("SUMMARY_INTERVAL_MINUTES", "15");
    env::set_var("SUBSCRIBERS_FILE", dir.path().join("subs.json"));

    let cfg = BotConfig::load_default().expect("load");

    assert_eq!(cfg.telegram.bot_token, "111:primary");
    assert_eq!(cfg.telegram.fallback_bot_token.as_deref(), Some("222:fallback"));
    assert_eq!(cfg.feed.channel, "@wallstreet_wire");
    assert_eq!(cfg.feed.provider, FeedProviderKind::Rss);
    assert_eq!(cfg.pipeline.interval(), Duration::from_secs(15 * 60));
    assert_eq!(cfg.subscribers.path, dir.path().join("subs.json"));
    assert_eq!(cfg.ai.provider, "mock");
    clear_env();
}

#[serial]
#[test]
fn non_numeric_interval_is_rejected() {
    clear_env();
    env::set_var("SUMMARY_INTERVAL_MINUTES", "half an hour");
    let err = BotConfig::default().with_env_overrides().unwrap_err();
    assert!(err.to_string().contains("SUMMARY_INTERVAL_MINUTES"));
    clear_env();
}

#[serial]
#[test]
fn missing_env_config_path_is_an_error() {
    clear_env();
    env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/bot.toml");
    assert!(BotConfig::load_default().is_err());
    clear_env();
}
