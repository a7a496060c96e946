//! Market digest bot: binary entrypoint.
//! Loads configuration, wires the pipeline, command listener and status
//! server, then runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_digest_bot::analyze::{build_service_from_config, DigestGenerator};
use market_digest_bot::api::{self, AppState};
use market_digest_bot::commands::listener::CommandListener;
use market_digest_bot::commands::CommandHandler;
use market_digest_bot::config::BotConfig;
use market_digest_bot::history::StatusBoard;
use market_digest_bot::ingest::{providers::build_source, FeedReader};
use market_digest_bot::metrics::Metrics;
use market_digest_bot::notify::{BotApiTransport, DeliveryIdentity, Dispatcher, Notifier};
use market_digest_bot::pipeline::Pipeline;
use market_digest_bot::shutdown;
use market_digest_bot::subscribers::{SubscriberMeta, SubscriberRegistry};
use market_digest_bot::STARTUP_ANNOUNCEMENT;

/// `RUST_LOG` filter (default `market_digest_bot=info,warn`); `LOG_FORMAT=json`
/// switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_digest_bot=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BotConfig::load_default().context("load configuration")?;
    let tz = cfg.pipeline.tz()?;

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let (trigger, shutdown) = shutdown::channel();

    // --- registry ---
    let registry = Arc::new(
        SubscriberRegistry::open(&cfg.subscribers.path)
            .with_context(|| format!("open subscriber file {}", cfg.subscribers.path.display()))?,
    );
    if let Some(admin) = cfg.subscribers.admin_id {
        match registry.add(admin, SubscriberMeta::default()) {
            Ok(true) => tracing::info!(admin, "admin subscribed"),
            Ok(false) => {}
            Err(e) => tracing::warn!(admin, error = %e, "could not subscribe admin"),
        }
    }

    // --- delivery identities ---
    let primary = Arc::new(
        BotApiTransport::new(cfg.telegram.bot_token.clone(), "primary")?.with_base(cfg.telegram.api_base.clone()),
    );
    let fallback: Option<Arc<dyn Notifier>> = match &cfg.telegram.fallback_bot_token {
        Some(token) => Some(Arc::new(
            BotApiTransport::new(token.clone(), "fallback")?.with_base(cfg.telegram.api_base.clone()),
        )),
        None => None,
    };

    // --- pipeline ---
    let reader = FeedReader::new(build_source(&cfg.feed)?, cfg.feed.channel.clone(), cfg.feed.page_limit)
        .with_max_cooldown(cfg.pipeline.interval());
    let generator =
        DigestGenerator::new(build_service_from_config(&cfg.ai)?).with_max_input_chars(cfg.pipeline.max_input_chars);
    let dispatcher = Dispatcher::new(primary.clone())
        .with_fallback(fallback)
        .with_pause(cfg.pipeline.send_pause())
        .with_send_timeout(cfg.pipeline.send_timeout())
        .with_timezone(tz)
        .with_shutdown(shutdown.clone());

    tracing::info!(
        channel = %cfg.feed.channel,
        source = ?cfg.feed.provider,
        summarizer = generator.provider_name(),
        fallback_identity = dispatcher.has_fallback(),
        interval_secs = cfg.pipeline.interval().as_secs(),
        "starting market digest bot"
    );

    if cfg.pipeline.announce_startup {
        match registry.list_active() {
            Ok(active) if !active.is_empty() => {
                let report = dispatcher
                    .deliver_text(STARTUP_ANNOUNCEMENT, &active, DeliveryIdentity::Primary)
                    .await;
                tracing::info!(succeeded = report.succeeded, attempted = report.attempted, "startup announcement sent");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "startup announcement skipped"),
        }
    }

    let status = Arc::new(StatusBoard::new(cfg.feed.channel.clone()));
    let mut pipeline = Pipeline::new(reader, generator, dispatcher, registry.clone())
        .with_window(cfg.pipeline.window())
        .with_fault_cooldown(cfg.pipeline.fault_cooldown())
        .with_status(status.clone());
    let force = pipeline.force_channel();

    let handler = Arc::new(
        CommandHandler::new(registry.clone(), status.clone(), primary.clone())
            .with_force(force, cfg.pipeline.forced_window())
            .with_timezone(tz),
    );
    let listener = CommandListener::new(
        primary.clone(),
        handler,
        Duration::from_secs(cfg.telegram.poll_timeout_secs),
    );

    // --- tasks ---
    let mut tasks = JoinSet::new();

    if cfg.http.enabled {
        let addr = cfg.http.addr()?;
        let app = api::router(AppState {
            status: status.clone(),
            registry: registry.clone(),
            metrics: metrics.as_ref().map(|m| m.handle.clone()),
        });
        let sd = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = api::serve(addr, app, sd).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    tasks.spawn(listener.run(shutdown.clone()));
    tasks.spawn(pipeline.run_cycle_forever(cfg.pipeline.interval(), shutdown.clone()));

    tokio::signal::ctrl_c().await.context("listen for Ctrl-C")?;
    tracing::info!("shutdown requested");
    trigger.trigger();

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            tracing::error!(error = %e, "task ended abnormally");
        }
    }
    tracing::info!("bye");
    Ok(())
}
