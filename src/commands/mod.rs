// src/commands/mod.rs
//! Chat command surface: parsing and handlers. The polling loop lives in
//! [`listener`].

pub mod listener;

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::oneshot;

use crate::history::StatusBoard;
use crate::notify::render::{escape_markdown, strip_markdown};
use crate::notify::{Notifier, SendTarget, TextFormat};
use crate::pipeline::{Audience, CycleOutcome, ForceRequest, ForceSender, DEFAULT_FORCED_WINDOW};
use crate::subscribers::{SubscriberMeta, SubscriberRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Help,
    Status,
    Test,
    ForceUpdate,
    SubscribeMe,
    Unknown(String),
}

/// Parse `/cmd`, `/cmd args` or `/cmd@BotName args`. Returns `None` for plain
/// text and for commands addressed to a different bot.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let head = text.trim().split_whitespace().next()?;
    let head = head.strip_prefix('/')?;
    let (name, target) = match head.split_once('@') {
        Some((n, t)) => (n, Some(t)),
        None => (head, None),
    };
    if let (Some(target), Some(me)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(me.trim_start_matches('@')) {
            return None;
        }
    }

    Some(match name.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "help" => Command::Help,
        "status" => Command::Status,
        "test" => Command::Test,
        "force_update" => Command::ForceUpdate,
        "subscribe_me" => Command::SubscribeMe,
        other => Command::Unknown(other.to_string()),
    })
}

/// Who sent a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl CommandSender {
    fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| "there".to_string())
    }

    fn meta(&self) -> SubscriberMeta {
        SubscriberMeta::new(self.username.clone(), self.first_name.clone())
    }
}

pub const HELP_TEXT: &str = "📈 *Financial News Bot - Commands*:

/start - Subscribe to financial news summaries
/stop - Unsubscribe from updates
/help - Show this help message
/status - Show bot status and subscriber count
/test - Send a test summary to yourself
/subscribe\\_me - Subscribe yourself
/force\\_update - Force an immediate update to all subscribers

This bot monitors a financial news channel and sends periodic summaries with potentially impacted stocks.";

const ALREADY_SUBSCRIBED: &str = "You're already subscribed to financial news summaries.";
const UNSUBSCRIBED: &str =
    "You've been unsubscribed from financial news summaries. Use /start to subscribe again.";
const NOT_SUBSCRIBED: &str = "You're not currently subscribed. Use /start to subscribe.";
const REGISTRY_TROUBLE: &str = "Sorry, I couldn't update your subscription right now. Please try again later.";
const UNKNOWN_HINT: &str = "I don't know that command. Use /help to see what I can do.";
const NO_MESSAGES: &str = "No messages found to summarize.";

fn welcome_text(name: &str, long: bool) -> String {
    let mut s = format!(
        "👋 Welcome {}! You're now subscribed to financial news summaries.",
        escape_markdown(name)
    );
    if long {
        s.push_str(
            "\n\nYou will receive regular summaries with:\n\
             - Brief summary of key points\n\
             - Market sentiment analysis\n\
             - Potentially impacted stocks\n\
             - Affected market sectors\n\n\
             Use /help to see all commands.",
        );
    }
    s
}

pub struct CommandHandler {
    registry: Arc<SubscriberRegistry>,
    status: Arc<StatusBoard>,
    replier: Arc<dyn Notifier>,
    force: Option<ForceSender>,
    forced_window: Duration,
    tz: Tz,
}

impl CommandHandler {
    pub fn new(registry: Arc<SubscriberRegistry>, status: Arc<StatusBoard>, replier: Arc<dyn Notifier>) -> Self {
        Self {
            registry,
            status,
            replier,
            force: None,
            forced_window: DEFAULT_FORCED_WINDOW,
            tz: chrono_tz::Asia::Singapore,
        }
    }

    pub fn with_force(mut self, force: ForceSender, window: Duration) -> Self {
        self.force = Some(force);
        self.forced_window = window;
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub async fn handle(&self, cmd: Command, from: &CommandSender, chat_id: i64) {
        tracing::info!(target: "commands", ?cmd, user = from.id, "command received");
        match cmd {
            Command::Start => self.subscribe(from, chat_id, true).await,
            Command::SubscribeMe => self.subscribe(from, chat_id, false).await,
            Command::Stop => {
                let text = match self.registry.remove(from.id) {
                    Ok(true) => UNSUBSCRIBED,
                    Ok(false) => NOT_SUBSCRIBED,
                    Err(e) => {
                        tracing::error!(target: "commands", user = from.id, error = %e, "unsubscribe failed");
                        REGISTRY_TROUBLE
                    }
                };
                self.reply(chat_id, text).await;
            }
            Command::Help => self.reply(chat_id, HELP_TEXT).await,
            Command::Status => {
                let text = self.status_text();
                self.reply(chat_id, &text).await;
            }
            Command::ForceUpdate => {
                self.reply(chat_id, "Forcing an immediate update to all subscribers...").await;
                let text = match self.force(Audience::All).await {
                    Ok(CycleOutcome::Delivered { report, .. }) if report.delivered() => format!(
                        "✅ Force update sent to {} of {} subscribers.",
                        report.succeeded, report.attempted
                    ),
                    Ok(CycleOutcome::Delivered { .. }) => {
                        "⚠️ There were issues sending the update to subscribers. Check logs for details.".to_string()
                    }
                    Ok(CycleOutcome::NoSubscribers { .. }) => "There are no active subscribers to update.".to_string(),
                    Ok(_) => NO_MESSAGES.to_string(),
                    Err(e) => {
                        tracing::error!(target: "commands", error = %e, "forced update failed");
                        "Error generating summary.".to_string()
                    }
                };
                self.reply(chat_id, &text).await;
            }
            Command::Test => {
                if let Err(e) = self.registry.add(from.id, from.meta()) {
                    tracing::warn!(target: "commands", user = from.id, error = %e, "could not subscribe test user");
                }
                self.reply(chat_id, "Fetching latest news and generating a test summary...").await;
                let text = match self.force(Audience::Only(from.id)).await {
                    Ok(CycleOutcome::Delivered { report, .. }) if report.delivered() => None,
                    Ok(CycleOutcome::Delivered { .. }) => {
                        Some("⚠️ Test delivery failed. Check logs for details.".to_string())
                    }
                    Ok(_) => Some(NO_MESSAGES.to_string()),
                    Err(e) => {
                        tracing::error!(target: "commands", error = %e, "test summary failed");
                        Some("Error generating summary.".to_string())
                    }
                };
                // a delivered digest is its own answer
                if let Some(text) = text {
                    self.reply(chat_id, &text).await;
                }
            }
            Command::Unknown(_) => self.reply(chat_id, UNKNOWN_HINT).await,
        }
    }

    /// Non-command text in a private chat.
    pub async fn handle_text(&self, chat_id: i64) {
        self.reply(chat_id, UNKNOWN_HINT).await;
    }

    async fn subscribe(&self, from: &CommandSender, chat_id: i64, long: bool) {
        let text = match self.registry.add(from.id, from.meta()) {
            Ok(true) => welcome_text(&from.display_name(), long),
            Ok(false) => ALREADY_SUBSCRIBED.to_string(),
            Err(e) => {
                tracing::error!(target: "commands", user = from.id, error = %e, "subscribe failed");
                REGISTRY_TROUBLE.to_string()
            }
        };
        self.reply(chat_id, &text).await;
    }

    fn status_text(&self) -> String {
        let subscribers = self.registry.active_count().unwrap_or(0);
        let last_check = self
            .status
            .last_cycle_at()
            .map(|t| t.with_timezone(&self.tz).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let cursor = self
            .status
            .cursor()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "🤖 *Bot Status*:\n- Active: ✅\n- Subscribers: {subscribers}\n- Last check: {last_check}\n- Target channel: {}\n- Last digested message: {cursor}",
            escape_markdown(self.status.channel())
        )
    }

    async fn force(&self, audience: Audience) -> Result<CycleOutcome, String> {
        let Some(tx) = &self.force else {
            return Err("forced updates are not available".to_string());
        };
        let (reply, rx) = oneshot::channel();
        tx.send(ForceRequest {
            window: self.forced_window,
            audience,
            reply,
        })
        .await
        .map_err(|_| "pipeline is not running".to_string())?;
        rx.await.map_err(|_| "pipeline dropped the request".to_string())?
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        let target = SendTarget::RawId(chat_id);
        let res = match self.replier.send(&target, text, TextFormat::Markdown).await {
            Err(e) if e.is_format_rejection() => {
                self.replier.send(&target, &strip_markdown(text), TextFormat::Plain).await
            }
            other => other,
        };
        if let Err(e) = res {
            tracing::warn!(target: "commands", chat_id, error = %e, "reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::ScriptedNotifier;
    use crate::notify::DeliveryReport;

    fn sender(id: i64) -> CommandSender {
        CommandSender {
            id,
            username: Some("ann".into()),
            first_name: Some("Ann".into()),
        }
    }

    fn handler() -> (CommandHandler, Arc<ScriptedNotifier>, Arc<SubscriberRegistry>) {
        let notifier = Arc::new(ScriptedNotifier::default());
        let registry = Arc::new(SubscriberRegistry::in_memory());
        let status = Arc::new(StatusBoard::new("marketfeed"));
        let h = CommandHandler::new(registry.clone(), status, notifier.clone());
        (h, notifier, registry)
    }

    fn replies(n: &ScriptedNotifier) -> Vec<String> {
        n.sent.lock().unwrap().iter().map(|s| s.2.clone()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("/start", None), Some(Command::Start));
        assert_eq!(parse_command("  /Force_Update now", None), Some(Command::ForceUpdate));
        assert_eq!(parse_command("/status@DigestBot", Some("digestbot")), Some(Command::Status));
        assert_eq!(parse_command("/status@OtherBot", Some("DigestBot")), None);
        assert_eq!(parse_command("/whatever", None), Some(Command::Unknown("whatever".into())));
        assert_eq!(parse_command("hello", None), None);
        assert_eq!(parse_command("", None), None);
    }

    #[tokio::test]
    async fn start_then_start_again() {
        let (h, n, reg) = handler();
        h.handle(Command::Start, &sender(1), 1).await;
        h.handle(Command::Start, &sender(1), 1).await;
        let r = replies(&n);
        assert!(r[0].starts_with("👋 Welcome Ann!"));
        assert_eq!(r[1], ALREADY_SUBSCRIBED);
        assert_eq!(reg.list_active().unwrap(), vec![1]);
        assert_eq!(reg.get(1).unwrap().unwrap().username.as_deref(), Some("ann"));
    }

    #[tokio::test]
    async fn stop_unknown_and_known() {
        let (h, n, reg) = handler();
        h.handle(Command::Stop, &sender(2), 2).await;
        reg.add(2, SubscriberMeta::default()).unwrap();
        h.handle(Command::Stop, &sender(2), 2).await;
        assert_eq!(replies(&n), vec![NOT_SUBSCRIBED.to_string(), UNSUBSCRIBED.to_string()]);
        assert!(reg.list_active().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_reports_counts_and_channel() {
        let (h, n, reg) = handler();
        reg.add(1, SubscriberMeta::default()).unwrap();
        reg.add(2, SubscriberMeta::default()).unwrap();
        h.handle(Command::Status, &sender(1), 1).await;
        let r = replies(&n);
        assert!(r[0].contains("Subscribers: 2"));
        assert!(r[0].contains("Target channel: marketfeed"));
        assert!(r[0].contains("Last check: never"));
    }

    #[tokio::test]
    async fn force_without_pipeline_reports_error() {
        let (h, n, _) = handler();
        h.handle(Command::ForceUpdate, &sender(1), 1).await;
        let r = replies(&n);
        assert_eq!(r.len(), 2);
        assert_eq!(r[1], "Error generating summary.");
    }

    #[tokio::test]
    async fn force_reports_delivery_counts() {
        let (h, n, _) = handler();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ForceRequest>(1);
        let h = h.with_force(tx, DEFAULT_FORCED_WINDOW);
        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            assert_eq!(req.audience, Audience::All);
            let report = DeliveryReport {
                attempted: 3,
                succeeded: 2,
                ..Default::default()
            };
            let digest = crate::analyze::digest::decode_or_degrade("oops");
            let _ = req.reply.send(Ok(CycleOutcome::Delivered {
                newest_id: 1,
                fetched: 1,
                digest,
                report,
            }));
        });
        h.handle(Command::ForceUpdate, &sender(1), 1).await;
        assert_eq!(replies(&n)[1], "✅ Force update sent to 2 of 3 subscribers.");
    }

    #[tokio::test]
    async fn test_command_subscribes_sender() {
        let (h, n, reg) = handler();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ForceRequest>(1);
        let h = h.with_force(tx, DEFAULT_FORCED_WINDOW);
        tokio::spawn(async move {
            let req = rx.recv().await.unwrap();
            assert_eq!(req.audience, Audience::Only(5));
            let _ = req.reply.send(Ok(CycleOutcome::NoMessages));
        });
        h.handle(Command::Test, &sender(5), 5).await;
        assert_eq!(reg.list_active().unwrap(), vec![5]);
        assert_eq!(replies(&n).last().unwrap(), NO_MESSAGES);
    }
}
