// src/commands/listener.rs
//! `getUpdates` long-poll loop feeding the command handler.

use std::sync::Arc;
use std::time::Duration;

use crate::commands::{parse_command, Command, CommandHandler, CommandSender};
use crate::notify::telegram::{BotApiTransport, Update};
use crate::shutdown::Shutdown;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What one update asks of the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Command {
        cmd: Command,
        from: CommandSender,
        chat_id: i64,
    },
    /// Plain text in a private chat.
    Chatter { chat_id: i64 },
}

/// Map an update to handler work. Group chatter, bot senders and
/// non-message updates are ignored.
pub fn route(update: &Update, bot_username: Option<&str>) -> Option<Routed> {
    let msg = update.message.as_ref()?;
    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }
    let text = msg.text.as_deref()?;
    let sender = CommandSender {
        id: from.id,
        username: from.username.clone(),
        first_name: from.first_name.clone(),
    };
    match parse_command(text, bot_username) {
        Some(cmd) => Some(Routed::Command {
            cmd,
            from: sender,
            chat_id: msg.chat.id,
        }),
        None if msg.chat.kind == "private" && !text.trim_start().starts_with('/') => {
            Some(Routed::Chatter { chat_id: msg.chat.id })
        }
        None => None,
    }
}

pub struct CommandListener {
    transport: Arc<BotApiTransport>,
    handler: Arc<CommandHandler>,
    poll_timeout: Duration,
}

impl CommandListener {
    pub fn new(transport: Arc<BotApiTransport>, handler: Arc<CommandHandler>, poll_timeout: Duration) -> Self {
        Self {
            transport,
            handler,
            poll_timeout,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let bot_username = match self.transport.get_me().await {
            Ok(me) => {
                tracing::info!(target: "commands", bot = ?me.username, "command listener started");
                me.username
            }
            Err(e) => {
                tracing::warn!(target: "commands", error = %e, "getMe failed, accepting unaddressed commands only");
                None
            }
        };

        let mut offset: Option<i64> = None;
        loop {
            let polled = tokio::select! {
                _ = shutdown.wait() => break,
                r = self.transport.get_updates(offset, self.poll_timeout) => r,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let Some(work) = route(&update, bot_username.as_deref()) else {
                            continue;
                        };
                        let handler = self.handler.clone();
                        // forced cycles can take a while; keep polling meanwhile
                        tokio::spawn(async move {
                            match work {
                                Routed::Command { cmd, from, chat_id } => handler.handle(cmd, &from, chat_id).await,
                                Routed::Chatter { chat_id } => handler.handle_text(chat_id).await,
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "commands", error = %e, "getUpdates failed");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!(target: "commands", "command listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn routes_private_command() {
        let u = update(
            r#"{"update_id":1,"message":{"message_id":1,"from":{"id":42,"is_bot":false,"first_name":"Ann"},
                "chat":{"id":42,"type":"private"},"text":"/start"}}"#,
        );
        match route(&u, Some("DigestBot")) {
            Some(Routed::Command { cmd, from, chat_id }) => {
                assert_eq!(cmd, Command::Start);
                assert_eq!(from.id, 42);
                assert_eq!(chat_id, 42);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn private_chatter_gets_hint_group_chatter_ignored() {
        let private = update(
            r#"{"update_id":2,"message":{"message_id":2,"from":{"id":7,"is_bot":false},
                "chat":{"id":7,"type":"private"},"text":"hi"}}"#,
        );
        assert_eq!(route(&private, None), Some(Routed::Chatter { chat_id: 7 }));

        let group = update(
            r#"{"update_id":3,"message":{"message_id":3,"from":{"id":7,"is_bot":false},
                "chat":{"id":-100,"type":"group"},"text":"hi all"}}"#,
        );
        assert_eq!(route(&group, None), None);
    }

    #[test]
    fn bots_and_foreign_commands_ignored() {
        let bot = update(
            r#"{"update_id":4,"message":{"message_id":4,"from":{"id":9,"is_bot":true},
                "chat":{"id":9,"type":"private"},"text":"/start"}}"#,
        );
        assert_eq!(route(&bot, None), None);

        let foreign = update(
            r#"{"update_id":5,"message":{"message_id":5,"from":{"id":7,"is_bot":false},
                "chat":{"id":-100,"type":"group"},"text":"/start@OtherBot"}}"#,
        );
        assert_eq!(route(&foreign, Some("DigestBot")), None);
    }
}
