//! Subscriber admin CLI: inspect and edit the registry file the bot uses.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use market_digest_bot::config::BotConfig;
use market_digest_bot::subscribers::{SubscriberMeta, SubscriberRegistry};

/// Manage market digest subscribers
#[derive(Parser, Debug)]
#[command(name = "subscribers", version, about = "Manage market digest subscribers")]
struct Cli {
    /// Registry file (default: the bot's configured subscriber file)
    #[arg(short, long)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every known subscriber
    List {
        /// Only show active subscribers
        #[arg(long)]
        active: bool,
    },

    /// Subscribe (or reactivate) a recipient id
    Add {
        id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
    },

    /// Unsubscribe a recipient id
    Remove { id: i64 },
}

fn registry_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = &cli.file {
        return Ok(p.clone());
    }
    let _ = dotenvy::dotenv();
    // the CLI does not need bot credentials, so skip resolve()
    let path = std::env::var(market_digest_bot::config::ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(market_digest_bot::config::DEFAULT_CONFIG_PATH));
    let cfg = if path.exists() {
        BotConfig::load_from(&path)?
    } else {
        BotConfig::default()
    };
    Ok(std::env::var("SUBSCRIBERS_FILE")
        .map(PathBuf::from)
        .unwrap_or(cfg.subscribers.path))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();
    let path = registry_path(&cli)?;
    let registry =
        SubscriberRegistry::open(&path).with_context(|| format!("open subscriber file {}", path.display()))?;

    match cli.command {
        Command::List { active } => {
            let all = registry.all()?;
            println!("{:<14} {:<8} {:<20} {:<20} {}", "ID", "ACTIVE", "USERNAME", "FIRST NAME", "SUBSCRIBED AT");
            for s in all.iter().filter(|s| !active || s.active) {
                println!(
                    "{:<14} {:<8} {:<20} {:<20} {}",
                    s.id,
                    if s.active { "yes" } else { "no" },
                    s.username.as_deref().unwrap_or("-"),
                    s.first_name.as_deref().unwrap_or("-"),
                    s.subscribed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                );
            }
            let n_active = all.iter().filter(|s| s.active).count();
            println!("\n{} active, {} inactive", n_active, all.len() - n_active);
        }
        Command::Add {
            id,
            username,
            first_name,
        } => {
            if registry.add(id, SubscriberMeta::new(username, first_name))? {
                println!("subscribed {id}");
            } else {
                println!("{id} is already subscribed");
            }
        }
        Command::Remove { id } => {
            if registry.remove(id)? {
                println!("unsubscribed {id}");
            } else {
                println!("{id} is not an active subscriber");
            }
        }
    }
    Ok(())
}
