//! To-do Bot Example
//!
//! A console bot keeping a per-user to-do list, built on adaptive dialogs:
//! a first-visit name prompt, intent rules for list editing, and an
//! interruptible prompt for items.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package todo-bot -- --config demos/todo-bot/parley.toml --user ada
//! ```
//!
//! State is kept in the configured storage, so restarting the bot with the
//! same `--user` picks the list up again.

mod bot;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use parley::core::ChannelAccount;
use parley::prelude::*;
use parley::runtime::config::StorageKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "todo-bot", about = "A to-do list bot on the console")]
struct Args {
    /// Configuration file; searched for in the usual places when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production or a custom name).
    #[arg(short, long)]
    profile: Option<String>,

    /// Keep state as JSON files in this directory.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Who is talking.
    #[arg(short, long, default_value = "me")]
    user: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let mut config = loader.load()?;
    if let Some(dir) = args.data_dir {
        config.storage.kind = StorageKind::File;
        config.storage.path = Some(dir);
    }
    logging::init_from_config(&config.logging);

    let bot_name = config.settings["bot_name"]
        .as_str()
        .unwrap_or("bot")
        .to_owned();
    let manager = DialogManager::builder(bot::root()?)
        .config(&config)?
        .build()?;
    info!(user = %args.user, storage = ?config.storage.kind, "To-do bot started");

    let account = ChannelAccount::new(&args.user);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Say something to start (Ctrl+D to quit).\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if !text.is_empty() {
            let activity =
                Activity::message(text).with_address("console", account.clone(), account.clone());
            match manager.on_turn(activity).await {
                Ok(outcome) => {
                    for reply in outcome.texts() {
                        stdout
                            .write_all(format!("{bot_name}: {reply}\n").as_bytes())
                            .await?;
                    }
                }
                Err(e) => error!(error = %e, "Turn failed"),
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    info!("Bye");
    Ok(())
}
