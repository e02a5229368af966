//! Console Bot Example
//!
//! Runs Sprocket with stdin as the chat network: every line is a message
//! from you in one channel, and replies are printed to stdout.
//!
//! ```text
//! > alice++
//! > sprocket: karma alice
//! [#console] alice has 1 karma
//! > /nick bob
//! > /private karma alice
//! [bob] alice has 1 karma
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config sprocket.toml
//! ```

mod karma;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sprocket::core::{TransportError, TransportResult};
use sprocket::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(about = "Talk to a Sprocket bot from the terminal")]
struct Args {
    /// Configuration file; defaults to searching for sprocket.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Your nick.
    #[arg(long, default_value = "console")]
    nick: String,

    /// The channel your lines are sent to.
    #[arg(long, default_value = "#console")]
    channel: String,
}

/// Prints outbound messages to stdout.
struct ConsoleTransport {
    stdout: Mutex<tokio::io::Stdout>,
}

impl ConsoleTransport {
    fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn print(&self, line: String) -> TransportResult<()> {
        let mut stdout = self.stdout.lock().await;
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await
        }
        .await;
        written.map_err(|e| TransportError::send_failed("stdout", e.to_string()))
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, target: &str, text: &str) -> TransportResult<()> {
        self.print(format!("[{target}] {text}\n")).await
    }

    async fn me(&self, target: &str, text: &str) -> TransportResult<()> {
        self.print(format!("[{target}] * {text}\n")).await
    }
}

/// Turns console lines into inbound messages.
///
/// `/join #chan`, `/part #chan`, `/nick name`, `/me text` and `/private text`
/// map to the matching events; anything else is a message to the current
/// channel.
struct Console {
    nick: String,
    channel: String,
}

impl Console {
    fn parse(&mut self, line: &str) -> Option<InboundMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "/join" if !rest.is_empty() => {
                self.channel = rest.to_string();
                Some(InboundMessage::membership(EventKind::Join, &self.nick, rest))
            }
            "/part" => {
                let channel = if rest.is_empty() { self.channel.as_str() } else { rest };
                Some(InboundMessage::membership(EventKind::Part, &self.nick, channel))
            }
            "/nick" if !rest.is_empty() => {
                let old = std::mem::replace(&mut self.nick, rest.to_string());
                Some(InboundMessage::nick(old, rest))
            }
            "/me" if !rest.is_empty() => {
                Some(InboundMessage::action(&self.nick, &self.channel, rest))
            }
            "/private" => Some(InboundMessage::private(&self.nick, rest)),
            _ => Some(InboundMessage::channel(&self.nick, &self.channel, line)),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load()?;
    if config.plugins.is_empty() {
        config.plugins.push(PluginSection::new("karma"));
    }

    let transport: BoxedTransport = Arc::new(ConsoleTransport::new());
    let runtime = BotRuntime::start(config, PluginCatalog::linked(), transport).await?;

    let (tx, rx) = mpsc::channel(64);
    let mut console = Console {
        nick: args.nick,
        channel: args.channel,
    };
    if let Some(join) = console.parse(&format!("/join {}", console.channel)) {
        tx.send(join).await?;
    }

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(message) = console.parse(&line) else {
                continue;
            };
            if tx.send(message).await.is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });

    runtime.run(rx).await?;
    Ok(())
}
