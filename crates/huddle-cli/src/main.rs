//! `huddle`: join a conference from the terminal.

mod bridge;
mod form;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use huddle_core::{ConnectionConfig, HuddleError, LoopbackService};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bridge::{Bridge, ConfigSource, EventPrinter};
use crate::form::{Command, HELP, normalize_room_name};

#[derive(Parser, Debug)]
#[command(name = "huddle", version, about = "Join a video conference from the terminal")]
struct Cli {
    /// Deployment base URL the connection endpoints are derived from.
    #[arg(long, env = "HUDDLE_URL", default_value = "https://localhost:8443")]
    url: String,

    /// Connection config JSON file, used instead of deriving from --url.
    /// It is passed unchanged for every room joined.
    #[arg(long, conflicts_with = "config_url")]
    config: Option<PathBuf>,

    /// URL to download the connection config JSON from.
    #[arg(long)]
    config_url: Option<String>,

    /// Room to join; can also be set with the `room` command.
    #[arg(long)]
    room: Option<String>,

    /// Simulated participant present in the joined room (repeatable).
    #[arg(long = "peer")]
    peers: Vec<String>,
}

impl Cli {
    async fn config_source(&self) -> Result<ConfigSource, HuddleError> {
        if let Some(path) = &self.config {
            return Ok(ConfigSource::Fixed(ConnectionConfig::load(path)?));
        }
        if let Some(url) = &self.config_url {
            return Ok(ConfigSource::Fixed(ConnectionConfig::fetch(url).await?));
        }
        Ok(ConfigSource::Deployment(self.url.clone()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_core=info,huddle_cli=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), HuddleError> {
    let source = cli.config_source().await?;
    let room = cli.room.as_deref().and_then(normalize_room_name);
    let mut bridge = Bridge::new(LoopbackService::new(), source)
        .with_room(room)
        .with_peers(cli.peers);
    bridge.add_listener(Arc::new(EventPrinter));

    println!("{HELP}");
    println!("{}", bridge.controls());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("reading input: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e} (try `help`)");
                continue;
            }
        };
        match bridge.execute(command).await {
            Ok(reply) => {
                for line in &reply.lines {
                    println!("{line}");
                }
                if reply.quit {
                    return Ok(());
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }

    // stdin closed without `quit`
    bridge.execute(Command::Quit).await.map(|_| ())
}
