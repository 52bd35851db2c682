//! warbot - persistent-session game automation
//!
//! Keeps a game account logged in only while there is work to do and runs
//! the daily in-game routines on a schedule.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use warbot_agent::{Agent, AgentEvent, Config};
use warbot_protocol::Document;
use warbot_storage::SessionStore;

/// Config file written by `set-warzone` when none is given.
const DEFAULT_CONFIG_FILE: &str = "warbot.yaml";

#[derive(Parser)]
#[command(name = "warbot")]
#[command(about = "Persistent-session automation client for a websocket game server")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "WARBOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run {
        /// Login token; without it the saved session is used
        #[arg(short, long, env = "WARBOT_TOKEN")]
        token: Option<String>,

        /// Coins to spend on army training
        #[arg(long, requires = "batch_build")]
        consume_coin: Option<f64>,

        /// Batch build order JSON (or @file.json to read from file)
        #[arg(long, requires = "consume_coin")]
        batch_build: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Print the saved session
    Session {
        /// Delete the saved session instead
        #[arg(long)]
        clear: bool,
    },

    /// Set the wanted warzone and save the configuration
    SetWarzone {
        /// Warzone id (0 keeps the current one)
        warzone: i32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            token,
            consume_coin,
            batch_build,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            run(config, token, consume_coin.zip(batch_build)).await?;
        }
        Commands::Config => {
            let config = Config::load(cli.config.as_deref())?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Session { clear } => {
            let config = Config::load(cli.config.as_deref())?;
            let store = SessionStore::open(&config.storage.data_dir)?;
            if clear {
                store.clear()?;
                println!("Removed saved session at {}", store.path().display());
                return Ok(());
            }
            match store.load()? {
                Some(session) => {
                    println!("server_id:      {}", session.server_id);
                    println!("server_url:     {}", session.server_url);
                    println!("auth_token:     {}", redact(&session.auth_token));
                    println!("device_temp_id: {}", session.device_temp_id);
                }
                None => println!("No saved session at {}", store.path().display()),
            }
        }
        Commands::SetWarzone { warzone } => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            let mut config = if path.exists() {
                Config::from_file(&path)?
            } else {
                Config::default()
            };
            config.preferences.warzone = warzone;
            config.save(&path)?;
            println!("Wanted warzone set to {} in {}", warzone, path.display());
        }
    }

    Ok(())
}

async fn run(
    config: Config,
    token: Option<String>,
    consume_coin: Option<(f64, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting warbot");
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    tracing::info!("  Run interval: {}s", config.schedule.run_interval_secs);
    if config.preferences.warzone != 0 {
        tracing::info!("  Wanted warzone: S{}", config.preferences.warzone);
    }

    let batch_build = match &consume_coin {
        Some((_, data)) => Some(read_document(data)?),
        None => None,
    };

    let mut agent = Agent::new(config)?;

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AgentEvent::Authenticated { warzone, username } = event {
                tracing::debug!("Authenticated as {} on S{}", username, warzone);
            }
        }
    });

    agent.start(token).await;
    if let (Some((coin, _)), Some(batch_build)) = (consume_coin, batch_build) {
        agent.consume_coin(batch_build, coin);
    }

    agent
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping agent...");
        })
        .await;

    Ok(())
}

/// Parses a JSON object given inline or as `@path`.
fn read_document(arg: &str) -> Result<Document, Box<dyn std::error::Error>> {
    let bytes = match arg.strip_prefix('@') {
        Some(path) => std::fs::read(Path::new(path))?,
        None => arg.as_bytes().to_vec(),
    };
    let document = Document::from_slice(&bytes)?;
    if document.is_empty() {
        return Err("batch build data must be a non-empty JSON object".into());
    }
    Ok(document)
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}...", prefix)
}
