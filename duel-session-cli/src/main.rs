use clap::{Parser, Subcommand};
use duel_session_cli::application::write_schemas;
use duel_session_cli::infrastructure::relay_server;
use duel_session_cli::{CliError, LogConfig, Player, PlayerCommand, Result};
use duel_session_p2p::{SessionConfig, Session, WebRtcConnector, WebSocketRelay};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "duel-cli")]
#[command(version, about = "Duel session CLI - relay server and interactive peer")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay
    Relay {
        #[arg(short, long, default_value = "127.0.0.1:3030")]
        bind: SocketAddr,
    },

    /// Join a session and play from the terminal
    Join {
        /// Relay WebSocket URL
        #[arg(short = 's', long, default_value = "ws://127.0.0.1:3030/ws")]
        server: String,

        /// Session code shared by everyone at the table
        #[arg(short = 'c', long)]
        code: String,

        /// Display name
        #[arg(short = 'n', long, default_value = "Player")]
        name: String,

        /// TURN server URL (optional, format: turn:host:port)
        #[arg(long)]
        turn_server: Option<String>,

        /// TURN username (required if turn-server is set)
        #[arg(long)]
        turn_username: Option<String>,

        /// TURN credential (required if turn-server is set)
        #[arg(long)]
        turn_credential: Option<String>,
    },

    /// Write JSON Schemas for every wire message
    Schema {
        #[arg(short, long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = match (&cli.command, cli.verbose) {
        (_, true) => LogConfig::dev(),
        (Commands::Join { .. }, false) => LogConfig::quiet(),
        _ => LogConfig::default(),
    };
    if cli.json_logs {
        log_config = log_config.with_json();
    }
    log_config.init().map_err(CliError::InvalidConfig)?;

    match cli.command {
        Commands::Relay { bind } => relay_server::serve(bind).await,
        Commands::Join {
            server,
            code,
            name,
            turn_server,
            turn_username,
            turn_credential,
        } => {
            let config = build_config(&server, turn_server, turn_username, turn_credential)?;
            play(config, &code, &name).await
        }
        Commands::Schema { out_dir } => {
            for path in write_schemas(&out_dir)? {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

fn build_config(
    server: &str,
    turn_server: Option<String>,
    turn_username: Option<String>,
    turn_credential: Option<String>,
) -> Result<SessionConfig> {
    let mut config = SessionConfig::new(server);

    if let Some(turn_url) = turn_server {
        match (turn_username, turn_credential) {
            (Some(username), Some(credential)) => {
                info!("Using TURN server: {}", turn_url);
                config = config.with_turn_server(turn_url, username, credential);
            }
            _ => {
                return Err(CliError::InvalidConfig(
                    "TURN server requires both username and credential".to_string(),
                ));
            }
        }
    }

    Ok(config)
}

async fn play(config: SessionConfig, code: &str, name: &str) -> Result<()> {
    info!("Connecting to relay: {}", config.signaling_url);

    let relay = WebSocketRelay::new(config.signaling_url.clone())?;
    let connector = WebRtcConnector::new(config.ice_servers.clone())?;
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let mut player = Player::new(Session::new(config, relay, connector)?)?;
    player.join(code, name)?;
    println!("Joined {} as {}. Type 'help' for commands.", code, name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for line in player.poll() {
                    println!("{}", line);
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        player.execute(PlayerCommand::Quit);
                        break;
                    }
                    Err(e) => {
                        warn!("❌ stdin: {}", e);
                        player.execute(PlayerCommand::Quit);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match PlayerCommand::parse(&line) {
                    Ok(command) => {
                        for output in player.execute(command) {
                            println!("{}", output);
                        }
                    }
                    Err(e) => println!("{}", e),
                }
                if player.has_quit() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                player.execute(PlayerCommand::Quit);
                break;
            }
        }
    }

    Ok(())
}
