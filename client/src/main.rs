use clap::{Parser, Subcommand};
use client::bot::{load_lines, BotConfig, BotSwarm};
use client::network::{Connection, Incoming};
use log::{info, warn};
use shared::{Tokens, DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT))]
    server: String,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Interactive chat (default)
    Chat,
    /// Run a swarm of bots until /QUIT is typed
    Bots {
        /// Number of bots to start
        #[arg(short = 'n', long, default_value_t = 500)]
        count: usize,

        /// File with one chat line per row
        #[arg(long)]
        lines: Option<PathBuf>,

        /// Milliseconds between starting two bots
        #[arg(long, default_value_t = 100)]
        spawn_interval_ms: u64,

        /// Longest pause in milliseconds between two lines of one bot
        #[arg(long, default_value_t = 5000)]
        max_pause_ms: u64,
    },
}

type Console = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let console = BufReader::new(tokio::io::stdin()).lines();

    match args.mode.unwrap_or(Mode::Chat) {
        Mode::Chat => chat(&args.server, console).await?,
        Mode::Bots {
            count,
            lines,
            spawn_interval_ms,
            max_pause_ms,
        } => {
            let lines = match lines {
                Some(path) => load_lines(path).await?,
                None => client::bot::default_lines(),
            };
            let config = BotConfig {
                server: args.server,
                count,
                spawn_interval: Duration::from_millis(spawn_interval_ms),
                max_pause: Duration::from_millis(max_pause_ms),
                lines,
            };
            bots(config, console).await?;
        }
    }

    Ok(())
}

async fn chat(server: &str, mut console: Console) -> Result<(), Box<dyn std::error::Error>> {
    let mut connection = Connection::connect(server).await?;
    let tokens = connection.tokens().clone();

    loop {
        println!("Enter your login:");
        let Some(login) = console.next_line().await? else {
            return Ok(());
        };
        let login = login.trim();
        if login.is_empty() {
            continue;
        }
        if connection.login(login).await? {
            break;
        }
        println!("Login '{}' is busy. Please, try again.", login);
    }
    println!("Welcome! Type {} for the list of commands.", tokens.help);

    let (incoming, mut outgoing) = connection.into_split();
    let mut printer = tokio::spawn(print_incoming(incoming, tokens.clone()));

    loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                outgoing.send_text(&line).await?;
                if line.trim() == tokens.quit {
                    // wait for the server to confirm the stop
                    let _ = printer.await;
                    return Ok(());
                }
            }
            _ = &mut printer => {
                info!("Connection closed by the server");
                return Ok(());
            }
        }
    }

    outgoing.send_text(&tokens.quit).await?;
    let _ = printer.await;
    Ok(())
}

/// Prints server messages until the session is stopped or the stream ends
async fn print_incoming(mut incoming: Incoming, tokens: Tokens) {
    loop {
        match incoming.recv().await {
            Ok(Some(message)) => {
                if message.has_command(&tokens.session_stopped) {
                    println!("Session stopped.");
                    return;
                }
                if let Some(text) = message.text_str() {
                    print!("{}", text);
                    if !text.ends_with('\n') {
                        println!();
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("Receive failed: {}", e);
                return;
            }
        }
    }
}

async fn bots(config: BotConfig, mut console: Console) -> Result<(), Box<dyn std::error::Error>> {
    let quit = Tokens::default().quit;
    let swarm = BotSwarm::spawn(config).await;
    println!("{} bots running. Type {} to stop them.", swarm.len(), quit);

    while let Some(line) = console.next_line().await? {
        if line.trim() == quit {
            break;
        }
    }

    println!("Bots stopping began. Please wait");
    swarm.stop().await;
    Ok(())
}
