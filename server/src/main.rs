use clap::Parser;
use log::info;
use server::config::{ServerConfig, DEFAULT_HISTORY_CAPACITY};
use server::network::{console_listener, Server};
use shared::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::BufReader;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Chat lines replayed to a new user
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    history: usize,

    /// Seconds a chat line may wait for the hub before it is dropped
    #[arg(long, default_value_t = 10)]
    broadcast_timeout: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            history_capacity: self.history,
            broadcast_timeout: Duration::from_secs(self.broadcast_timeout),
            ..ServerConfig::default()
        }
    }
}

/// Parses arguments, starts the listener and the console listener,
/// then serves until `/STOP` is typed or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let stop_token = config.tokens.stop.clone();

    let server = Server::bind(config).await?;
    let stop = server.stop_handle();

    tokio::spawn(async move {
        console_listener(BufReader::new(tokio::io::stdin()), stop, &stop_token).await;
    });

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
