//! Load-generating bots
//!
//! Each bot opens its own connection, claims a random `user<N>` login and
//! then posts a random line after a random pause until the swarm is
//! stopped. Incoming messages are read and discarded.

use crate::network::{ClientError, Connection};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Upper bound (exclusive) of the number in generated logins
pub const LOGIN_RANGE: u32 = 1500;

const DEFAULT_LINES: &[&str] = &[
    "Hello everyone!",
    "How is it going?",
    "Anyone here?",
    "Nice weather today.",
    "I am just a bot, don't mind me.",
    "What are you all working on?",
];

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Address of the chat server
    pub server: String,
    pub count: usize,
    /// Delay between starting two bots
    pub spawn_interval: Duration,
    /// Longest pause between two lines from one bot
    pub max_pause: Duration,
    pub lines: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server: format!("{}:{}", shared::DEFAULT_HOST, shared::DEFAULT_PORT),
            count: 500,
            spawn_interval: Duration::from_millis(100),
            max_pause: Duration::from_millis(5000),
            lines: default_lines(),
        }
    }
}

pub fn default_lines() -> Vec<String> {
    DEFAULT_LINES.iter().map(|line| line.to_string()).collect()
}

/// Non-empty lines of a bot script
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn load_lines(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_lines(&content))
}

pub fn random_login<R: Rng>(rng: &mut R) -> String {
    format!("user{}", rng.gen_range(0..LOGIN_RANGE))
}

pub fn random_pause<R: Rng>(rng: &mut R, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..max_ms))
}

pub fn pick_line<'a, R: Rng>(rng: &mut R, lines: &'a [String]) -> Option<&'a str> {
    if lines.is_empty() {
        return None;
    }
    Some(lines[rng.gen_range(0..lines.len())].as_str())
}

/// A running group of bots
pub struct BotSwarm {
    stop_tx: watch::Sender<bool>,
    bots: Vec<JoinHandle<()>>,
}

impl BotSwarm {
    /// Starts `config.count` bots, one every `spawn_interval`
    pub async fn spawn(config: BotConfig) -> Self {
        let config = Arc::new(config);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut bots = Vec::with_capacity(config.count);

        info!("Bots creating is in process.");
        for i in 0..config.count {
            let bot_config = Arc::clone(&config);
            let stop_rx = stop_rx.clone();
            bots.push(tokio::spawn(async move {
                if let Err(e) = run_bot(bot_config, stop_rx).await {
                    warn!("Bot {} stopped: {}", i + 1, e);
                }
            }));
            debug!("Bots are running: {}", i + 1);

            if i + 1 < config.count {
                sleep(config.spawn_interval).await;
            }
        }
        info!("All {} bots are running", bots.len());

        BotSwarm { stop_tx, bots }
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Signals every bot to quit and waits for them
    pub async fn stop(self) {
        self.stop_tx.send_replace(true);
        for bot in self.bots {
            let _ = bot.await;
        }
        info!("All bots stopped");
    }
}

/// One bot's whole life: connect, log in, chat until stopped, quit
pub async fn run_bot(
    config: Arc<BotConfig>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ClientError> {
    let mut rng = StdRng::from_entropy();
    let mut connection = Connection::connect(config.server.as_str()).await?;
    let quit = connection.tokens().quit.clone();

    loop {
        let login = random_login(&mut rng);
        if connection.login(&login).await? {
            debug!("Bot logged in as {}", login);
            break;
        }
    }

    let (mut incoming, mut outgoing) = connection.into_split();
    let reader = tokio::spawn(async move { while let Ok(Some(_)) = incoming.recv().await {} });

    while !*stop.borrow() {
        let pause = random_pause(&mut rng, config.max_pause);
        tokio::select! {
            _ = sleep(pause) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if reader.is_finished() {
            return Err(ClientError::ConnectionClosed);
        }
        if let Some(line) = pick_line(&mut rng, &config.lines) {
            outgoing.send_text(line).await?;
        }
    }

    let result = outgoing.send_text(&quit).await;
    reader.abort();
    result
}
