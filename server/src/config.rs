//! Runtime configuration threaded through the server components

use shared::{Tokens, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Default number of chat lines replayed to a new joiner
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
/// Default wait for room in the hub queue before a chat line is dropped
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bound of the replay buffer
    pub history_capacity: usize,
    /// How long a session waits to enqueue a chat line
    pub broadcast_timeout: Duration,
    /// Pending requests the hub accepts before senders wait
    pub hub_queue_capacity: usize,
    /// Frames buffered per session before deliveries to it fail
    pub outbox_capacity: usize,
    /// How long a closing session waits for its writer to drain
    pub drain_grace: Duration,
    pub tokens: Tokens,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
            hub_queue_capacity: 1024,
            outbox_capacity: 1024,
            drain_grace: Duration::from_secs(1),
            tokens: Tokens::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
