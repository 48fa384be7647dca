//! # Chat Client Library
//!
//! Client side of the chat system: a TCP connection that speaks the framed
//! message protocol, plus a swarm of bots for load testing a server.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - Connecting to the server
//! - The login handshake, retried on a busy name
//! - Splitting a connection into halves owned by separate tasks
//!
//! ### Bot Module (`bot`)
//! - Random `user<N>` logins
//! - Random lines after random pauses
//! - Stopping the whole swarm with one signal
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = Connection::connect("127.0.0.1:8888").await?;
//!     if connection.login("alice").await? {
//!         connection.send_text("hello").await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod network;

pub use bot::{BotConfig, BotSwarm};
pub use network::{ClientError, Connection, Incoming, Outgoing};
