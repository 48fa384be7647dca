//! # Chat Server Library
//!
//! This library provides the relay server for the chat system. It accepts
//! many concurrent TCP clients, authenticates each one with a unique login,
//! and relays chat lines between them, replaying recent history to newcomers.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Every accepted connection becomes a session that moves through
//! `Connected → Authenticating → Authenticated → Closed`. A session is
//! announced to the hub when it starts and always produces exactly one
//! departure event when it ends, whether or not it ever logged in.
//!
//! ### Login Registry
//! Logins are unique and case-sensitive. The check-and-insert for a join and
//! the remove-and-insert for a rename are atomic with respect to each other.
//!
//! ### Broadcasting
//! Chat lines fan out to every other logged-in session and are kept in a
//! bounded replay buffer. Direct messages reach only their target and are
//! never replayed.
//!
//! ## Architecture Design
//!
//! ### Hub Actor
//! All shared state lives in one [`registry::Registry`] owned by a single
//! [`hub::Hub`] task. Sessions talk to it through a bounded request queue,
//! so there are no locks around the registry. A chat line that cannot be
//! queued within the broadcast timeout is dropped and counted rather than
//! retried.
//!
//! ### One Reader, One Writer
//! Each connection has a reader task running the state machine and a writer
//! task draining the session's outbox. The hub only ever queues frames into
//! outboxes without waiting, so a slow client cannot stall anyone else.
//!
//! ## Module Organization
//!
//! - `config`: explicit runtime configuration
//! - `commands`: user command table built once at startup
//! - `history`: bounded replay buffer
//! - `registry`: login map and broadcast engine
//! - `hub`: the task owning the registry, and the handle sessions use
//! - `session`: per-connection state machine and writer
//! - `network`: TCP accept loop, stop signal, console listener
//! - `error`: error taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let stop = server.stop_handle();
//!
//!     // call stop.stop_server() from anywhere to close the listener
//!     server.run().await;
//!     # drop(stop);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod hub;
pub mod network;
pub mod registry;
pub mod session;

pub use config::ServerConfig;
pub use error::{ChatError, ChatResult};
pub use network::{Server, StopHandle};
