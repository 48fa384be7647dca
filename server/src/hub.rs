//! The hub task: sole owner of the [`Registry`]
//!
//! Sessions never touch shared state directly. They send [`HubRequest`]s
//! through a bounded queue and the hub applies them one at a time, which
//! serializes logins, renames, removals and every broadcast fan-out.

use crate::config::ServerConfig;
use crate::error::{ChatError, ChatResult};
use crate::registry::{Outbox, Registry, SessionId};
use log::{debug, info, warn};
use shared::{Message, Tokens};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};

/// Requests sessions send to the hub
#[derive(Debug)]
pub enum HubRequest {
    Started {
        session: SessionId,
        outbox: Outbox,
    },
    Login {
        session: SessionId,
        message: Message,
        reply: oneshot::Sender<bool>,
    },
    Receive {
        session: SessionId,
        message: Message,
    },
    Stopped {
        session: SessionId,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Counters shared between the hub and every handle
#[derive(Debug, Default)]
pub struct HubStats {
    /// Chat lines dropped because the hub queue stayed full
    failed_sends: AtomicU64,
}

impl HubStats {
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends.load(Ordering::Relaxed)
    }

    fn record_failed_send(&self) -> u64 {
        self.failed_sends.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct Hub {
    registry: Registry,
    requests: mpsc::Receiver<HubRequest>,
    stats: Arc<HubStats>,
}

impl Hub {
    pub fn new(config: &ServerConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.hub_queue_capacity.max(1));
        let stats = Arc::new(HubStats::default());

        let hub = Hub {
            registry: Registry::new(config),
            requests: rx,
            stats: Arc::clone(&stats),
        };
        let handle = HubHandle {
            requests: tx,
            stats,
            broadcast_timeout: config.broadcast_timeout,
            tokens: Arc::new(config.tokens.clone()),
        };
        (hub, handle)
    }

    /// Creates a hub and runs it on its own task
    pub fn spawn(config: &ServerConfig) -> HubHandle {
        let (hub, handle) = Hub::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Processes requests until every handle has been dropped
    pub async fn run(mut self) {
        debug!("Hub running");
        while let Some(request) = self.requests.recv().await {
            self.handle_request(request);
        }
        info!(
            "Hub stopped, {} broadcast(s) dropped while waiting for the queue",
            self.stats.failed_sends()
        );
    }

    fn handle_request(&mut self, request: HubRequest) {
        match request {
            HubRequest::Started { session, outbox } => {
                self.registry.on_start_socket(session, outbox);
            }
            HubRequest::Login {
                session,
                message,
                reply,
            } => {
                let logged = self.registry.on_logged_client(session, &message);
                if reply.send(logged).is_err() {
                    debug!("{}: session went away during login", session);
                }
            }
            HubRequest::Receive { session, message } => {
                self.registry.on_receive_message(session, message);
            }
            HubRequest::Stopped { session } => {
                self.registry.on_stop_socket(session);
            }
            HubRequest::OnlineUsers { reply } => {
                let mut logins = self.registry.logins();
                logins.sort_unstable();
                let _ = reply.send(logins);
            }
        }
    }
}

/// Cloneable front door to the hub, one per session
#[derive(Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
    stats: Arc<HubStats>,
    broadcast_timeout: Duration,
    tokens: Arc<Tokens>,
}

impl HubHandle {
    pub async fn started(&self, session: SessionId, outbox: Outbox) -> ChatResult<()> {
        self.submit(HubRequest::Started { session, outbox }).await
    }

    /// Forwards one handshake message and waits for the verdict
    pub async fn login(&self, session: SessionId, message: Message) -> ChatResult<bool> {
        let (reply, verdict) = oneshot::channel();
        self.submit(HubRequest::Login {
            session,
            message,
            reply,
        })
        .await?;
        verdict.await.map_err(|_| ChatError::HubClosed)
    }

    /// Queues a chat line or command.
    ///
    /// Waits at most the broadcast timeout for room in the queue. On timeout
    /// the message is dropped, never retried. Only dropped chat lines count
    /// as failed sends; a dropped command is just logged.
    pub async fn receive(&self, session: SessionId, message: Message) -> ChatResult<()> {
        let is_command = message
            .text_str()
            .map_or(false, |text| self.tokens.is_user_command(text));
        let request = HubRequest::Receive { session, message };
        match self
            .requests
            .send_timeout(request, self.broadcast_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) if is_command => {
                warn!("{}: hub queue full, command dropped", session);
                Err(ChatError::BroadcastTimeout)
            }
            Err(SendTimeoutError::Timeout(_)) => {
                let total = self.stats.record_failed_send();
                warn!("{}: hub queue full, message dropped ({} so far)", session, total);
                Err(ChatError::BroadcastTimeout)
            }
            Err(SendTimeoutError::Closed(_)) => Err(ChatError::HubClosed),
        }
    }

    /// Departure hook. Always waits for queue space, it must not be lost.
    pub async fn stopped(&self, session: SessionId) -> ChatResult<()> {
        self.submit(HubRequest::Stopped { session }).await
    }

    /// Logins currently registered, sorted
    pub async fn online_users(&self) -> ChatResult<Vec<String>> {
        let (reply, logins) = oneshot::channel();
        self.submit(HubRequest::OnlineUsers { reply }).await?;
        logins.await.map_err(|_| ChatError::HubClosed)
    }

    pub fn failed_sends(&self) -> u64 {
        self.stats.failed_sends()
    }

    async fn submit(&self, request: HubRequest) -> ChatResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ChatError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;
    use tokio_test::{assert_err, assert_ok};

    fn login_request(login: &str) -> Message {
        Message::command("<login:?>").with_user(login)
    }

    async fn start(hub: &HubHandle, id: u64) -> (SessionId, Receiver<Message>) {
        let (tx, rx) = mpsc::channel(64);
        let session = SessionId(id);
        hub.started(session, tx).await.unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_concurrent_logins_for_one_name() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (first, _rx1) = start(&hub, 1).await;
        let (second, _rx2) = start(&hub, 2).await;

        let (a, b) = tokio::join!(
            hub.login(first, login_request("alice")),
            hub.login(second, login_request("alice")),
        );

        assert!(a.unwrap() ^ b.unwrap());
        assert_eq!(hub.online_users().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_chat_flows_through_hub() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (alice, mut alice_rx) = start(&hub, 1).await;
        let (bob, mut bob_rx) = start(&hub, 2).await;

        assert!(hub.login(alice, login_request("alice")).await.unwrap());
        assert!(hub.login(bob, login_request("bob")).await.unwrap());
        hub.receive(alice, Message::chat("hi", "alice")).await.unwrap();

        assert!(bob_rx.recv().await.unwrap().has_command("1"));
        assert_eq!(bob_rx.recv().await.unwrap().text_str(), Some("alice: hi"));

        assert!(alice_rx.recv().await.unwrap().has_command("1"));
        assert_eq!(
            alice_rx.recv().await.unwrap().text_str(),
            Some("USER 'bob' JOIN THE CHAT.")
        );
    }

    #[tokio::test]
    async fn test_stopped_removes_login() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (alice, _alice_rx) = start(&hub, 1).await;
        assert!(hub.login(alice, login_request("alice")).await.unwrap());

        assert_ok!(hub.stopped(alice).await);

        assert!(hub.online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let config = ServerConfig {
            hub_queue_capacity: 1,
            broadcast_timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        // not running, so nothing drains the queue
        let (_hub, handle) = Hub::new(&config);

        assert_ok!(handle.receive(SessionId(1), Message::chat("first", "a")).await);
        let second = assert_err!(handle.receive(SessionId(1), Message::chat("second", "a")).await);

        assert!(matches!(second, ChatError::BroadcastTimeout));
        assert_eq!(handle.failed_sends(), 1);
    }

    #[tokio::test]
    async fn test_dropped_command_is_not_a_failed_send() {
        let config = ServerConfig {
            hub_queue_capacity: 1,
            broadcast_timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        let (_hub, handle) = Hub::new(&config);
        assert_ok!(handle.receive(SessionId(1), Message::chat("first", "a")).await);

        assert_err!(handle.receive(SessionId(1), Message::chat("/USERS", "a")).await);
        assert_err!(handle.receive(SessionId(1), Message::chat("/RENAME b", "a")).await);
        assert_eq!(handle.failed_sends(), 0);

        assert_err!(handle.receive(SessionId(1), Message::chat("/users", "a")).await);
        assert_eq!(handle.failed_sends(), 1);
    }

    #[tokio::test]
    async fn test_closed_hub_is_reported() {
        let (hub, handle) = Hub::new(&ServerConfig::default());
        drop(hub);

        assert!(matches!(
            handle.receive(SessionId(1), Message::text("x")).await,
            Err(ChatError::HubClosed)
        ));
        assert!(matches!(
            handle.stopped(SessionId(1)).await,
            Err(ChatError::HubClosed)
        ));
    }
}
