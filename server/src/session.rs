//! Per-connection session handler
//!
//! Each accepted connection gets one reader (this module's [`run_session`])
//! and one writer task. The reader drives the session state machine and
//! hands every decoded frame to the hub. The writer is the only code that
//! writes to the socket, draining the session's outbox one whole frame at a
//! time, so frames queued by different producers never interleave.

use crate::error::{ChatError, ChatResult};
use crate::hub::HubHandle;
use crate::registry::{Outbox, SessionId};
use log::{debug, info, warn};
use shared::{read_frame, write_frame, Message, WireError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Authenticated,
    Closed,
}

/// Server-side state of one client connection
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub last_received: Option<Message>,
    pub state: SessionState,
}

/// Per-session tunables taken from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub outbox_capacity: usize,
    pub drain_grace: Duration,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            last_received: None,
            state: SessionState::Connected,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Reads frames until the peer goes away or something fails
    async fn serve<R>(&mut self, reader: &mut R, hub: &HubHandle, outbox: Outbox) -> ChatResult<()>
    where
        R: AsyncRead + Unpin,
    {
        hub.started(self.id, outbox).await?;
        self.state = SessionState::Authenticating;

        while let Some(message) = read_frame(reader).await? {
            self.last_received = Some(message.clone());

            match self.state {
                SessionState::Authenticating => {
                    let requested = message.user.clone().unwrap_or_default();
                    if hub.login(self.id, message).await? {
                        self.state = SessionState::Authenticated;
                        info!("{} logged in as {}", self.id, requested);
                    }
                }
                SessionState::Authenticated => match hub.receive(self.id, message).await {
                    // already counted by the hub handle
                    Err(ChatError::BroadcastTimeout) => {}
                    other => other?,
                },
                SessionState::Connected | SessionState::Closed => break,
            }
        }

        debug!("{}: peer closed the connection", self.id);
        Ok(())
    }
}

/// Owns one connection from accept to close.
///
/// The hub's departure hook runs exactly once on the way out, whether or
/// not the session ever logged in.
pub async fn run_session<S>(stream: S, mut session: Session, hub: HubHandle, limits: SessionLimits)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    info!("{} connected from {}", session.id, session.peer);

    let (mut reader, writer) = tokio::io::split(stream);
    let (outbox, queue) = mpsc::channel(limits.outbox_capacity.max(1));
    let mut writer_task = tokio::spawn(write_loop(writer, queue, session.id));

    match session.serve(&mut reader, &hub, outbox).await {
        Ok(()) => {}
        Err(ChatError::Wire(WireError::Protocol(e))) => {
            warn!("{}: dropping connection on bad frame: {}", session.id, e)
        }
        Err(ChatError::Wire(WireError::Transport(e))) => {
            debug!("{}: connection lost: {}", session.id, e)
        }
        Err(e) => warn!("{}: {}", session.id, e),
    }

    session.state = SessionState::Closed;
    if let Err(e) = hub.stopped(session.id).await {
        warn!("{}: departure not recorded: {}", session.id, e);
    }

    // The hub releases its outbox on Stopped, which lets the writer finish
    if timeout(limits.drain_grace, &mut writer_task).await.is_err() {
        debug!("{}: writer did not drain in time", session.id);
        writer_task.abort();
    }

    info!("{} closed", session.id);
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::Receiver<Message>, session: SessionId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            debug!("{}: write failed: {}", session, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::hub::Hub;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    fn limits() -> SessionLimits {
        SessionLimits {
            outbox_capacity: 64,
            drain_grace: Duration::from_millis(200),
        }
    }

    fn open(hub: &HubHandle, id: u64) -> (DuplexStream, JoinHandle<()>) {
        let (client, server) = duplex(64 * 1024);
        let session = Session::new(SessionId(id), "127.0.0.1:5000".parse().unwrap());
        let task = tokio::spawn(run_session(server, session, hub.clone(), limits()));
        (client, task)
    }

    async fn login(client: &mut DuplexStream, name: &str) -> Message {
        let request = Message::command("<login:?>").with_user(name);
        write_frame(client, &request).await.unwrap();
        read_frame(client).await.unwrap().unwrap()
    }

    #[test]
    fn test_new_session_starts_connected() {
        let session = Session::new(SessionId(7), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(session.state, SessionState::Connected);
        assert!(!session.is_authenticated());
        assert!(session.last_received.is_none());
    }

    #[tokio::test]
    async fn test_handshake_then_chat() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (mut alice, _alice_task) = open(&hub, 1);
        let (mut bob, _bob_task) = open(&hub, 2);

        assert!(login(&mut alice, "alice").await.has_command("1"));
        assert!(login(&mut bob, "bob").await.has_command("1"));

        let joined = read_frame(&mut alice).await.unwrap().unwrap();
        assert_eq!(joined.text_str(), Some("USER 'bob' JOIN THE CHAT."));

        write_frame(&mut alice, &Message::chat("hi", "alice")).await.unwrap();
        let line = read_frame(&mut bob).await.unwrap().unwrap();
        assert_eq!(line.text_str(), Some("alice: hi"));
    }

    #[tokio::test]
    async fn test_busy_login_can_retry() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (mut first, _t1) = open(&hub, 1);
        let (mut second, _t2) = open(&hub, 2);

        assert!(login(&mut first, "alice").await.has_command("1"));
        assert!(login(&mut second, "alice").await.has_command("0"));
        assert!(login(&mut second, "alice2").await.has_command("1"));

        assert_eq!(hub.online_users().await.unwrap(), vec!["alice", "alice2"]);
    }

    #[tokio::test]
    async fn test_disconnect_runs_departure_hook() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (mut alice, alice_task) = open(&hub, 1);
        let (mut bob, _bob_task) = open(&hub, 2);
        login(&mut alice, "alice").await;
        login(&mut bob, "bob").await;
        read_frame(&mut alice).await.unwrap();

        drop(alice);
        alice_task.await.unwrap();

        let notice = read_frame(&mut bob).await.unwrap().unwrap();
        assert_eq!(notice.text_str(), Some("USER 'alice' QUIT THE CHAT."));
        assert_eq!(hub.online_users().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_disconnect_before_login() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (client, task) = open(&hub, 1);

        drop(client);
        task.await.unwrap();

        assert!(hub.online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_frame_closes_only_that_session() {
        let hub = Hub::spawn(&ServerConfig::default());
        let (mut bad, bad_task) = open(&hub, 1);
        let (mut good, _good_task) = open(&hub, 2);
        login(&mut bad, "bad").await;
        login(&mut good, "good").await;
        read_frame(&mut bad).await.unwrap();

        bad.write_all(&[0, 0, 0, 1, 9]).await.unwrap();
        bad_task.await.unwrap();

        let notice = read_frame(&mut good).await.unwrap().unwrap();
        assert_eq!(notice.text_str(), Some("USER 'bad' QUIT THE CHAT."));
        assert_eq!(hub.online_users().await.unwrap(), vec!["good"]);
    }
}
