//! Server network layer: TCP accept loop, stop signal and console listener

use crate::config::ServerConfig;
use crate::hub::{Hub, HubHandle};
use crate::registry::SessionId;
use crate::session::{run_session, Session, SessionLimits};
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Main server accepting chat connections
pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    limits: SessionLimits,
    stop_tx: Arc<watch::Sender<bool>>,
    next_session: u64,
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Closes the listener; sessions already running are left alone
    pub fn stop_server(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

impl Server {
    /// Binds the listener and starts the hub
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (stop_tx, _) = watch::channel(false);

        Ok(Server {
            listener,
            hub: Hub::spawn(&config),
            limits: SessionLimits {
                outbox_capacity: config.outbox_capacity,
                drain_grace: config.drain_grace,
            },
            stop_tx: Arc::new(stop_tx),
            next_session: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Accepts connections until stopped, one session task per connection
    pub async fn run(mut self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!("Server started successfully");

        while !*stop_rx.borrow() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Server stopped, {} broadcast(s) dropped so far",
            self.hub.failed_sends()
        );
    }

    fn spawn_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = SessionId(self.next_session);
        self.next_session += 1;

        if let Err(e) = stream.set_nodelay(true) {
            error!("{}: could not disable Nagle: {}", id, e);
        }

        let session = Session::new(id, peer);
        tokio::spawn(run_session(stream, session, self.hub.clone(), self.limits));
    }
}

/// Reads admin commands line by line and stops the server on `stop_token`.
/// Returns when the server was stopped or the input ended.
pub async fn console_listener<R>(input: R, stop: StopHandle, stop_token: &str)
where
    R: AsyncBufRead + Unpin,
{
    let hint = format!("To stop server type: {}", stop_token);
    println!("{}", hint);

    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == stop_token => {
                info!("Server will be stopped");
                stop.stop_server();
                return;
            }
            Ok(Some(_)) => println!("{}", hint),
            Ok(None) => return,
            Err(e) => {
                error!("Console error: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{read_frame, write_frame, Message};

    fn local_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_to_ephemeral_port() {
        let server = Server::bind(local_config()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_stop_handle_ends_run() {
        let server = Server::bind(local_config()).await.unwrap();
        let stop = server.stop_handle();
        let running = tokio::spawn(server.run());

        stop.stop_server();

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let server = Server::bind(local_config()).await.unwrap();
        server.stop_handle().stop_server();

        tokio::time::timeout(Duration::from_secs(2), server.run())
            .await
            .expect("server did not stop");
    }

    #[tokio::test]
    async fn test_accepts_tcp_sessions() {
        let server = Server::bind(local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = Message::command("<login:?>").with_user("alice");
        write_frame(&mut stream, &request).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();

        assert!(reply.has_command("1"));
        assert_eq!(hub.online_users().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_console_stop_token() {
        let (stop_tx, _) = watch::channel(false);
        let stop = StopHandle {
            stop_tx: Arc::new(stop_tx),
        };

        let input: &[u8] = b"hello\n  /STOP \nignored\n";
        console_listener(input, stop.clone(), "/STOP").await;

        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn test_console_eof_does_not_stop() {
        let (stop_tx, _) = watch::channel(false);
        let stop = StopHandle {
            stop_tx: Arc::new(stop_tx),
        };

        let input: &[u8] = b"/QUIT\n";
        console_listener(input, stop.clone(), "/STOP").await;

        assert!(!stop.is_stopped());
    }
}
