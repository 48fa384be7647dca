//! Client network layer: one TCP connection to the chat server

use log::{debug, info};
use shared::{read_frame, write_frame, Message, Tokens, WireError};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("could not connect: {0}")]
    Connect(#[source] std::io::Error),
    #[error("server closed the connection")]
    ConnectionClosed,
    #[error("unexpected reply to login: {0:?}")]
    UnexpectedReply(Message),
}

/// Receiving half of a connection
pub struct Incoming {
    reader: OwnedReadHalf,
}

impl Incoming {
    /// Next message from the server, `None` once it has closed the stream
    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        Ok(read_frame(&mut self.reader).await?)
    }
}

/// Sending half of a connection
pub struct Outgoing {
    writer: OwnedWriteHalf,
    login: Option<String>,
}

impl Outgoing {
    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        Ok(write_frame(&mut self.writer, message).await?)
    }

    /// Sends a line typed by the user; commands travel the same way
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        let mut message = Message::text(text);
        message.user = self.login.clone();
        self.send(&message).await
    }
}

pub struct Connection {
    incoming: Incoming,
    outgoing: Outgoing,
    tokens: Tokens,
}

impl Connection {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ClientError::Connect)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("Connected to {}", peer);
        }
        let (reader, writer) = stream.into_split();

        Ok(Connection {
            incoming: Incoming { reader },
            outgoing: Outgoing {
                writer,
                login: None,
            },
            tokens: Tokens::default(),
        })
    }

    /// Asks the server for `login`. Returns false if the name is busy,
    /// in which case another attempt may be made on the same connection.
    pub async fn login(&mut self, login: &str) -> Result<bool, ClientError> {
        let request = Message::command(self.tokens.login_check.clone()).with_user(login);
        self.outgoing.send(&request).await?;

        let reply = self
            .incoming
            .recv()
            .await?
            .ok_or(ClientError::ConnectionClosed)?;

        if reply.has_command(&self.tokens.login_is_free) {
            debug!("Logged in as {}", login);
            self.outgoing.login = Some(login.to_string());
            Ok(true)
        } else if reply.has_command(&self.tokens.login_is_not_free) {
            Ok(false)
        } else {
            Err(ClientError::UnexpectedReply(reply))
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.outgoing.send(message).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.outgoing.send_text(text).await
    }

    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        self.incoming.recv().await
    }

    pub fn login_name(&self) -> Option<&str> {
        self.outgoing.login.as_deref()
    }

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    /// Splits into halves that can live on different tasks
    pub fn into_split(self) -> (Incoming, Outgoing) {
        (self.incoming, self.outgoing)
    }
}
