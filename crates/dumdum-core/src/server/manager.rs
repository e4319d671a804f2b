//! Connection manager: accept loop, per-connection sessions, broadcast.
//!
//! ```text
//! accept ─▶ handshake (plain stream) ─▶ [TLS upgrade] ─▶ split
//!                                                       ├─ read loop ─▶ events ─▶ ServerState
//!                                                       └─ writer task ◀─ bounded queue ◀─ replies/broadcasts
//! ```
//!
//! Every connection runs in its own task. Replies and broadcasts go
//! through the target connection's bounded queue; a full queue suspends
//! only the task that is enqueueing.

use super::connection::{write_loop, write_with_timeout, Connection, PeerHandle};
use super::state::ServerState;
use crate::error::{Error, Result};
use crate::logging::Preview;
use crate::protocol::{
    create_snowflake, ensure_state, Message, ProtocolState, Server, ServerEvent,
    ServerProtocolState,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept (fd exhaustion and the like).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Ceiling on unparsed input per connection; `None` disables it.
    pub buffer_size: Option<usize>,
    /// Outbound chunks a connection may have queued before senders wait.
    pub write_queue_depth: usize,
    /// How long a single write may take to drain before the connection is dropped.
    pub drain_timeout: Duration,
    /// How long teardown waits for the writer to finish.
    pub close_timeout: Duration,
    /// Messages returned per history request.
    pub history_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            buffer_size: Some(crate::protocol::DEFAULT_BUFFER_SIZE),
            write_queue_depth: 64,
            drain_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            history_limit: super::cache::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// How the plaintext handshake ended.
enum Handshake {
    /// Server hello written; `using_ssl` says whether to upgrade next.
    Accepted { using_ssl: bool },
    /// Version refused; the refusal has been written.
    Refused,
    /// The peer went away first.
    Closed,
}

/// Drives every client connection against one [`ServerState`].
#[derive(Clone)]
pub struct Manager {
    state: Arc<RwLock<ServerState>>,
    connections: Arc<RwLock<HashMap<u64, PeerHandle>>>,
    tls: Option<TlsAcceptor>,
    config: Arc<ManagerConfig>,
    next_id: Arc<AtomicU64>,
}

impl Manager {
    /// Create a manager. With `tls`, every client is upgraded after the hello.
    pub fn new(state: ServerState, tls: Option<TlsAcceptor>, config: ManagerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            connections: Arc::new(RwLock::new(HashMap::new())),
            tls,
            config: Arc::new(config),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Shared chat state.
    pub fn state(&self) -> &Arc<RwLock<ServerState>> {
        &self.state
    }

    /// Active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Whether clients are upgraded to TLS.
    pub fn using_ssl(&self) -> bool {
        self.tls.is_some()
    }

    /// Number of live connections, in any protocol state.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Accept connections until the task is dropped.
    ///
    /// Accept errors are logged and retried after a short pause.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, tls = self.using_ssl(), "Listening for connections");
        }
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let manager = self.clone();
                    tokio::spawn(manager.accept_connection(stream, addr));
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Run one connection to completion and tear it down.
    ///
    /// Errors are logged here and never escape to the accept loop.
    pub async fn accept_connection(self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(conn = id, %addr, "Accepted connection");

        let protocol = Server::new().with_buffer_size(self.config.buffer_size);
        let (outgoing, queue) = mpsc::channel(self.config.write_queue_depth.max(1));
        let mut conn = Connection::new(id, addr, protocol, outgoing);
        self.connections.write().await.insert(id, conn.handle());

        match self.communicate(&mut conn, stream, queue).await {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => debug!(conn = id, error = %e, "Peer disconnected"),
            Err(e) if e.is_fatal() => warn!(conn = id, %addr, error = %e, "Protocol error"),
            Err(e) => error!(conn = id, %addr, error = %e, "Error while handling connection"),
        }

        self.close_connection(conn).await;
        info!(conn = id, %addr, "Connection has disconnected");
    }

    async fn communicate(
        &self,
        conn: &mut Connection,
        mut stream: TcpStream,
        queue: mpsc::Receiver<Vec<u8>>,
    ) -> Result<()> {
        match self.handshake(conn, &mut stream).await? {
            Handshake::Closed | Handshake::Refused => Ok(()),
            Handshake::Accepted { using_ssl: false } => self.run_session(conn, stream, queue).await,
            Handshake::Accepted { using_ssl: true } => {
                let acceptor = self
                    .tls
                    .clone()
                    .ok_or_else(|| Error::Tls("no acceptor configured".into()))?;
                let stream = tokio::time::timeout(self.config.drain_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| Error::Timeout)?
                    .map_err(|e| Error::Tls(e.to_string()))?;
                debug!(conn = conn.id, "TLS upgrade complete");
                self.run_session(conn, stream, queue).await
            }
        }
    }

    /// Plaintext phase: read until the client hello is answered.
    async fn handshake(&self, conn: &mut Connection, stream: &mut TcpStream) -> Result<Handshake> {
        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(Handshake::Closed);
            }

            let parsed = conn.protocol.lock().await.receive_bytes(&chunk[..n])?;
            if !parsed.outgoing.is_empty() {
                write_with_timeout(stream, &parsed.outgoing, self.config.drain_timeout).await?;
            }

            for event in parsed.events {
                match event {
                    ServerEvent::Hello => {
                        let using_ssl = self.using_ssl();
                        let reply = conn.protocol.lock().await.hello(using_ssl)?;
                        write_with_timeout(stream, &reply, self.config.drain_timeout).await?;
                        debug!(conn = conn.id, using_ssl, "Handshake accepted");
                        return Ok(Handshake::Accepted { using_ssl });
                    }
                    ServerEvent::IncompatibleVersion {
                        client_version,
                        server_version,
                    } => {
                        info!(
                            conn = conn.id,
                            client_version, server_version, "Incompatible protocol version"
                        );
                        return Ok(Handshake::Refused);
                    }
                    other => {
                        return Err(Error::MalformedData(format!(
                            "{:?} before handshake completed",
                            other
                        )))
                    }
                }
            }
        }
    }

    /// Steady phase: split the stream, start the writer, read until EOF.
    async fn run_session<S>(
        &self,
        conn: &mut Connection,
        stream: S,
        queue: mpsc::Receiver<Vec<u8>>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        conn.writer = Some(tokio::spawn(write_loop(
            conn.id,
            writer,
            queue,
            self.config.drain_timeout,
        )));

        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
        loop {
            let n = tokio::select! {
                read = reader.read(&mut chunk) => read?,
                _ = conn.outgoing.closed() => return Err(Error::ConnectionClosed),
            };
            if n == 0 {
                return Ok(());
            }

            let parsed = conn.protocol.lock().await.receive_bytes(&chunk[..n])?;
            conn.enqueue(parsed.outgoing).await?;
            for event in parsed.events {
                self.handle_event(conn, event).await?;
            }
        }
    }

    async fn handle_event(&self, conn: &mut Connection, event: ServerEvent) -> Result<()> {
        debug!(conn = conn.id, event = event_name(&event), "Handling event");

        match event {
            ServerEvent::Hello | ServerEvent::IncompatibleVersion { .. } => {
                Err(Error::MalformedData("hello after handshake".into()))
            }
            ServerEvent::Authentication { nick } => self.authenticate(conn, nick).await,
            ServerEvent::MessageReceived {
                channel_name,
                content,
            } => self.post_message(conn, channel_name, content).await,
            ServerEvent::ListChannels => {
                let channels = self.state.read().await.channels();
                let reply = conn.protocol.lock().await.list_channels(&channels)?;
                conn.enqueue(reply).await
            }
            ServerEvent::ListMessages {
                channel_name,
                before,
                after,
            } => {
                let messages = self.state.read().await.get_messages(
                    &channel_name,
                    before,
                    after,
                    self.config.history_limit,
                );
                let reply = conn.protocol.lock().await.list_messages(&messages)?;
                conn.enqueue(reply).await
            }
        }
    }

    async fn authenticate(&self, conn: &mut Connection, nick: String) -> Result<()> {
        // Held across the claim: a pipelined second Authenticate must fail
        // before it takes a nickname.
        let mut protocol = conn.protocol.lock().await;
        ensure_state(protocol.state(), &[ServerProtocolState::AwaitingAuthentication])?;
        let success = !nick.is_empty() && self.state.write().await.claim_user(&nick);
        let reply = match protocol.authenticate(success) {
            Ok(reply) => reply,
            Err(e) => {
                if success {
                    self.state.write().await.remove_user(&nick);
                }
                return Err(e);
            }
        };
        drop(protocol);
        if success {
            info!(conn = conn.id, nick = %nick, "User authenticated");
            conn.nick = Some(nick);
        } else {
            info!(conn = conn.id, nick = %nick, "Nickname rejected");
        }
        conn.enqueue(reply).await
    }

    async fn post_message(
        &self,
        conn: &mut Connection,
        channel_name: String,
        content: String,
    ) -> Result<()> {
        let nick = conn
            .nick
            .clone()
            .ok_or_else(|| Error::InvalidState {
                machine: ServerProtocolState::MACHINE,
                current: "AWAITING_AUTHENTICATION",
                expected: vec!["READY"],
            })?;

        let message = {
            let mut state = self.state.write().await;
            if state.get_channel(&channel_name).is_none() {
                debug!(conn = conn.id, channel = %channel_name, "Post to unknown channel dropped");
                return Ok(());
            }
            let message = Message::new(create_snowflake(), channel_name, nick, content);
            state.add_message(message.clone());
            message
        };

        debug!(
            conn = conn.id,
            id = message.id(),
            nick = message.nick(),
            channel = message.channel_name(),
            content = %Preview(message.content()),
            "Message posted"
        );
        self.broadcast(&message).await;
        Ok(())
    }

    /// Queue `message` to every ready connection, the author included.
    ///
    /// Connections still in the handshake are skipped, as are peers whose
    /// writer has already stopped.
    pub async fn broadcast(&self, message: &Message) {
        let peers: Vec<(u64, PeerHandle)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect();

        for (id, peer) in peers {
            let data = match peer.protocol.lock().await.send_message(message) {
                Ok(data) => data,
                Err(Error::InvalidState { .. }) => continue,
                Err(e) => {
                    warn!(conn = id, error = %e, "Could not encode broadcast");
                    continue;
                }
            };
            if peer.outgoing.send(data).await.is_err() {
                debug!(conn = id, "Peer closed before broadcast");
            }
        }
    }

    async fn close_connection(&self, conn: Connection) {
        self.connections.write().await.remove(&conn.id);
        if let Some(nick) = &conn.nick {
            self.state.write().await.remove_user(nick);
        }
        conn.close(self.config.close_timeout).await;
    }
}

fn event_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::Hello => "Hello",
        ServerEvent::IncompatibleVersion { .. } => "IncompatibleVersion",
        ServerEvent::Authentication { .. } => "Authentication",
        ServerEvent::MessageReceived { .. } => "MessageReceived",
        ServerEvent::ListChannels => "ListChannels",
        ServerEvent::ListMessages { .. } => "ListMessages",
    }
}
