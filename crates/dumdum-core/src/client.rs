//! Async client driver.
//!
//! Runs a [`Client`] protocol machine over TCP: performs the handshake
//! (with the TLS upgrade when the server asks for it), then reads events
//! in a background task while requests are written from the caller's
//! task.

use crate::error::{Error, Result};
use crate::protocol::{validate_nick, Client, ClientEvent, ClientState, DEFAULT_BUFFER_SIZE};
use crate::tls;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// A byte stream the client can run over, plain or TLS.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Connection settings.
#[derive(Clone)]
pub struct ClientOptions {
    /// Connector used when the server requests TLS. Without one such a
    /// server is refused with [`Error::TlsRequired`].
    pub tls: Option<TlsConnector>,
    /// Name the server certificate is checked against; defaults to the
    /// host part of the address.
    pub server_name: Option<String>,
    /// Ceiling on unparsed input.
    pub buffer_size: Option<usize>,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Limit on connecting and on each handshake step.
    pub timeout: Duration,
    /// Events buffered between the reader task and [`AsyncClient::next_event`].
    pub event_queue_depth: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tls: None,
            server_name: None,
            buffer_size: Some(DEFAULT_BUFFER_SIZE),
            read_chunk_size: 1024,
            timeout: Duration::from_secs(10),
            event_queue_depth: 64,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("tls", &self.tls.is_some())
            .field("server_name", &self.server_name)
            .field("buffer_size", &self.buffer_size)
            .field("read_chunk_size", &self.read_chunk_size)
            .field("timeout", &self.timeout)
            .field("event_queue_depth", &self.event_queue_depth)
            .finish()
    }
}

/// An authenticated connection to a dumdum server.
pub struct AsyncClient {
    protocol: Arc<TokioMutex<Client>>,
    writer: TokioMutex<WriteHalf<BoxedTransport>>,
    pending: VecDeque<ClientEvent>,
    events: mpsc::Receiver<Result<ClientEvent>>,
    reader: JoinHandle<()>,
    using_ssl: bool,
}

impl AsyncClient {
    /// Connect to `addr` (`host:port`) and authenticate as `nick`.
    pub async fn connect(addr: &str, nick: &str, options: ClientOptions) -> Result<Self> {
        validate_nick(nick)?;

        let mut tcp = tokio::time::timeout(options.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;
        info!(%addr, nick, "Connected");

        let mut client = Client::new(nick).with_buffer_size(options.buffer_size);
        let mut chunk = vec![0u8; options.read_chunk_size.max(1)];

        tcp.write_all(&client.hello()?).await?;
        tcp.flush().await?;

        let mut events = next_events(&mut tcp, &mut client, &mut chunk, options.timeout).await?;
        let using_ssl = match events.pop_front() {
            Some(ClientEvent::Hello { using_ssl }) => using_ssl,
            Some(ClientEvent::IncompatibleVersion {
                server_version,
                client_version,
            }) => {
                return Err(Error::IncompatibleVersion {
                    server_version,
                    client_version,
                })
            }
            other => {
                return Err(Error::MalformedData(format!(
                    "expected server hello, got {:?}",
                    other
                )))
            }
        };

        // The server hello is the last plaintext message, so nothing read
        // so far belongs to the TLS session.
        let mut stream: BoxedTransport = if using_ssl {
            let connector = options.tls.clone().ok_or(Error::TlsRequired)?;
            let name = match &options.server_name {
                Some(name) => name.clone(),
                None => host_part(addr).to_owned(),
            };
            let server_name = tls::server_name(&name)?;
            let tls_stream = tokio::time::timeout(options.timeout, connector.connect(server_name, tcp))
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|e| Error::Tls(e.to_string()))?;
            debug!(server_name = %name, "TLS upgrade complete");
            Box::new(tls_stream)
        } else {
            Box::new(tcp)
        };

        stream.write_all(&client.authenticate()?).await?;
        stream.flush().await?;

        let mut pending = events;
        loop {
            if pending.is_empty() {
                pending = next_events(&mut stream, &mut client, &mut chunk, options.timeout).await?;
            }
            match pending.pop_front() {
                Some(ClientEvent::Authentication { success: true }) => break,
                Some(ClientEvent::Authentication { success: false }) => {
                    return Err(Error::AuthenticationFailed)
                }
                Some(other) => debug!(event = ?other, "Ignoring event before authentication"),
                None => {}
            }
        }
        info!(nick, using_ssl, "Authenticated");

        let (read_half, write_half) = tokio::io::split(stream);
        let protocol = Arc::new(TokioMutex::new(client));
        let (tx, rx) = mpsc::channel(options.event_queue_depth.max(1));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&protocol),
            tx,
            options.read_chunk_size.max(1),
        ));

        Ok(Self {
            protocol,
            writer: TokioMutex::new(write_half),
            pending,
            events: rx,
            reader,
            using_ssl,
        })
    }

    /// Whether the session runs over TLS.
    pub fn using_ssl(&self) -> bool {
        self.using_ssl
    }

    /// Current protocol state.
    pub async fn state(&self) -> ClientState {
        self.protocol.lock().await.state()
    }

    /// Post `content` to `channel_name`.
    pub async fn send_message(&self, channel_name: &str, content: &str) -> Result<()> {
        let data = self.protocol.lock().await.send_message(channel_name, content)?;
        self.write(&data).await
    }

    /// Request the channel list; the reply arrives as
    /// [`ClientEvent::ChannelsListed`].
    pub async fn list_channels(&self) -> Result<()> {
        let data = self.protocol.lock().await.list_channels()?;
        self.write(&data).await
    }

    /// Request channel history; the reply arrives as
    /// [`ClientEvent::MessagesListed`].
    pub async fn list_messages(
        &self,
        channel_name: &str,
        before: Option<u64>,
        after: Option<u64>,
    ) -> Result<()> {
        let data = self
            .protocol
            .lock()
            .await
            .list_messages(channel_name, before, after)?;
        self.write(&data).await
    }

    /// Next event from the server, or `None` once the connection closed.
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Shut the connection down.
    pub async fn close(self) -> Result<()> {
        let result = self.writer.lock().await.shutdown().await;
        self.reader.abort();
        result.map_err(Error::from)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read until at least one event is parsed.
async fn next_events<S>(
    stream: &mut S,
    client: &mut Client,
    chunk: &mut [u8],
    timeout: Duration,
) -> Result<VecDeque<ClientEvent>>
where
    S: AsyncRead + Unpin,
{
    loop {
        let n = tokio::time::timeout(timeout, stream.read(chunk))
            .await
            .map_err(|_| Error::Timeout)??;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        let parsed = client.receive_bytes(&chunk[..n])?;
        if !parsed.events.is_empty() {
            return Ok(parsed.events.into());
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedTransport>,
    protocol: Arc<TokioMutex<Client>>,
    events: mpsc::Sender<Result<ClientEvent>>,
    chunk_size: usize,
) {
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Server closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(Err(e.into())).await;
                return;
            }
        };

        let parsed = protocol.lock().await.receive_bytes(&chunk[..n]);
        match parsed {
            Ok(parsed) => {
                for event in parsed.events {
                    if events.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Protocol error from server");
                let _ = events.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Host part of `host:port`, with IPv6 brackets removed.
fn host_part(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_part() {
        assert_eq!(host_part("localhost:6667"), "localhost");
        assert_eq!(host_part("[::1]:6667"), "::1");
        assert_eq!(host_part("example.org"), "example.org");
    }

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert!(options.tls.is_none());
        assert_eq!(options.read_chunk_size, 1024);
        assert_eq!(options.buffer_size, Some(DEFAULT_BUFFER_SIZE));
    }
}
