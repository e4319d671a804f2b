//! Per-connection bookkeeping and the outbound writer task.

use crate::error::{Error, Result};
use crate::protocol::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// What other connections may touch: the protocol machine (to check its
/// state before broadcasting) and the outbound queue.
#[derive(Debug, Clone)]
pub(crate) struct PeerHandle {
    pub protocol: Arc<TokioMutex<Server>>,
    pub outgoing: mpsc::Sender<Vec<u8>>,
}

/// One accepted client.
#[derive(Debug)]
pub(crate) struct Connection {
    pub id: u64,
    pub addr: SocketAddr,
    pub protocol: Arc<TokioMutex<Server>>,
    pub outgoing: mpsc::Sender<Vec<u8>>,
    /// Nickname claimed by this connection, released on teardown.
    pub nick: Option<String>,
    pub writer: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(id: u64, addr: SocketAddr, protocol: Server, outgoing: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            id,
            addr,
            protocol: Arc::new(TokioMutex::new(protocol)),
            outgoing,
            nick: None,
            writer: None,
        }
    }

    pub fn handle(&self) -> PeerHandle {
        PeerHandle {
            protocol: Arc::clone(&self.protocol),
            outgoing: self.outgoing.clone(),
        }
    }

    /// Queue bytes for the writer. Waits while the queue is full.
    pub async fn enqueue(&self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.outgoing
            .send(data)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Drop the queue and wait up to `close_timeout` for the writer to
    /// flush what is left and shut the stream down.
    pub async fn close(self, close_timeout: Duration) {
        let Connection {
            id,
            addr,
            outgoing,
            writer,
            ..
        } = self;
        drop(outgoing);
        if let Some(mut writer) = writer {
            if tokio::time::timeout(close_timeout, &mut writer).await.is_err() {
                debug!(conn = id, %addr, "Writer did not finish in time, aborting");
                writer.abort();
            }
        }
    }
}

/// Write queued chunks in order, flushing after each one.
///
/// Stops when every sender is gone or a write does not complete within
/// `drain_timeout`, then shuts the stream down.
pub(crate) async fn write_loop<W>(
    conn: u64,
    mut writer: W,
    mut queue: mpsc::Receiver<Vec<u8>>,
    drain_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = queue.recv().await {
        match write_with_timeout(&mut writer, &data, drain_timeout).await {
            Ok(()) => {}
            Err(e) => {
                debug!(conn, error = %e, "Write failed");
                break;
            }
        }
    }
    queue.close();
    let _ = tokio::time::timeout(drain_timeout, writer.shutdown()).await;
}

/// Write and flush `data`, failing with [`Error::Timeout`] when the peer
/// does not drain it in time.
pub(crate) async fn write_with_timeout<W>(writer: &mut W, data: &[u8], drain_timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(drain_timeout, async {
        writer.write_all(data).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| Error::Timeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_loop_preserves_order() {
        let (client, mut server) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_loop(1, client, rx, Duration::from_secs(5)));

        tx.send(b"hello ".to_vec()).await.expect("queue");
        tx.send(b"world".to_vec()).await.expect("queue");
        drop(tx);
        writer.await.expect("writer task");

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        // Nobody reads the other end, so the second write cannot drain.
        let (client, _server) = tokio::io::duplex(8);
        let mut client = client;
        write_with_timeout(&mut client, b"12345678", Duration::from_millis(50))
            .await
            .expect("fits in the pipe");
        let err = write_with_timeout(&mut client, b"9", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
