//! A single multiplexed connection to one [`Endpoint`] (spec §3
//! "Connection", §4.1 "Pipelining"). One connection processes commands
//! strictly in send order; replies are matched FIFO to the in-flight
//! queue, generalizing the teacher's per-connection in-flight reply
//! matching from an inbound server connection to an outbound client one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::core::connection::endpoint::Endpoint;
use crate::core::connection::stream::AnyStream;
use crate::core::connection::tls;
use crate::core::errors::ClientError;
use crate::core::protocol::resp::{RespCodec, RespFrame};

/// Lifecycle states from spec §3: *connecting → ready → (draining) →
/// closed*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Draining,
    Closed,
}

struct InFlight {
    completion: oneshot::Sender<Result<RespFrame, ClientError>>,
}

/// One outbound TCP connection plus its FIFO of in-flight requests. The
/// write half is guarded by an async mutex so that "push onto the
/// in-flight queue" and "write the frame" happen atomically with respect
/// to other senders, which is what keeps strict FIFO ordering between the
/// queue and the bytes actually on the wire.
pub struct Connection {
    id: u64,
    endpoint: Endpoint,
    write_half: AsyncMutex<WriteHalf<AnyStream>>,
    in_flight: Arc<SyncMutex<VecDeque<InFlight>>>,
    state: Arc<SyncMutex<ConnectionState>>,
    closed: Arc<AtomicBool>,
    last_used_at_ms: Arc<AtomicU64>,
    epoch: std::time::Instant,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl Connection {
    /// Opens a fresh socket to `endpoint`, upgrading to TLS with the
    /// bundled Mozilla roots when `endpoint.tls` is set. Pooled
    /// connections that need a custom truststore go through
    /// [`Connection::connect_with_truststore`] instead.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, ClientError> {
        Self::connect_with_truststore(endpoint, None).await
    }

    pub async fn connect_with_truststore(endpoint: Endpoint, truststore_path: Option<&str>) -> Result<Self, ClientError> {
        let addr = endpoint.resolve().await?;
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true).ok();

        let stream = if endpoint.tls {
            let connector = tls::build_connector(truststore_path)?;
            let name = tls::server_name(&endpoint.host)?;
            let tls_stream = connector
                .connect(name, tcp)
                .await
                .map_err(|e| ClientError::Io(Arc::new(e)))?;
            AnyStream::Tls(Box::new(tls_stream))
        } else {
            AnyStream::Tcp(tcp)
        };

        Ok(Self::from_stream(endpoint, stream))
    }

    fn from_stream(endpoint: Endpoint, stream: AnyStream) -> Self {
        let (read_half, write_half) = split(stream);
        let in_flight: Arc<SyncMutex<VecDeque<InFlight>>> = Arc::new(SyncMutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_in_flight = in_flight.clone();
        let reader_closed = closed.clone();
        tokio::spawn(Self::run_reader(read_half, reader_in_flight, reader_closed));

        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            write_half: AsyncMutex::new(write_half),
            in_flight,
            state: Arc::new(SyncMutex::new(ConnectionState::Ready)),
            closed,
            last_used_at_ms: Arc::new(AtomicU64::new(0)),
            epoch: std::time::Instant::now(),
        }
    }

    /// The reader half: decodes frames as they arrive and completes the
    /// head of the in-flight queue, one reply per frame, strictly in
    /// order. On read error or EOF every still-pending descriptor fails
    /// with a connection error (spec §3: "On close, all in-flight
    /// descriptors fail with a connection error").
    async fn run_reader(mut read_half: ReadHalf<AnyStream>, in_flight: Arc<SyncMutex<VecDeque<InFlight>>>, closed: Arc<AtomicBool>) {
        let mut codec = RespCodec;
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    Self::complete_head(&in_flight, Ok(frame));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    Self::fail_all(&in_flight, e);
                    break;
                }
            }

            let mut chunk = [0u8; 4096];
            match read_half.read(&mut chunk).await {
                Ok(0) => {
                    Self::fail_all(
                        &in_flight,
                        ClientError::Io(Arc::new(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection closed by peer",
                        ))),
                    );
                    break;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    Self::fail_all(&in_flight, ClientError::from(e));
                    break;
                }
            }
        }
        closed.store(true, Ordering::SeqCst);
    }

    fn complete_head(
        in_flight: &Arc<SyncMutex<VecDeque<InFlight>>>,
        result: Result<RespFrame, ClientError>,
    ) {
        let head = in_flight.lock().pop_front();
        if let Some(head) = head {
            let _ = head.completion.send(result);
        } else {
            debug!("reply arrived with no pending request; dropping");
        }
    }

    fn fail_all(in_flight: &Arc<SyncMutex<VecDeque<InFlight>>>, err: ClientError) {
        let mut queue = in_flight.lock();
        while let Some(pending) = queue.pop_front() {
            let _ = pending.completion.send(Err(err.clone()));
        }
    }

    /// Appends `frame` to the in-flight FIFO and writes it to the socket
    /// under the same critical section, then awaits the matching reply.
    /// The caller is responsible for imposing a per-attempt deadline
    /// (spec §4.3 step 4): this method never times out on its own, since
    /// a connection may be legitimately shared by several outstanding
    /// non-blocking commands.
    pub async fn send(&self, frame: RespFrame) -> Result<RespFrame, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }

        let bytes = frame.encode_to_vec()?;
        let (tx, rx) = oneshot::channel();

        {
            let mut write_half = self.write_half.lock().await;
            self.in_flight.lock().push_back(InFlight { completion: tx });
            if let Err(e) = write_half.write_all(&bytes).await {
                Self::fail_all(&self.in_flight, ClientError::from(e));
                self.closed.store(true, Ordering::SeqCst);
                return Err(closed_error());
            }
        }

        self.last_used_at_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);

        rx.await.unwrap_or_else(|_| Err(closed_error()))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn mark_draining(&self) {
        *self.state.lock() = ConnectionState::Draining;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn idle_for(&self) -> std::time::Duration {
        let last = self.last_used_at_ms.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        std::time::Duration::from_millis(now.saturating_sub(last))
    }
}

fn closed_error() -> ClientError {
    ClientError::Io(Arc::new(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection is closed",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_monotonic() {
        let first = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let second = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        assert!(second > first);
    }

    #[tokio::test]
    async fn send_on_a_dead_connection_fails_fast() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        let endpoint = Endpoint::new(addr.ip().to_string(), addr.port());
        let conn = Connection::connect(endpoint).await.unwrap();
        // Give the peer a moment to close the socket before we send.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let result = conn.send(RespFrame::command("PING", vec![])).await;
        assert!(result.is_err());
    }
}
