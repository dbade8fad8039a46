//! A dedicated connection type for the subscribe role. Unlike [`Connection`]
//! (spec §3), a subscribe connection's incoming frames are not answered
//! one-for-one: after the initial SUBSCRIBE/PSUBSCRIBE acknowledgment the
//! server pushes `message`/`pmessage` frames with no corresponding
//! request, so the generic in-flight FIFO reply-matching would silently
//! drop them. This type demultiplexes acks from pushed messages instead.
//!
//! [`Connection`]: crate::core::connection::Connection

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, broadcast, oneshot};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::core::connection::Endpoint;
use crate::core::errors::ClientError;
use crate::core::protocol::resp::{RespCodec, RespFrame};

pub const MESSAGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub pattern: Option<Bytes>,
    pub channel: Bytes,
    pub payload: Bytes,
}

pub struct SubscribeConnection {
    endpoint: Endpoint,
    write_half: AsyncMutex<tokio::net::tcp::OwnedWriteHalf>,
    ack_queue: Arc<SyncMutex<VecDeque<oneshot::Sender<RespFrame>>>>,
    channel_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
    pattern_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
    subscription_count: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl SubscribeConnection {
    pub async fn connect(endpoint: Endpoint) -> Result<Arc<Self>, ClientError> {
        let addr = endpoint.resolve().await?;
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let ack_queue = Arc::new(SyncMutex::new(VecDeque::new()));
        let channel_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>> = Arc::new(DashMap::new());
        let pattern_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let conn = Arc::new(Self {
            endpoint,
            write_half: AsyncMutex::new(write_half),
            ack_queue: ack_queue.clone(),
            channel_senders: channel_senders.clone(),
            pattern_senders: pattern_senders.clone(),
            subscription_count: Arc::new(AtomicUsize::new(0)),
            closed: closed.clone(),
        });

        tokio::spawn(run_reader(read_half, ack_queue, channel_senders, pattern_senders, closed));

        Ok(conn)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscription_count.load(Ordering::Relaxed)
    }

    async fn send_and_wait_ack(&self, frame: RespFrame) -> Result<RespFrame, ClientError> {
        let bytes = frame.encode_to_vec()?;
        let (tx, rx) = oneshot::channel();
        {
            let mut write_half = self.write_half.lock().await;
            self.ack_queue.lock().push_back(tx);
            if let Err(e) = write_half.write_all(&bytes).await {
                self.closed.store(true, Ordering::SeqCst);
                return Err(ClientError::from(e));
            }
        }
        rx.await.map_err(|_| ClientError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "subscribe connection closed before ack arrived",
        ))))
    }

    /// Issues SUBSCRIBE and returns a receiver fed by every `message`
    /// push for that exact channel name.
    /// Subscribes to an exact channel name. A second call for a channel
    /// this connection already carries skips the network round-trip
    /// entirely and just hands back a fresh receiver on the existing
    /// broadcast sender (spec §4.4 "If an entry exists for the channel,
    /// append the listener... return").
    pub async fn subscribe(&self, channel: Bytes) -> Result<broadcast::Receiver<PubSubMessage>, ClientError> {
        if let Some(existing) = self.channel_senders.get(&channel) {
            return Ok(existing.subscribe());
        }
        self.send_and_wait_ack(RespFrame::command("SUBSCRIBE", vec![channel.clone()])).await?;
        self.subscription_count.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        self.channel_senders.insert(channel, tx);
        Ok(rx)
    }

    pub async fn psubscribe(&self, pattern: Bytes) -> Result<broadcast::Receiver<PubSubMessage>, ClientError> {
        if let Some(existing) = self.pattern_senders.get(&pattern) {
            return Ok(existing.subscribe());
        }
        self.send_and_wait_ack(RespFrame::command("PSUBSCRIBE", vec![pattern.clone()])).await?;
        self.subscription_count.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        self.pattern_senders.insert(pattern, tx);
        Ok(rx)
    }

    pub(crate) fn snapshot_channel_senders(&self) -> Vec<(Bytes, broadcast::Sender<PubSubMessage>)> {
        self.channel_senders.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub(crate) fn snapshot_pattern_senders(&self) -> Vec<(Bytes, broadcast::Sender<PubSubMessage>)> {
        self.pattern_senders.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Re-homes another connection's live senders onto this one, so
    /// receivers handed out before a reconnect keep working afterward.
    pub(crate) fn adopt_senders(
        &self,
        channels: Vec<(Bytes, broadcast::Sender<PubSubMessage>)>,
        patterns: Vec<(Bytes, broadcast::Sender<PubSubMessage>)>,
    ) {
        for (name, sender) in channels {
            self.channel_senders.insert(name, sender);
        }
        for (name, sender) in patterns {
            self.pattern_senders.insert(name, sender);
        }
    }

    pub async fn unsubscribe(&self, channel: &Bytes) -> Result<(), ClientError> {
        self.send_and_wait_ack(RespFrame::command("UNSUBSCRIBE", vec![channel.clone()])).await?;
        self.channel_senders.remove(channel);
        self.subscription_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn punsubscribe(&self, pattern: &Bytes) -> Result<(), ClientError> {
        self.send_and_wait_ack(RespFrame::command("PUNSUBSCRIBE", vec![pattern.clone()])).await?;
        self.pattern_senders.remove(pattern);
        self.subscription_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Re-subscribes to every channel/pattern this connection used to
    /// carry, in deterministic name order (spec §4.4 "Reconnection"),
    /// reusing the existing broadcast senders so listeners keep their
    /// receivers across a reconnect.
    pub async fn replay(&self) -> Result<(), ClientError> {
        let mut channels: Vec<Bytes> = self.channel_senders.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        for channel in channels {
            self.send_and_wait_ack(RespFrame::command("SUBSCRIBE", vec![channel])).await?;
        }
        let mut patterns: Vec<Bytes> = self.pattern_senders.iter().map(|e| e.key().clone()).collect();
        patterns.sort();
        for pattern in patterns {
            self.send_and_wait_ack(RespFrame::command("PSUBSCRIBE", vec![pattern])).await?;
        }
        Ok(())
    }
}

async fn run_reader(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    ack_queue: Arc<SyncMutex<VecDeque<oneshot::Sender<RespFrame>>>>,
    channel_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
    pattern_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
    closed: Arc<AtomicBool>,
) {
    let mut codec = RespCodec;
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => {
                dispatch(frame, &ack_queue, &channel_senders, &pattern_senders);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("subscribe connection protocol error: {e}");
                break;
            }
        }
        let mut chunk = [0u8; 4096];
        match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!("subscribe connection read error: {e}");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
}

fn dispatch(
    frame: RespFrame,
    ack_queue: &Arc<SyncMutex<VecDeque<oneshot::Sender<RespFrame>>>>,
    channel_senders: &Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
    pattern_senders: &Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>>,
) {
    let RespFrame::Array(items) = &frame else {
        debug!("ignoring non-array frame on a subscribe connection");
        return;
    };
    let Some(RespFrame::BulkString(kind)) = items.first() else {
        return;
    };
    match kind.as_ref() {
        b"message" => {
            if let [_, RespFrame::BulkString(channel), RespFrame::BulkString(payload)] = items.as_slice()
                && let Some(sender) = channel_senders.get(channel)
            {
                let _ = sender.send(PubSubMessage { pattern: None, channel: channel.clone(), payload: payload.clone() });
            }
        }
        b"pmessage" => {
            if let [_, RespFrame::BulkString(pattern), RespFrame::BulkString(channel), RespFrame::BulkString(payload)] =
                items.as_slice()
                && let Some(sender) = pattern_senders.get(pattern)
            {
                let _ = sender.send(PubSubMessage {
                    pattern: Some(pattern.clone()),
                    channel: channel.clone(),
                    payload: payload.clone(),
                });
            }
        }
        b"subscribe" | b"unsubscribe" | b"psubscribe" | b"punsubscribe" => {
            if let Some(tx) = ack_queue.lock().pop_front() {
                let _ = tx.send(frame);
            }
        }
        other => debug!(kind = %String::from_utf8_lossy(other), "unrecognized subscribe push frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_handle_has_no_subscriptions() {
        let senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>> = Arc::new(DashMap::new());
        assert_eq!(senders.len(), 0);
    }

    #[test]
    fn dispatch_routes_message_frames_to_the_matching_channel_sender() {
        let ack_queue = Arc::new(SyncMutex::new(VecDeque::new()));
        let channel_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>> = Arc::new(DashMap::new());
        let pattern_senders: Arc<DashMap<Bytes, broadcast::Sender<PubSubMessage>>> = Arc::new(DashMap::new());
        let (tx, mut rx) = broadcast::channel(4);
        channel_senders.insert(Bytes::from_static(b"news"), tx);

        let frame = RespFrame::Array(vec![
            RespFrame::bulk(Bytes::from_static(b"message")),
            RespFrame::bulk(Bytes::from_static(b"news")),
            RespFrame::bulk(Bytes::from_static(b"hello")),
        ]);
        dispatch(frame, &ack_queue, &channel_senders, &pattern_senders);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.channel, Bytes::from_static(b"news"));
        assert_eq!(received.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn dispatch_completes_the_oldest_pending_ack_first() {
        let ack_queue = Arc::new(SyncMutex::new(VecDeque::new()));
        let channel_senders = Arc::new(DashMap::new());
        let pattern_senders = Arc::new(DashMap::new());
        let (tx, mut rx) = oneshot::channel();
        ack_queue.lock().push_back(tx);

        let ack_frame = RespFrame::Array(vec![
            RespFrame::bulk(Bytes::from_static(b"subscribe")),
            RespFrame::bulk(Bytes::from_static(b"news")),
            RespFrame::Integer(1),
        ]);
        dispatch(ack_frame.clone(), &ack_queue, &channel_senders, &pattern_senders);
        assert_eq!(rx.try_recv().unwrap(), ack_frame);
    }
}
