//! Reliable topic (spec glossary: "reliable topic... not specified in
//! depth; built atop the core"). A topic plus a server-side backlog list
//! key so a subscriber that reconnects can catch up on recent messages
//! by reading the backlog instead of only the live stream.
//!
//! This does not implement exactly-once or at-least-once delivery
//! guarantees across a consumer group the way a dedicated reliable
//! messaging system would — it is a demonstration of the pub/sub and
//! key-value layers composing, not a durable queue. A message published
//! while a consumer is disconnected is only recoverable via
//! [`ReliableTopicHandle::history`], and only for as long as it stays
//! within `max_backlog` of the list head.

use bytes::Bytes;
use std::sync::Arc;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_bulk_array;
use crate::core::pubsub::Subscription;
use crate::primitives::topic::TopicHandle;

const DEFAULT_MAX_BACKLOG: i64 = 100;

pub struct ReliableTopicHandle {
    executor: Arc<Executor>,
    topic: TopicHandle,
    history_key: Bytes,
    max_backlog: i64,
}

impl ReliableTopicHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        Self::with_backlog(client, name, DEFAULT_MAX_BACKLOG)
    }

    pub fn with_backlog(client: &Client, name: impl Into<String>, max_backlog: i64) -> Self {
        let name = name.into();
        Self {
            executor: client.executor().clone(),
            history_key: Bytes::copy_from_slice(keys::aux(&name, "history").as_bytes()),
            topic: TopicHandle::new(client, name),
            max_backlog,
        }
    }

    /// Appends `payload` to the backlog list, trims it to `max_backlog`
    /// entries, then publishes it to live subscribers. The append and
    /// the publish are two separate round trips, so a crash between them
    /// can leave a message in the backlog that was never delivered live
    /// — callers that need stronger guarantees should poll
    /// [`ReliableTopicHandle::history`] rather than rely on live
    /// delivery alone.
    pub async fn publish(&self, payload: &[u8]) -> Result<i64, ClientError> {
        self.executor
            .send_raw(
                "RPUSH",
                vec![self.history_key.clone(), Bytes::copy_from_slice(payload)],
                RouteKey::Key(self.history_key.clone()),
                false,
            )
            .await?;
        self.executor
            .send_raw(
                "LTRIM",
                vec![
                    self.history_key.clone(),
                    Bytes::copy_from_slice((-self.max_backlog).to_string().as_bytes()),
                    Bytes::copy_from_slice(b"-1"),
                ],
                RouteKey::Key(self.history_key.clone()),
                false,
            )
            .await?;
        self.topic.publish(payload).await
    }

    /// Returns the most recent `count` backlog entries, oldest first.
    pub async fn history(&self, count: i64) -> Result<Vec<Bytes>, ClientError> {
        let frame = self
            .executor
            .send_raw(
                "LRANGE",
                vec![
                    self.history_key.clone(),
                    Bytes::copy_from_slice((-count).to_string().as_bytes()),
                    Bytes::copy_from_slice(b"-1"),
                ],
                RouteKey::Key(self.history_key.clone()),
                true,
            )
            .await?;
        decode_bulk_array(frame)
    }

    pub async fn subscribe(&self) -> Result<Subscription, ClientError> {
        self.topic.subscribe().await
    }
}
