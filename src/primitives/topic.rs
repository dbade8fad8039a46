//! Pub/sub topic handle (spec §4.4 "Topics"): publish through the
//! executor, subscribe through the pub/sub service, both addressed at
//! the same `redisson_sc:{name}` channel every other primitive's
//! wakeup notifications share the naming convention with.

use bytes::Bytes;

use crate::client::Client;
use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::keys;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_integer;
use crate::core::pubsub::{PubSubMessage, PubSubService, Subscription};
use std::sync::Arc;

pub struct TopicHandle {
    executor: Arc<Executor>,
    pubsub: Arc<PubSubService>,
    channel: Bytes,
}

impl TopicHandle {
    pub fn new(client: &Client, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            executor: client.executor().clone(),
            pubsub: client.pubsub().clone(),
            channel: Bytes::copy_from_slice(keys::channel(&name).as_bytes()),
        }
    }

    /// Publishes `payload` and returns the number of subscribers that
    /// received it.
    pub async fn publish(&self, payload: &[u8]) -> Result<i64, ClientError> {
        let frame = self
            .executor
            .send_raw(
                "PUBLISH",
                vec![self.channel.clone(), Bytes::copy_from_slice(payload)],
                RouteKey::Key(self.channel.clone()),
                false,
            )
            .await?;
        decode_integer(frame)
    }

    pub async fn subscribe(&self) -> Result<Subscription, ClientError> {
        self.pubsub.subscribe(self.channel.clone()).await
    }
}

pub type TopicMessage = PubSubMessage;
