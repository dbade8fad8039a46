//! The `Expirable` trait (spec §9 "Inheritance tree of 'expirable
//! object'"): a single shared composition point for `expireAt`/
//! `clearExpire`/`ttl` instead of a per-primitive inheritance tree.

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::decode::decode_integer;

/// Implemented by every primitive handle whose root key carries a
/// standalone TTL (locks, semaphores, rate limiters, map-cache roots).
/// The blanket command shapes mirror the plain `PEXPIRE`/`PERSIST`/`PTTL`
/// family; primitives that need scripted expiry semantics (e.g. the lock,
/// whose TTL is the lease and must not be touched except by its own
/// scripts) simply don't implement this trait on their public handle.
#[async_trait]
pub trait Expirable {
    fn key(&self) -> &str;
    fn executor(&self) -> &Executor;

    /// Sets an absolute expiration time in epoch milliseconds.
    async fn expire_at(&self, epoch_millis: i64) -> Result<bool, ClientError> {
        let frame = self
            .executor()
            .send_raw(
                "PEXPIREAT",
                vec![
                    Bytes::copy_from_slice(self.key().as_bytes()),
                    Bytes::copy_from_slice(epoch_millis.to_string().as_bytes()),
                ],
                RouteKey::Key(Bytes::copy_from_slice(self.key().as_bytes())),
                false,
            )
            .await?;
        Ok(decode_integer(frame)? == 1)
    }

    /// Removes any TTL, making the key persistent again.
    async fn clear_expire(&self) -> Result<bool, ClientError> {
        let frame = self
            .executor()
            .send_raw(
                "PERSIST",
                vec![Bytes::copy_from_slice(self.key().as_bytes())],
                RouteKey::Key(Bytes::copy_from_slice(self.key().as_bytes())),
                false,
            )
            .await?;
        Ok(decode_integer(frame)? == 1)
    }

    /// Remaining time to live, or `None` if the key has no TTL or does
    /// not exist.
    async fn remaining_ttl(&self) -> Result<Option<i64>, ClientError> {
        let frame = self
            .executor()
            .send_raw(
                "PTTL",
                vec![Bytes::copy_from_slice(self.key().as_bytes())],
                RouteKey::Key(Bytes::copy_from_slice(self.key().as_bytes())),
                true,
            )
            .await?;
        match decode_integer(frame)? {
            -2 | -1 => Ok(None),
            ms => Ok(Some(ms)),
        }
    }
}
