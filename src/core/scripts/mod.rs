//! Server-side primitive protocols (C7, spec §4.6): every primitive with
//! contention is backed by a small atomic Lua script plus a client-side
//! retry loop that subscribes for a wake-up when the script refuses.
//!
//! Script bodies are kept as string constants in [`lua`] rather than
//! executed locally — this client only ever ships them to the server via
//! `EVALSHA`/`EVAL`, mirroring the SHA1-keyed script cache the teacher's
//! own `LuaManager` keeps for the same command pair.

pub mod fair_lock;
pub mod lock;
pub mod lua;
pub mod map_cache;
pub mod priority_queue;
pub mod rate_limiter;
pub mod scheduler_queue;
pub mod semaphore;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::core::errors::ClientError;
use crate::core::executor::Executor;
use crate::core::protocol::command::RouteKey;
use crate::core::protocol::resp::RespFrame;

static SHA_CACHE: Lazy<DashMap<&'static str, String>> = Lazy::new(DashMap::new);

fn sha1_hex(script: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(script.as_bytes());
    hex::encode(hasher.finalize())
}

fn cached_sha(script: &'static str) -> String {
    SHA_CACHE.entry(script).or_insert_with(|| sha1_hex(script)).clone()
}

/// Runs a script, trying `EVALSHA` against the cached digest first and
/// falling back to a full `EVAL` (re-priming the cache) on `NOSCRIPT`.
pub async fn eval_cached(
    executor: &Executor,
    script: &'static str,
    keys: Vec<Bytes>,
    argv: Vec<Bytes>,
    route: RouteKey,
) -> Result<RespFrame, ClientError> {
    let sha = cached_sha(script);
    let mut args = Vec::with_capacity(2 + keys.len() + argv.len());
    args.push(Bytes::copy_from_slice(sha.as_bytes()));
    args.push(Bytes::copy_from_slice(keys.len().to_string().as_bytes()));
    args.extend(keys.iter().cloned());
    args.extend(argv.iter().cloned());

    match executor.send_raw("EVALSHA", args, route.clone(), false).await {
        Err(ClientError::Server(msg)) if msg.starts_with("NOSCRIPT") => {
            debug!(sha = %sha, "script not cached server-side, falling back to EVAL");
            executor.send_eval(script, keys, argv, route).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_sha_is_stable_and_matches_a_fresh_hash() {
        let script: &'static str = "return 1";
        let sha = cached_sha(script);
        assert_eq!(sha, sha1_hex(script));
        assert_eq!(sha, cached_sha(script));
    }
}
