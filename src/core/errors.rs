//! The primary error type for the client, following the taxonomy in
//! spec §7. `thiserror` gives us a clean enum with automatic `Display` and
//! `From` implementations, the way the teacher's `SpinelDBError` does for
//! the server side.

use std::sync::Arc;

use thiserror::Error;

/// All errors a caller can observe. Every variant maps onto one of the
/// seven taxonomy buckets in spec §7; the doc comment on each names its
/// bucket.
#[derive(Error, Debug)]
pub enum ClientError {
    /// connection-fatal: socket error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// connection-fatal: reply did not parse because more bytes are needed.
    /// Never surfaced to a caller; consumed entirely by the codec.
    #[error("incomplete frame")]
    IncompleteData,

    /// connection-fatal: malformed reply on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// connection-fatal: a command's per-attempt timer fired with no reply.
    #[error("timed out waiting for a reply from the server")]
    ResponseTimeout,

    /// timeout-exceeded: the caller's `waitMs` budget was exhausted across
    /// every retry attempt.
    #[error("operation timed out after exhausting the wait budget")]
    WaitTimeout,

    /// server-error: command rejected semantically. Never retried.
    #[error("server error: {0}")]
    Server(String),

    /// server-error, a distinguished case: server replied WRONGTYPE.
    #[error("WRONGTYPE: operation against a key holding the wrong kind of value")]
    WrongType,

    /// server-error, a distinguished case: a bulk reply expected to carry
    /// a value came back nil.
    #[error("key not found")]
    KeyNotFound,

    /// not-available: no shard-entry exists for the targeted slot, even
    /// after retrying against a refreshed topology.
    #[error("no node found for slot {0}")]
    NodeNotFound(u16),

    /// protocol-redirect exhausted: too many MOVED/ASK hops for one
    /// command.
    #[error("exceeded {0} redirect attempts")]
    TooManyRedirects(u32),

    /// rejected: executor/transactional submission refused because the
    /// owning primitive has already shut down.
    #[error("rejected: {0} has shut down")]
    Rejected(String),

    /// transaction-timeout: a transaction's deadline was missed.
    #[error("transaction timed out and was rolled back")]
    TransactionTimeout,

    /// server-error surfaced specifically by the transaction engine on
    /// staged-lock failure.
    #[error("transaction aborted: a staged key lock could not be acquired")]
    TransactionAborted,

    /// not-available: the pool could not hand back a connection before
    /// the caller's deadline.
    #[error("timed out waiting for a pooled connection")]
    PoolExhausted,

    /// configuration error raised at client construction time, not part
    /// of the runtime taxonomy but surfaced the same way.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// not-available: cluster discovery could not reach any seed node.
    #[error("can't connect to any seed node")]
    CantConnect,

    /// not-available: `checkSlotsCoverage` is enabled and the discovered
    /// partitions do not cover all 16384 slots.
    #[error("not all slots are covered by the discovered cluster topology")]
    SlotsNotCovered,

    /// server-error: multi-key command spans more than one slot.
    #[error("CROSSSLOT: keys in request don't hash to the same slot")]
    CrossSlot,
}

impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Io(e) => ClientError::Io(Arc::clone(e)),
            ClientError::IncompleteData => ClientError::IncompleteData,
            ClientError::Protocol(s) => ClientError::Protocol(s.clone()),
            ClientError::ResponseTimeout => ClientError::ResponseTimeout,
            ClientError::WaitTimeout => ClientError::WaitTimeout,
            ClientError::Server(s) => ClientError::Server(s.clone()),
            ClientError::WrongType => ClientError::WrongType,
            ClientError::KeyNotFound => ClientError::KeyNotFound,
            ClientError::NodeNotFound(s) => ClientError::NodeNotFound(*s),
            ClientError::TooManyRedirects(n) => ClientError::TooManyRedirects(*n),
            ClientError::Rejected(s) => ClientError::Rejected(s.clone()),
            ClientError::TransactionTimeout => ClientError::TransactionTimeout,
            ClientError::TransactionAborted => ClientError::TransactionAborted,
            ClientError::PoolExhausted => ClientError::PoolExhausted,
            ClientError::Config(s) => ClientError::Config(s.clone()),
            ClientError::CantConnect => ClientError::CantConnect,
            ClientError::SlotsNotCovered => ClientError::SlotsNotCovered,
            ClientError::CrossSlot => ClientError::CrossSlot,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}

impl ClientError {
    /// connection-fatal errors discard the connection and, if attempts
    /// remain, are retried on a fresh one (spec §7).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::ResponseTimeout
                | ClientError::PoolExhausted
        )
    }

    /// server-error replies are surfaced verbatim and are never retried.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ClientError::Server(_)
                | ClientError::WrongType
                | ClientError::KeyNotFound
                | ClientError::CrossSlot
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_fatal_errors_are_classified() {
        assert!(ClientError::ResponseTimeout.is_connection_fatal());
        assert!(!ClientError::Server("x".into()).is_connection_fatal());
    }

    #[test]
    fn server_errors_are_never_connection_fatal() {
        let e = ClientError::Server("WRONGTYPE".into());
        assert!(e.is_server_error());
        assert!(!e.is_connection_fatal());
    }

    #[test]
    fn io_errors_clone_via_arc() {
        let e = ClientError::from(std::io::Error::other("boom"));
        let cloned = e.clone();
        assert!(matches!(cloned, ClientError::Io(_)));
    }
}
