//! The decoder contract (spec §4.3): a decoder is a pure function from a
//! reply frame to a typed value. Decoders never perform I/O and must not
//! be given a connection borrow, so they can be invoked from inside the
//! executor's completion path without risking deadlock.

use bytes::Bytes;

use crate::core::errors::ClientError;
use crate::core::protocol::resp::RespFrame;

/// A reply decoder: `RespFrame -> T`. Boxed so request descriptors can be
/// stored in a homogeneous queue regardless of the command's return type.
pub type Decoder<T> = Box<dyn Fn(RespFrame) -> Result<T, ClientError> + Send + Sync>;

/// Classifies a raw reply before a decoder ever sees it, per the error
/// taxonomy in spec §7. `Redirect` carries enough information for the
/// executor to resend the command without reparsing the error string.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Value(RespFrame),
    Redirect(Redirect),
    ServerError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Redirect {
    Moved { slot: u16, addr: String },
    Ask { slot: u16, addr: String },
}

/// Classifies a reply frame: server errors are split into plain errors and
/// cluster redirects (MOVED/ASK), everything else passes through.
pub fn classify(frame: RespFrame) -> ReplyOutcome {
    let RespFrame::Error(msg) = frame else {
        return ReplyOutcome::Value(frame);
    };
    if let Some(redirect) = parse_redirect(&msg) {
        return ReplyOutcome::Redirect(redirect);
    }
    ReplyOutcome::ServerError(msg)
}

fn parse_redirect(msg: &str) -> Option<Redirect> {
    let mut parts = msg.split_ascii_whitespace();
    let kind = parts.next()?;
    let slot: u16 = parts.next()?.parse().ok()?;
    let addr = parts.next()?.to_string();
    match kind {
        "MOVED" => Some(Redirect::Moved { slot, addr }),
        "ASK" => Some(Redirect::Ask { slot, addr }),
        _ => None,
    }
}

/// Decodes a reply expected to be `OK` (or any simple string).
pub fn decode_ok(frame: RespFrame) -> Result<(), ClientError> {
    match frame {
        RespFrame::SimpleString(_) => Ok(()),
        other => Err(unexpected("simple string", &other)),
    }
}

/// Decodes an integer reply.
pub fn decode_integer(frame: RespFrame) -> Result<i64, ClientError> {
    match frame {
        RespFrame::Integer(i) => Ok(i),
        other => Err(unexpected("integer", &other)),
    }
}

/// Decodes a bulk string, treating a RESP nil as `None`.
pub fn decode_bulk_opt(frame: RespFrame) -> Result<Option<Bytes>, ClientError> {
    match frame {
        RespFrame::BulkString(b) => Ok(Some(b)),
        RespFrame::Null => Ok(None),
        other => Err(unexpected("bulk string or nil", &other)),
    }
}

/// Decodes a bulk string, surfacing a nil as [`ClientError::KeyNotFound`].
pub fn decode_bulk(frame: RespFrame) -> Result<Bytes, ClientError> {
    decode_bulk_opt(frame)?.ok_or(ClientError::KeyNotFound)
}

/// Decodes an array of bulk strings, e.g. a `CLUSTER GETKEYSINSLOT` reply
/// or a hash-scan batch (multi-frame decoders consume a known number of
/// frames stated by the command's own metadata, never a sentinel).
pub fn decode_bulk_array(frame: RespFrame) -> Result<Vec<Bytes>, ClientError> {
    match frame {
        RespFrame::Array(items) => items.into_iter().map(decode_bulk).collect(),
        RespFrame::NullArray => Ok(Vec::new()),
        other => Err(unexpected("array", &other)),
    }
}

fn unexpected(expected: &str, got: &RespFrame) -> ClientError {
    ClientError::Protocol(format!("expected {expected}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_moved_redirect() {
        let outcome = classify(RespFrame::Error("MOVED 6000 127.0.0.1:7001".into()));
        assert_eq!(
            outcome,
            ReplyOutcome::Redirect(Redirect::Moved {
                slot: 6000,
                addr: "127.0.0.1:7001".into(),
            })
        );
    }

    #[test]
    fn classifies_ask_redirect() {
        let outcome = classify(RespFrame::Error("ASK 6000 127.0.0.1:7002".into()));
        assert_eq!(
            outcome,
            ReplyOutcome::Redirect(Redirect::Ask {
                slot: 6000,
                addr: "127.0.0.1:7002".into(),
            })
        );
    }

    #[test]
    fn classifies_plain_server_error() {
        let outcome = classify(RespFrame::Error("WRONGTYPE bad op".into()));
        assert_eq!(outcome, ReplyOutcome::ServerError("WRONGTYPE bad op".into()));
    }

    #[test]
    fn decode_bulk_opt_treats_null_as_none() {
        assert_eq!(decode_bulk_opt(RespFrame::Null).unwrap(), None);
    }
}
