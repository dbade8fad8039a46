//! Request descriptors (spec §3 "Request descriptor"): an immutable
//! description of one command submission, built by a primitive and handed
//! to the command executor (C4).

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::core::protocol::decode::Decoder;
use crate::core::protocol::resp::RespFrame;

/// Which pool role a command must be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Write,
    Read,
    Subscribe,
}

/// How a command's routing key is determined.
#[derive(Debug, Clone)]
pub enum RouteKey {
    /// Route by hashing this key (cluster mode) / ignored otherwise.
    Key(Bytes),
    /// Route to a specific, caller-chosen endpoint (used by topology
    /// discovery and by redirect handling).
    Fixed(String),
}

/// An immutable description of one command submission. `T` is the decoded
/// reply type; the decoder closure erases it into a boxed `Fn` so
/// heterogeneous descriptors share a queue in the batch engine.
pub struct Command<T> {
    pub name: &'static str,
    pub args: Vec<Bytes>,
    pub route: RouteKey,
    pub read_only: bool,
    pub decoder: Decoder<T>,
    pub deadline: Option<Instant>,
    pub retry_budget: u32,
}

impl<T> Command<T> {
    pub fn new(
        name: &'static str,
        args: Vec<Bytes>,
        route: RouteKey,
        read_only: bool,
        decoder: Decoder<T>,
    ) -> Self {
        Self {
            name,
            args,
            route,
            read_only,
            decoder,
            deadline: None,
            retry_budget: 0,
        }
    }

    pub fn with_deadline(mut self, waiting: Duration) -> Self {
        self.deadline = Some(Instant::now() + waiting);
        self
    }

    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }

    /// The role a command must be sent to: read-only commands may go to a
    /// replica depending on the topology's read mode; everything else
    /// must hit the primary (spec §4.3 step 2).
    pub fn role(&self) -> Role {
        if self.read_only {
            Role::Read
        } else {
            Role::Write
        }
    }

    pub fn to_frame(&self) -> RespFrame {
        RespFrame::command(self.name, self.args.iter().cloned())
    }

    pub fn routing_key(&self) -> Option<&Bytes> {
        match &self.route {
            RouteKey::Key(k) => Some(k),
            RouteKey::Fixed(_) => None,
        }
    }
}

/// Builds an `EVAL script keyCount k1..kn a1..am` invocation, the
/// server-side script protocol used throughout C7.
pub fn eval_frame(script: &str, keys: &[Bytes], argv: &[Bytes]) -> RespFrame {
    let mut args = Vec::with_capacity(2 + keys.len() + argv.len());
    args.push(Bytes::copy_from_slice(script.as_bytes()));
    args.push(Bytes::copy_from_slice(keys.len().to_string().as_bytes()));
    args.extend(keys.iter().cloned());
    args.extend(argv.iter().cloned());
    RespFrame::command("EVAL", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::decode::decode_ok;

    #[test]
    fn read_only_command_routes_to_read_role() {
        let cmd: Command<()> = Command::new(
            "GET",
            vec![Bytes::from_static(b"k")],
            RouteKey::Key(Bytes::from_static(b"k")),
            true,
            Box::new(decode_ok),
        );
        assert_eq!(cmd.role(), Role::Read);
    }

    #[test]
    fn write_command_routes_to_write_role() {
        let cmd: Command<()> = Command::new(
            "SET",
            vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")],
            RouteKey::Key(Bytes::from_static(b"k")),
            false,
            Box::new(decode_ok),
        );
        assert_eq!(cmd.role(), Role::Write);
    }

    #[test]
    fn eval_frame_places_key_count_before_keys_and_args() {
        let frame = eval_frame(
            "return 1",
            &[Bytes::from_static(b"lockA")],
            &[Bytes::from_static(b"holder1"), Bytes::from_static(b"30000")],
        );
        match frame {
            RespFrame::Array(items) => {
                assert_eq!(items.len(), 5);
                assert_eq!(items[1], RespFrame::bulk(Bytes::from_static(b"1")));
            }
            _ => panic!("expected array frame"),
        }
    }
}
