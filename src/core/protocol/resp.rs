//! The wire protocol: a RESP-like frame type plus the `tokio_util::codec`
//! `Encoder`/`Decoder` pair used on every connection (C1) and by the
//! internal sentinel/cluster discovery clients.
//!
//! Per the external interface contract (spec §6), a request is a
//! length-prefixed array of bulk strings and a reply is one of simple
//! string, integer, bulk string (or nil), array (recursive), or error.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::errors::ClientError;

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits, mirrored from the server's own decoder so a
// malformed or hostile reply can never make the client allocate unbounded
// memory while assembling a frame.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// A single frame of the wire protocol, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    pub fn bulk(s: impl Into<Bytes>) -> Self {
        RespFrame::BulkString(s.into())
    }

    pub fn array(items: Vec<RespFrame>) -> Self {
        RespFrame::Array(items)
    }

    /// Builds a request frame from a command name and its arguments, the
    /// shape every outbound command takes on the wire.
    pub fn command(name: &str, args: impl IntoIterator<Item = Bytes>) -> Self {
        let mut frames = Vec::with_capacity(1);
        frames.push(RespFrame::bulk(Bytes::copy_from_slice(name.as_bytes())));
        frames.extend(args.into_iter().map(RespFrame::BulkString));
        RespFrame::Array(frames)
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            RespFrame::Error(e) => Some(e.as_str()),
            _ => None,
        }
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, ClientError> {
        let mut buf = BytesMut::new();
        RespCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// Encodes/decodes [`RespFrame`]s over a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Encoder<RespFrame> for RespCodec {
    type Error = ClientError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst);
        Ok(())
    }
}

fn encode_frame(item: &RespFrame, dst: &mut BytesMut) {
    match item {
        RespFrame::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(i.to_string().as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(b.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(arr) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(arr.len().to_string().as_bytes());
            dst.extend_from_slice(CRLF);
            for frame in arr {
                encode_frame(frame, dst);
            }
        }
    }
}

impl Decoder for RespCodec {
    type Item = RespFrame;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(ClientError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    if src.is_empty() {
        return Err(ClientError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(ClientError::Protocol("unrecognized frame type byte".into())),
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|w| w == CRLF)
}

fn parse_line(src: &[u8]) -> Result<(&[u8], usize), ClientError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(ClientError::IncompleteData)
}

fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).into_owned()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).into_owned()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let i = s
        .parse::<i64>()
        .map_err(|_| ClientError::Protocol("invalid integer frame".into()))?;
    Ok((RespFrame::Integer(i), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s
        .parse::<isize>()
        .map_err(|_| ClientError::Protocol("invalid bulk string length".into()))?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(ClientError::Protocol("bulk string too large".into()));
    }

    let prefix_len = len_of_line + 1;
    if src.len() < prefix_len + str_len + CRLF_LEN {
        return Err(ClientError::IncompleteData);
    }
    if &src[prefix_len + str_len..prefix_len + str_len + CRLF_LEN] != CRLF {
        return Err(ClientError::Protocol("missing bulk string terminator".into()));
    }

    let data = Bytes::copy_from_slice(&src[prefix_len..prefix_len + str_len]);
    Ok((RespFrame::BulkString(data), prefix_len + str_len + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), ClientError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let arr_len = s
        .parse::<isize>()
        .map_err(|_| ClientError::Protocol("invalid array length".into()))?;

    if arr_len == -1 {
        return Ok((RespFrame::NullArray, len_of_line + 1));
    }
    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(ClientError::Protocol("array too large".into()));
    }

    let mut frames = Vec::with_capacity(arr_len.min(4096));
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        frames.push(frame);
        cursor += frame_len;
    }
    Ok((RespFrame::Array(frames), cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: RespFrame) {
        let mut buf = BytesMut::new();
        RespCodec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = RespCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrips_every_frame_kind() {
        roundtrip(RespFrame::SimpleString("OK".into()));
        roundtrip(RespFrame::Error("ERR boom".into()));
        roundtrip(RespFrame::Integer(-42));
        roundtrip(RespFrame::BulkString(Bytes::from_static(b"hello")));
        roundtrip(RespFrame::Null);
        roundtrip(RespFrame::NullArray);
        roundtrip(RespFrame::Array(vec![
            RespFrame::bulk(Bytes::from_static(b"GET")),
            RespFrame::bulk(Bytes::from_static(b"key")),
        ]));
    }

    #[test]
    fn incomplete_frame_waits_for_more_data() {
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert!(RespCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\r\n");
        let frame = RespCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, RespFrame::BulkString(Bytes::from_static(b"hello")));
    }

    #[test]
    fn command_builds_array_of_bulk_strings() {
        let cmd = RespFrame::command(
            "SET",
            vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")],
        );
        assert_eq!(
            cmd,
            RespFrame::Array(vec![
                RespFrame::bulk(Bytes::from_static(b"SET")),
                RespFrame::bulk(Bytes::from_static(b"k")),
                RespFrame::bulk(Bytes::from_static(b"v")),
            ])
        );
    }

    #[test]
    fn moved_and_ask_errors_are_recognized_as_errors() {
        let mut buf = BytesMut::from(&b"-MOVED 6000 127.0.0.1:7001\r\n"[..]);
        let frame = RespCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_error(), Some("MOVED 6000 127.0.0.1:7001"));
    }
}
