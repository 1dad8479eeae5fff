//! RESP2 wire codec: command encoding and an incremental reply parser.
//!
//! Requests are always arrays of bulk strings. Replies are one of five frame
//! kinds, dispatched on the first byte: `+` simple string, `-` error, `:`
//! integer, `$` bulk string, `*` array. Bulk strings and arrays use `-1` as
//! their length to encode nil.

use bytes::{Bytes, BytesMut};
use memchr::memchr;

use crate::error::{protocol, Error};

/// Server-side default cap on a single bulk payload.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// One parsed RESP reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Int(i64),
    /// Bulk string; `None` is the RESP nil bulk (`$-1`).
    Bulk(Option<Bytes>),
    /// Array; `None` is the RESP nil array (`*-1`).
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Append one command frame (`*N` followed by N bulk strings) to `buf`.
pub(crate) fn write_command(buf: &mut BytesMut, parts: &[Bytes]) {
    buf.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for p in parts {
        buf.extend_from_slice(format!("${}\r\n", p.len()).as_bytes());
        buf.extend_from_slice(p);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Try to parse one complete frame from the front of `buf`.
///
/// On success the frame's bytes are consumed. A partial frame consumes
/// nothing and returns `Ok(None)` so the caller can read more from the
/// socket and retry. Malformed framing is fatal to the stream.
pub(crate) fn parse(buf: &mut BytesMut) -> Result<Option<Reply>, Error> {
    let mut pos = 0;
    match parse_at(buf, &mut pos)? {
        Some(reply) => {
            let _ = buf.split_to(pos);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: &mut usize) -> Result<Option<Reply>, Error> {
    let Some(line) = take_line(buf, pos)? else {
        return Ok(None);
    };
    let (&marker, body) = line
        .split_first()
        .ok_or_else(|| protocol("empty frame line"))?;

    match marker {
        b'+' => Ok(Some(Reply::Simple(
            String::from_utf8_lossy(body).into_owned(),
        ))),
        b'-' => Ok(Some(Reply::Error(
            String::from_utf8_lossy(body).into_owned(),
        ))),
        b':' => Ok(Some(Reply::Int(parse_int(body)?))),
        b'$' => {
            let len = parse_int(body)?;
            if len == -1 {
                return Ok(Some(Reply::Bulk(None)));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(protocol(format!("bulk length {len} out of bounds")));
            }
            let len = len as usize;
            if buf.len() - *pos < len + 2 {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                return Err(protocol("bulk payload is not CRLF-terminated"));
            }
            *pos += len + 2;
            Ok(Some(Reply::Bulk(Some(data))))
        }
        b'*' => {
            let count = parse_int(body)?;
            if count == -1 {
                return Ok(Some(Reply::Array(None)));
            }
            if count < -1 {
                return Err(protocol(format!("array count {count} out of bounds")));
            }
            let count = count as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                match parse_at(buf, pos)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Reply::Array(Some(items))))
        }
        other => Err(protocol(format!(
            "unknown frame marker {:?}",
            other as char
        ))),
    }
}

/// Take one CRLF-terminated line starting at `pos`, advancing past it.
/// Returns `None` while the terminator has not arrived yet.
fn take_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a [u8]>, Error> {
    let rest = &buf[*pos..];
    match memchr(b'\n', rest) {
        Some(idx) => {
            if idx == 0 || rest[idx - 1] != b'\r' {
                return Err(protocol("line terminator is not CRLF"));
            }
            *pos += idx + 1;
            Ok(Some(&rest[..idx - 1]))
        }
        None => Ok(None),
    }
}

fn parse_int(body: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}
