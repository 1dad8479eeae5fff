//! Command assembly: coercing heterogeneous argument values into RESP bulk
//! strings and the per-command behaviour tables.

use bytes::Bytes;
use serde_json::Value as Json;

use crate::error::Error;

/// A value accepted as a command argument. Each variant coerces to exactly
/// one bulk string.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Raw bytes, passed through unchanged.
    Bytes(Bytes),
    /// Text, encoded as UTF-8.
    Str(String),
    /// Decimal ASCII.
    Int(i64),
    /// Shortest round-trip decimal.
    Float(f64),
    /// `true` / `false`.
    Bool(bool),
    /// Serialised as compact JSON, unless the command flattens mappings
    /// into alternating key/value arguments (see [`flattens_map`]).
    Json(Json),
}

impl Arg {
    fn into_part(self) -> Result<Bytes, Error> {
        Ok(match self {
            Arg::Bytes(b) => b,
            Arg::Str(s) => Bytes::from(s),
            Arg::Int(i) => Bytes::from(i.to_string()),
            Arg::Float(f) => Bytes::from(f.to_string()),
            Arg::Bool(b) => Bytes::from_static(if b { b"true" } else { b"false" }),
            Arg::Json(v) => Bytes::from(serde_json::to_vec(&v)?),
        })
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_owned())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v.into())
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Int(v.into())
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<Bytes> for Arg {
    fn from(v: Bytes) -> Self {
        Arg::Bytes(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Arg {
    fn from(v: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Json> for Arg {
    fn from(v: Json) -> Self {
        Arg::Json(v)
    }
}

/// One fully encoded command: the uppercased name used by the behaviour
/// tables plus the bulk-string parts as they go on the wire.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    parts: Vec<Bytes>,
}

impl Command {
    pub fn new<I>(name: &str, args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Arg>,
    {
        let name_upper = name.to_ascii_uppercase();
        let flatten = flattens_map(&name_upper);
        let mut parts = vec![Bytes::copy_from_slice(name.as_bytes())];
        for arg in args {
            match arg {
                Arg::Json(Json::Object(map)) if flatten => {
                    for (key, value) in map {
                        parts.push(Bytes::from(key));
                        parts.push(json_item(value).into_part()?);
                    }
                }
                arg => parts.push(arg.into_part()?),
            }
        }
        Ok(Self {
            name: name_upper,
            parts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn parts(&self) -> &[Bytes] {
        &self.parts
    }
}

/// Flattened mapping values coerce individually: scalars become their plain
/// text forms, nested containers stay JSON.
fn json_item(value: Json) -> Arg {
    match value {
        Json::String(s) => Arg::Str(s),
        Json::Bool(b) => Arg::Bool(b),
        Json::Number(n) => Arg::Str(n.to_string()),
        other => Arg::Json(other),
    }
}

/// Whether a command's reply carries user-visible output. Acknowledgement
/// replies (`+OK`, `+QUEUED`, subscription acks) are filtered out of batch
/// results. Commands not listed here default to "produces output".
pub(crate) fn produces_output(name_upper: &str) -> bool {
    !matches!(
        name_upper,
        "SET" | "MSET" | "SETEX" | "PSETEX" | "HMSET" | "LSET" | "LTRIM" | "RENAME"
            | "SELECT" | "AUTH" | "QUIT" | "FLUSHDB" | "FLUSHALL"
            | "MULTI" | "WATCH" | "UNWATCH" | "DISCARD"
            | "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE"
    )
}

/// Commands whose encoder flattens a mapping argument into alternating
/// key/value pairs instead of serialising it as one JSON argument.
pub(crate) fn flattens_map(name_upper: &str) -> bool {
    matches!(name_upper, "HSET" | "HMSET" | "MSET" | "MSETNX")
}

/// Commands replying with an alternating key/value bulk list that the client
/// folds into a mapping.
pub(crate) fn reply_is_map(name_upper: &str) -> bool {
    matches!(name_upper, "HGETALL")
}
