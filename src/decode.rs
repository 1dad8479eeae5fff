//! Output decoding applied to reply payloads after a successful round-trip.
//!
//! Only bulk payloads are rewritten; integers and simple strings pass
//! through untouched. All three modes keep the round trip lossless: a
//! payload that is not valid UTF-8 always stays raw bytes.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value as Json;

use crate::resp::Reply;

/// How bulk payloads are rewritten when a batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Leave payloads as raw bytes.
    #[default]
    None,
    /// Decode valid UTF-8 payloads to text.
    Str,
    /// Decode text, then parse JSON containers and strict numbers.
    Auto,
}

/// A decoded reply value as handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Nil,
    /// `false`: a watched key changed and `EXEC` discarded the transaction.
    /// `true`: the transaction ran and produced only quiet replies.
    Bool(bool),
    Int(i64),
    /// Simple-string reply (`+OK` and friends).
    Status(String),
    /// Server `-ERR` reply, embedded in-line so the rest of a pipelined
    /// batch stays readable.
    Error(String),
    Bytes(Bytes),
    Str(String),
    Json(Json),
    List(Vec<Output>),
    /// Folded hash reply. Keys decode lossily; values follow the mode.
    Map(HashMap<String, Output>),
}

impl Output {
    pub fn is_nil(&self) -> bool {
        matches!(self, Output::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Output::Str(s) | Output::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Output::Bytes(b) => Some(b),
            Output::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Output::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub(crate) fn decode_reply(reply: Reply, mode: DecodeMode) -> Output {
    match reply {
        Reply::Simple(s) => Output::Status(s),
        Reply::Error(e) => Output::Error(e),
        Reply::Int(i) => Output::Int(i),
        Reply::Bulk(None) | Reply::Array(None) => Output::Nil,
        Reply::Bulk(Some(data)) => decode_bulk(data, mode),
        Reply::Array(Some(items)) => Output::List(
            items
                .into_iter()
                .map(|item| decode_reply(item, mode))
                .collect(),
        ),
    }
}

/// Fold an alternating key/value bulk list (the `HGETALL` shape) into a
/// mapping.
pub(crate) fn fold_hash(items: Vec<Reply>, mode: DecodeMode) -> Output {
    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let key = match key {
            Reply::Bulk(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
            Reply::Simple(s) => s,
            Reply::Int(i) => i.to_string(),
            _ => continue,
        };
        map.insert(key, decode_reply(value, mode));
    }
    Output::Map(map)
}

fn decode_bulk(data: Bytes, mode: DecodeMode) -> Output {
    match mode {
        DecodeMode::None => Output::Bytes(data),
        DecodeMode::Str => match std::str::from_utf8(&data) {
            Ok(s) => Output::Str(s.to_owned()),
            Err(_) => Output::Bytes(data),
        },
        DecodeMode::Auto => match std::str::from_utf8(&data) {
            Ok(s) => classify_text(s),
            Err(_) => Output::Bytes(data),
        },
    }
}

/// JSON parsing is only attempted for containers and strict numbers, so a
/// payload like `"version 10"` never rounds through the JSON parser.
fn classify_text(s: &str) -> Output {
    let container = matches!(s.as_bytes().first(), Some(b'{' | b'['));
    if container || is_strict_number(s) {
        if let Ok(value) = serde_json::from_str(s) {
            return Output::Json(value);
        }
    }
    Output::Str(s.to_owned())
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?` over the whole input.
fn is_strict_number(s: &str) -> bool {
    let mut rest = s.as_bytes();
    if let Some(r) = rest.strip_prefix(b"-") {
        rest = r;
    }
    let int_len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if int_len == 0 || (rest[0] == b'0' && int_len > 1) {
        return false;
    }
    rest = &rest[int_len..];
    if let Some(r) = rest.strip_prefix(b".") {
        let frac_len = r.iter().take_while(|b| b.is_ascii_digit()).count();
        if frac_len == 0 {
            return false;
        }
        rest = &r[frac_len..];
    }
    if let Some(r) = rest
        .strip_prefix(b"e")
        .or_else(|| rest.strip_prefix(b"E"))
    {
        let r = r
            .strip_prefix(b"+")
            .or_else(|| r.strip_prefix(b"-"))
            .unwrap_or(r);
        let exp_len = r.iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_len == 0 {
            return false;
        }
        rest = &r[exp_len..];
    }
    rest.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bulk(data: &[u8]) -> Reply {
        Reply::Bulk(Some(Bytes::copy_from_slice(data)))
    }

    #[test]
    fn none_mode_keeps_raw_bytes() {
        assert_eq!(
            decode_reply(bulk(b"hello"), DecodeMode::None),
            Output::Bytes(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn str_mode_decodes_valid_utf8() {
        assert_eq!(
            decode_reply(bulk("héllo".as_bytes()), DecodeMode::Str),
            Output::Str("héllo".into())
        );
    }

    #[test]
    fn str_mode_keeps_invalid_utf8_as_bytes() {
        assert_eq!(
            decode_reply(bulk(b"\xff\x00\xff"), DecodeMode::Str),
            Output::Bytes(Bytes::from_static(b"\xff\x00\xff"))
        );
    }

    #[test]
    fn auto_mode_parses_json_containers() {
        assert_eq!(
            decode_reply(bulk(br#"{"foo":123,"bar":[1,2,3]}"#), DecodeMode::Auto),
            Output::Json(json!({"foo": 123, "bar": [1, 2, 3]}))
        );
        assert_eq!(
            decode_reply(bulk(b"[1,2]"), DecodeMode::Auto),
            Output::Json(json!([1, 2]))
        );
    }

    #[test]
    fn auto_mode_parses_strict_numbers() {
        assert_eq!(
            decode_reply(bulk(b"10"), DecodeMode::Auto),
            Output::Json(json!(10))
        );
        assert_eq!(
            decode_reply(bulk(b"1.23"), DecodeMode::Auto),
            Output::Json(json!(1.23))
        );
        assert_eq!(
            decode_reply(bulk(b"-4e2"), DecodeMode::Auto),
            Output::Json(json!(-4e2))
        );
    }

    #[test]
    fn auto_mode_leaves_plain_text_alone() {
        assert_eq!(
            decode_reply(bulk(b"text"), DecodeMode::Auto),
            Output::Str("text".into())
        );
        // Leading zeros and partial numbers are not strict numbers.
        assert_eq!(
            decode_reply(bulk(b"007"), DecodeMode::Auto),
            Output::Str("007".into())
        );
        assert_eq!(
            decode_reply(bulk(b"1."), DecodeMode::Auto),
            Output::Str("1.".into())
        );
        assert_eq!(
            decode_reply(bulk(b"10 apples"), DecodeMode::Auto),
            Output::Str("10 apples".into())
        );
    }

    #[test]
    fn auto_mode_keeps_invalid_utf8_as_bytes() {
        assert_eq!(
            decode_reply(bulk(b"\x80"), DecodeMode::Auto),
            Output::Bytes(Bytes::from_static(b"\x80"))
        );
    }

    #[test]
    fn malformed_json_container_falls_back_to_text() {
        assert_eq!(
            decode_reply(bulk(b"{not json"), DecodeMode::Auto),
            Output::Str("{not json".into())
        );
    }

    #[test]
    fn integers_and_statuses_are_never_rewritten() {
        assert_eq!(
            decode_reply(Reply::Int(7), DecodeMode::Auto),
            Output::Int(7)
        );
        assert_eq!(
            decode_reply(Reply::Simple("OK".into()), DecodeMode::Auto),
            Output::Status("OK".into())
        );
    }

    #[test]
    fn nil_bulk_and_nil_array_decode_to_nil() {
        assert_eq!(decode_reply(Reply::Bulk(None), DecodeMode::Auto), Output::Nil);
        assert_eq!(decode_reply(Reply::Array(None), DecodeMode::None), Output::Nil);
    }

    #[test]
    fn arrays_decode_recursively() {
        let reply = Reply::Array(Some(vec![bulk(b"10"), Reply::Int(3)]));
        assert_eq!(
            decode_reply(reply, DecodeMode::Auto),
            Output::List(vec![Output::Json(json!(10)), Output::Int(3)])
        );
    }

    #[test]
    fn hash_folding_follows_the_active_mode() {
        let items = vec![
            bulk(b"field1"),
            bulk(b"\xff\x00\xff"),
            bulk(b"field2"),
            bulk(b"text"),
            bulk(b"field3"),
            bulk(b"1.23"),
        ];

        let Output::Map(raw) = fold_hash(items.clone(), DecodeMode::None) else {
            panic!("expected a map");
        };
        assert_eq!(
            raw["field1"],
            Output::Bytes(Bytes::from_static(b"\xff\x00\xff"))
        );
        assert_eq!(raw["field2"], Output::Bytes(Bytes::from_static(b"text")));
        assert_eq!(raw["field3"], Output::Bytes(Bytes::from_static(b"1.23")));

        let Output::Map(auto) = fold_hash(items, DecodeMode::Auto) else {
            panic!("expected a map");
        };
        assert_eq!(
            auto["field1"],
            Output::Bytes(Bytes::from_static(b"\xff\x00\xff"))
        );
        assert_eq!(auto["field2"], Output::Str("text".into()));
        assert_eq!(auto["field3"], Output::Json(json!(1.23)));
    }

    #[test]
    fn hash_keys_decode_lossily() {
        let items = vec![bulk(b"\xffkey"), bulk(b"v")];
        let Output::Map(map) = fold_hash(items, DecodeMode::None) else {
            panic!("expected a map");
        };
        assert!(map.contains_key("\u{fffd}key"));
    }
}
