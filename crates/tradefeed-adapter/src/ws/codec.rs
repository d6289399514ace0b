/*
[INPUT]:  Raw inbound frames (JSON text or opaque binary blobs)
[OUTPUT]: Parsed serde_json::Value messages for dispatch
[POS]:    WebSocket layer - frame decoding with binary fallback chain
[UPDATE]: When the remote changes encodings or new frame formats appear
*/

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;

use super::connection::Frame;
use crate::error::{FeedError, Result};

pub(crate) const RAW_LOG_MAX_BYTES: usize = 1024;

/// Marker prefixed to binary frames that matched no known encoding
pub const BASE64_PREFIX: &str = "base64:";

/// How a binary frame was understood
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryPayload {
    /// Compact binary map encoding (MessagePack)
    MessagePack(Value),
    /// Valid UTF-8 text
    Text(String),
    /// Neither; wrapped as `base64:<...>`
    Base64(String),
}

/// Decode a binary frame: MessagePack first, then UTF-8, then base64.
///
/// The remote service switches encodings without notice, so each step is
/// tried in order and the last one never fails.
pub fn decode_binary(bytes: &[u8]) -> BinaryPayload {
    if let Some(value) = decode_msgpack(bytes) {
        return BinaryPayload::MessagePack(value);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => BinaryPayload::Text(text.to_string()),
        Err(_) => BinaryPayload::Base64(format!("{BASE64_PREFIX}{}", STANDARD.encode(bytes))),
    }
}

/// Decode one frame into the message handed to the protocol dispatcher.
pub fn decode_frame(frame: Frame) -> Result<Value> {
    match frame {
        Frame::Text(text) => parse_json(&text),
        Frame::Binary(bytes) => Ok(match decode_binary(&bytes) {
            BinaryPayload::MessagePack(value) => value,
            BinaryPayload::Text(text) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            BinaryPayload::Base64(wrapped) => Value::String(wrapped),
        }),
    }
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|err| {
        FeedError::Protocol(format!(
            "invalid JSON frame ({err}): {}",
            truncate_for_log(text, RAW_LOG_MAX_BYTES)
        ))
    })
}

fn decode_msgpack(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    let mut cursor = Cursor::new(bytes);
    let value: Value = rmp_serde::from_read(&mut cursor).ok()?;
    // Trailing bytes mean the frame was not a single MessagePack value.
    if cursor.position() as usize != bytes.len() {
        return None;
    }
    Some(value)
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
