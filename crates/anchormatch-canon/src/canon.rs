//! Canonical serializer.
//!
//! Walks a `serde_json::Value` tree rather than hooking the `Serializer`
//! trait directly, so one code path canonicalizes `MatchRecord`,
//! `BatchManifest`, or any future `Serialize` type — generalized from the
//! single-struct `compute_batch_hash` walk in the prior-generation
//! ingress crate's batch sealer.
//!
//! Key ordering is byte-wise lexicographic at every object level, numbers
//! are emitted without a redundant decimal point or trailing zeros, and
//! any string that round-trips as RFC3339 is renormalized to millisecond
//! precision with a trailing `Z` — this keeps canonicalization
//! independent of whatever timestamp format the caller's JSON library
//! happened to produce.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CanonError;

/// Canonicalize any `Serialize` value into deterministic bytes.
///
/// # Errors
/// Returns `CanonError::Serialize` if `value` cannot be turned into a
/// `serde_json::Value`, or `CanonError::NotFinite` if it contains a NaN
/// or infinite number.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let tree = serde_json::to_value(value).map_err(|e| CanonError::Serialize(e.to_string()))?;
    let mut buf = Vec::new();
    write_value(&mut buf, &tree)?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), CanonError> {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => buf.extend_from_slice(format_number(n)?.as_bytes()),
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item)?;
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            buf.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, &map[key.as_str()])?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn format_number(n: &serde_json::Number) -> Result<String, CanonError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    let f = n.as_f64().ok_or(CanonError::NotFinite)?;
    if !f.is_finite() {
        return Err(CanonError::NotFinite);
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return Ok((f as i64).to_string());
    }
    Ok(f.to_string())
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let normalized = renormalize_if_timestamp(s);
    buf.push(b'"');
    for c in normalized.chars() {
        match c {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                buf.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
    buf.push(b'"');
}

/// If `s` parses as an RFC3339 timestamp, re-render it at millisecond
/// precision with a trailing `Z`. Anything else passes
/// through unchanged.
fn renormalize_if_timestamp(s: &str) -> std::borrow::Cow<'_, str> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => std::borrow::Cow::Owned(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        Err(_) => std::borrow::Cow::Borrowed(s),
    }
}
