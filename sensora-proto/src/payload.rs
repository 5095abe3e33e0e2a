//! Cloud message payloads: `key=value` fields joined by `;`.
//!
//! A `;` inside a key or value is written as `\;`.

use std::fmt::{self, Write as _};

pub const PAYLOAD_SIZE: usize = 128;
pub const FIELD_SEPARATOR: u8 = b';';
pub const ESCAPE: u8 = b'\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload full, {available} bytes left")]
    Overflow { available: usize },
}

/// Bounded payload builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensoraPayload {
    buf: heapless::Vec<u8, PAYLOAD_SIZE>,
}

impl SensoraPayload {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
        }
    }

    /// Append `key=value`. A field that does not fit leaves the payload unchanged.
    pub fn add(&mut self, key: &str, value: impl fmt::Display) -> Result<(), PayloadError> {
        let overflow = PayloadError::Overflow {
            available: self.remaining(),
        };

        let mut text: heapless::String<PAYLOAD_SIZE> = heapless::String::new();
        write!(text, "{value}").map_err(|_| overflow)?;

        let mut field: heapless::Vec<u8, PAYLOAD_SIZE> = heapless::Vec::new();
        if !self.buf.is_empty() {
            field.push(FIELD_SEPARATOR).map_err(|_| overflow)?;
        }
        escape_into(&mut field, key.as_bytes()).map_err(|_| overflow)?;
        field.push(b'=').map_err(|_| overflow)?;
        escape_into(&mut field, text.as_bytes()).map_err(|_| overflow)?;

        self.buf.extend_from_slice(&field).map_err(|_| overflow)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        PAYLOAD_SIZE - self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl fmt::Display for SensoraPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.buf))
    }
}

fn escape_into(out: &mut heapless::Vec<u8, PAYLOAD_SIZE>, bytes: &[u8]) -> Result<(), u8> {
    for b in bytes {
        if *b == FIELD_SEPARATOR {
            out.push(ESCAPE)?;
        }
        out.push(*b)?;
    }
    Ok(())
}

/// Split on unescaped separators
fn split_fields(payload: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < payload.len() {
        match payload[i] {
            ESCAPE if payload.get(i + 1) == Some(&FIELD_SEPARATOR) => i += 2,
            FIELD_SEPARATOR => {
                fields.push(&payload[start..i]);
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    if start < payload.len() {
        fields.push(&payload[start..]);
    }
    fields
}

fn unescape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE && bytes.get(i + 1) == Some(&FIELD_SEPARATOR) {
            i += 1;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// All `(key, value)` pairs of a payload, unescaped
pub fn parse_fields(payload: &[u8]) -> Vec<(String, String)> {
    split_fields(payload)
        .into_iter()
        .filter_map(|field| {
            let eq = field.iter().position(|b| *b == b'=')?;
            Some((
                String::from_utf8_lossy(&unescape(&field[..eq])).into_owned(),
                String::from_utf8_lossy(&unescape(&field[eq + 1..])).into_owned(),
            ))
        })
        .collect()
}

/// Value of the first field named `key`
pub fn extract_field(payload: &[u8], key: &str) -> Option<String> {
    parse_fields(payload)
        .into_iter()
        .find_map(|(k, v)| (k == key).then_some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_joined_without_trailing_separator() {
        let mut p = SensoraPayload::new();
        p.add("status", 2).unwrap();
        p.add("fwver", "1.0.0").unwrap();
        assert_eq!(p.as_bytes(), b"status=2;fwver=1.0.0");
    }

    #[test]
    fn separator_is_escaped_and_recovered() {
        let mut p = SensoraPayload::new();
        p.add("id", "temp").unwrap();
        p.add("value", "a;b").unwrap();
        assert_eq!(p.as_bytes(), b"id=temp;value=a\\;b");
        assert_eq!(extract_field(p.as_bytes(), "value").as_deref(), Some("a;b"));
        assert_eq!(extract_field(p.as_bytes(), "id").as_deref(), Some("temp"));
    }

    #[test]
    fn overflow_leaves_payload_unchanged() {
        let mut p = SensoraPayload::new();
        p.add("k", "v".repeat(100)).unwrap();
        let before = p.clone();
        let err = p.add("long", "x".repeat(40)).unwrap_err();
        assert_eq!(err, PayloadError::Overflow { available: PAYLOAD_SIZE - 102 });
        assert_eq!(p, before);
        assert!(p.len() <= PAYLOAD_SIZE);
    }

    #[test]
    fn exact_fit() {
        let mut p = SensoraPayload::new();
        p.add("k", "v".repeat(PAYLOAD_SIZE - 2)).unwrap();
        assert_eq!(p.len(), PAYLOAD_SIZE);
        assert!(p.add("a", "b").is_err());
    }

    #[test]
    fn missing_key() {
        assert_eq!(extract_field(b"id=x;value=1", "name"), None);
        assert_eq!(extract_field(b"", "id"), None);
    }
}
