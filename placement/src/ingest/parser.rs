//! Decoding of access datagrams.
//!
//! A datagram is newline-separated `key=value` text. Lines without `=` or
//! with an empty value are dropped; the first `=` splits key from value.

use super::AccessEvent;
use crate::error::ParseError;
use crate::types::FileId;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Every well-formed `key=value` line of `payload`. Later keys win.
pub fn parse_fields(payload: &[u8]) -> HashMap<String, String> {
  let text = String::from_utf8_lossy(payload);
  let mut fields = HashMap::new();
  for line in text.lines() {
    let Some((key, value)) = line.trim().split_once('=') else {
      continue;
    };
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
      continue;
    }
    fields.insert(key.to_string(), value.to_string());
  }
  fields
}

/// Turns one datagram into an access event for the file named by `file_key`.
pub fn parse_datagram(
  payload: &[u8],
  file_key: &str,
  received_at: DateTime<Utc>,
) -> Result<AccessEvent, ParseError> {
  let mut fields = parse_fields(payload);
  if fields.is_empty() {
    return Err(ParseError::Empty);
  }
  let file = fields
    .remove(file_key)
    .ok_or_else(|| ParseError::MissingKey(file_key.to_string()))?;
  Ok(AccessEvent {
    file: FileId::new(file),
    received_at,
  })
}
