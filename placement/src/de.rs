// Serde helpers for configuration values that are written for humans.

use serde::{de, Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// (De)serializes a `Duration` as a `humantime` string such as `"72h"`.
pub(crate) mod duration {
  use super::*;

  pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
  }

  pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
  }
}
