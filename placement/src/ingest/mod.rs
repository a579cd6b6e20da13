//! The continuous-mode ingestion pipeline: a datagram [`receiver`] feeding a
//! bounded queue, drained by a pool of [`worker`]s into the ledger.

pub mod parser;
pub(crate) mod receiver;
pub(crate) mod worker;

use crate::types::FileId;

use chrono::{DateTime, Utc};

pub use parser::{parse_datagram, parse_fields};

/// One observed file access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
  pub file: FileId,
  pub received_at: DateTime<Utc>,
}

impl AccessEvent {
  pub fn new(file: impl Into<FileId>, received_at: DateTime<Utc>) -> Self {
    Self {
      file: file.into(),
      received_at,
    }
  }
}
