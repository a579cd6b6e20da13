use super::{AccessRecord, LedgerState};
use crate::budget::Reservation;
use crate::error::LedgerError;
use crate::types::{DatasetId, FileId};

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written at the head of every ledger snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The on-disk form of the ledger. Counters are not stored; they are
/// rebuilt from the records on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LedgerSnapshot {
  version: u32,
  records: Vec<(FileId, AccessRecord)>,
  unresolved: Vec<(FileId, DateTime<Utc>)>,
  reservations: Vec<Reservation>,
  do_not_move: Vec<DatasetId>,
}

impl LedgerSnapshot {
  pub(crate) fn capture(state: &LedgerState) -> Self {
    Self {
      version: SNAPSHOT_VERSION,
      records: state.files.iter().map(|(f, r)| (f.clone(), r.clone())).collect(),
      unresolved: state.unresolved.iter().map(|(f, t)| (f.clone(), *t)).collect(),
      reservations: state.budget.reservations().to_vec(),
      do_not_move: state.do_not_move.iter().cloned().collect(),
    }
  }

  fn into_state(self) -> LedgerState {
    LedgerState::from_parts(self.records, self.unresolved, self.reservations, self.do_not_move)
  }
}

/// Loads the ledger at `path`. A missing file is an empty ledger; a file
/// that exists but cannot be decoded is an error.
pub(crate) fn load(path: &Path) -> Result<LedgerState, LedgerError> {
  let file = match File::open(path) {
    Ok(file) => file,
    Err(err) if err.kind() == ErrorKind::NotFound => {
      tracing::info!(?path, "no ledger snapshot found; starting empty");
      return Ok(LedgerState::default());
    }
    Err(err) => return Err(err.into()),
  };

  let snapshot: LedgerSnapshot =
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| LedgerError::Unreadable {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;

  if snapshot.version != SNAPSHOT_VERSION {
    return Err(LedgerError::Unreadable {
      path: path.to_path_buf(),
      reason: format!("unsupported snapshot version {}", snapshot.version),
    });
  }
  Ok(snapshot.into_state())
}

/// Writes `snapshot` next to `path` and renames it into place, so a crash
/// mid-write leaves the previous snapshot intact.
pub(crate) fn write(path: &Path, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent)?;
  }
  let tmp = temp_path(path);
  {
    let mut writer = BufWriter::new(File::create(&tmp)?);
    bincode::serialize_into(&mut writer, snapshot).map_err(|e| LedgerError::Encode(e.to_string()))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
  }
  fs::rename(&tmp, path)?;
  Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}
