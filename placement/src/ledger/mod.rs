//! The persistent access ledger.
//!
//! Each file seen in the access stream maps to an [`AccessRecord`] for its
//! dataset. Every access adds one hit to the dataset's counter and pushes
//! the expiration of all of that dataset's records out to `now + time_frame`.
//! A sweep removes expired records and takes their hits back off the
//! counter, dropping the counter entirely once nothing contributes to it.
//! The result is an approximate, decaying measure of activity volume.
//!
//! The whole state sits behind one mutex owned by [`Ledger`]; every public
//! method is one atomic read-modify-write unit.

mod snapshot;

use crate::budget::{Reservation, RollingBudget};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::types::{DatasetId, FileId};
use crate::upstream::Catalog;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ahash::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use snapshot::SNAPSHOT_VERSION;

/// One file's contribution to its dataset's counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
  pub dataset: DatasetId,
  pub expires_at: DateTime<Utc>,
  /// Accesses folded into this record since it was created.
  pub hits: u64,
}

/// What happened to one access event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
  /// The file was already known; its dataset's counter grew by one.
  Refreshed { dataset: DatasetId, count: u64 },
  /// The file was new and resolved; its dataset's counter grew by one.
  Created { dataset: DatasetId, count: u64 },
  /// The file could not be resolved and was recorded as unresolved.
  Unresolved,
}

/// The outcome of resolving a file outside the ledger lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  Resolved(DatasetId),
  Unresolved,
}

/// Counts of what one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub expired_records: usize,
  pub released_hits: u64,
  pub removed_counters: usize,
  pub expired_unresolved: usize,
  pub expired_reservations: usize,
}

impl SweepReport {
  pub fn is_noop(&self) -> bool {
    *self == Self::default()
  }
}

/// Sizes of the ledger's tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
  pub records: usize,
  pub counters: usize,
  pub unresolved: usize,
  pub reservations: usize,
  pub do_not_move: usize,
}

#[derive(Debug, Default)]
struct DatasetActivity {
  count: u64,
  files: HashSet<FileId>,
}

#[derive(Debug, Default)]
pub(crate) struct LedgerState {
  files: HashMap<FileId, AccessRecord>,
  datasets: HashMap<DatasetId, DatasetActivity>,
  unresolved: HashMap<FileId, DateTime<Utc>>,
  budget: RollingBudget,
  do_not_move: BTreeSet<DatasetId>,
}

impl LedgerState {
  fn from_parts(
    records: Vec<(FileId, AccessRecord)>,
    unresolved: Vec<(FileId, DateTime<Utc>)>,
    reservations: Vec<Reservation>,
    do_not_move: Vec<DatasetId>,
  ) -> Self {
    let mut state = Self {
      budget: RollingBudget::from_reservations(reservations),
      do_not_move: do_not_move.into_iter().collect(),
      unresolved: unresolved.into_iter().collect(),
      ..Self::default()
    };
    // Counters are always derived from records, never trusted from disk.
    for (file, record) in records {
      let activity = state.datasets.entry(record.dataset.clone()).or_default();
      activity.count += record.hits;
      activity.files.insert(file.clone());
      state.files.insert(file, record);
    }
    state
  }

  /// Counts one access to a known file. Returns `None` if the file is unknown.
  fn refresh(&mut self, file: &FileId, expires_at: DateTime<Utc>) -> Option<(DatasetId, u64)> {
    let dataset = {
      let record = self.files.get_mut(file)?;
      record.hits += 1;
      record.dataset.clone()
    };
    let activity = self.datasets.entry(dataset.clone()).or_default();
    activity.count += 1;
    activity.files.insert(file.clone());
    for member in &activity.files {
      if let Some(record) = self.files.get_mut(member) {
        record.expires_at = expires_at;
      }
    }
    Some((dataset, activity.count))
  }

  fn create(&mut self, file: FileId, dataset: DatasetId, expires_at: DateTime<Utc>) -> u64 {
    self.unresolved.remove(&file);
    let activity = self.datasets.entry(dataset.clone()).or_default();
    activity.count += 1;
    activity.files.insert(file.clone());
    let count = activity.count;
    self.files.insert(
      file,
      AccessRecord {
        dataset,
        expires_at,
        hits: 1,
      },
    );
    count
  }

  fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    let expired: Vec<FileId> = self
      .files
      .iter()
      .filter(|(_, record)| record.expires_at < now)
      .map(|(file, _)| file.clone())
      .collect();

    for file in expired {
      let Some(record) = self.files.remove(&file) else {
        continue;
      };
      report.expired_records += 1;
      report.released_hits += record.hits;
      if let Some(activity) = self.datasets.get_mut(&record.dataset) {
        activity.count = activity.count.saturating_sub(record.hits);
        activity.files.remove(&file);
        if activity.count < 1 {
          self.datasets.remove(&record.dataset);
          report.removed_counters += 1;
        }
      }
    }

    let before = self.unresolved.len();
    self.unresolved.retain(|_, expires_at| *expires_at >= now);
    report.expired_unresolved = before - self.unresolved.len();

    report.expired_reservations = self.budget.expire(now);
    report
  }
}

/// The access ledger: counters, unresolved accesses, the do-not-move set
/// and continuous-mode reservations, persisted as one snapshot.
#[derive(Debug)]
pub struct Ledger {
  state: Mutex<LedgerState>,
  path: Option<PathBuf>,
  persist_lock: Mutex<()>,
  time_frame: chrono::Duration,
  unresolved_ttl: chrono::Duration,
}

impl Ledger {
  /// Opens the ledger stored at `config.path`, or starts an empty one if
  /// the file does not exist yet.
  pub fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
    let state = snapshot::load(&config.path)?;
    let ledger = Self::with_state(state, Some(config.path.clone()), config.time_frame, config.unresolved_ttl);
    let stats = ledger.stats();
    tracing::info!(
      path = ?config.path,
      records = stats.records,
      counters = stats.counters,
      "access ledger opened"
    );
    Ok(ledger)
  }

  /// A ledger that is never written to disk.
  pub fn in_memory(time_frame: Duration, unresolved_ttl: Duration) -> Self {
    Self::with_state(LedgerState::default(), None, time_frame, unresolved_ttl)
  }

  fn with_state(
    state: LedgerState,
    path: Option<PathBuf>,
    time_frame: Duration,
    unresolved_ttl: Duration,
  ) -> Self {
    Self {
      state: Mutex::new(state),
      path,
      persist_lock: Mutex::new(()),
      time_frame: to_chrono(time_frame),
      unresolved_ttl: to_chrono(unresolved_ttl),
    }
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Counts an access to `file` if it is already mapped to a dataset.
  pub fn touch(&self, file: &FileId, now: DateTime<Utc>) -> Option<Admission> {
    let expires_at = self.expiry(now, self.time_frame);
    let mut state = self.state.lock();
    state
      .refresh(file, expires_at)
      .map(|(dataset, count)| Admission::Refreshed { dataset, count })
  }

  /// Records an access to `file` given the outcome of resolving it.
  ///
  /// If another worker created the file's record while this one was
  /// resolving, the access is counted against that record instead.
  pub fn admit(&self, file: FileId, resolution: Resolution, now: DateTime<Utc>) -> Admission {
    let expires_at = self.expiry(now, self.time_frame);
    let mut state = self.state.lock();
    if let Some((dataset, count)) = state.refresh(&file, expires_at) {
      return Admission::Refreshed { dataset, count };
    }
    match resolution {
      Resolution::Resolved(dataset) => {
        let count = state.create(file, dataset.clone(), expires_at);
        Admission::Created { dataset, count }
      }
      Resolution::Unresolved => {
        let expires_at = self.expiry(now, self.unresolved_ttl);
        state.unresolved.insert(file, expires_at);
        Admission::Unresolved
      }
    }
  }

  /// The full per-event flow: refresh a known file, otherwise resolve it
  /// through the catalog (without holding the lock) and record the outcome.
  pub fn record_access(&self, file: FileId, catalog: &dyn Catalog, now: DateTime<Utc>) -> Admission {
    if let Some(admission) = self.touch(&file, now) {
      return admission;
    }
    let resolution = match catalog.resolve_dataset(&file) {
      Ok(Some(dataset)) => Resolution::Resolved(dataset),
      Ok(None) => Resolution::Unresolved,
      Err(err) => {
        tracing::debug!(%file, %err, "dataset resolution failed");
        Resolution::Unresolved
      }
    };
    self.admit(file, resolution, now)
  }

  /// Expires records, unresolved accesses and reservations older than `now`.
  pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
    let report = self.state.lock().sweep(now);
    tracing::debug!(?report, "ledger swept");
    report
  }

  /// The live counter of `dataset`, absent once nothing contributes to it.
  pub fn counter(&self, dataset: &DatasetId) -> Option<u64> {
    self.state.lock().datasets.get(dataset).map(|a| a.count)
  }

  /// A copy of every live counter, most active first.
  pub fn counters(&self) -> Vec<(DatasetId, u64)> {
    let mut counters: Vec<(DatasetId, u64)> = {
      let state = self.state.lock();
      state.datasets.iter().map(|(d, a)| (d.clone(), a.count)).collect()
    };
    counters.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counters
  }

  /// The record for `file`, if it is mapped to a dataset.
  pub fn record(&self, file: &FileId) -> Option<AccessRecord> {
    self.state.lock().files.get(file).cloned()
  }

  pub fn is_unresolved(&self, file: &FileId) -> bool {
    self.state.lock().unresolved.contains_key(file)
  }

  /// Adds `dataset` to the do-not-move set. Returns `false` if it was there.
  pub fn pin(&self, dataset: DatasetId) -> bool {
    self.state.lock().do_not_move.insert(dataset)
  }

  pub fn is_pinned(&self, dataset: &DatasetId) -> bool {
    self.state.lock().do_not_move.contains(dataset)
  }

  pub fn pinned(&self) -> BTreeSet<DatasetId> {
    self.state.lock().do_not_move.clone()
  }

  /// Units currently reserved by continuous placements.
  pub fn reserved(&self, now: DateTime<Utc>) -> f64 {
    self.state.lock().budget.reserved(now)
  }

  /// Commits a continuous placement: pins the dataset and reserves `units`
  /// for `ttl`. Refused if the dataset is already pinned or the reservation
  /// would push the rolling budget past `cap`.
  pub fn commit_placement(
    &self,
    dataset: &DatasetId,
    units: f64,
    cap: f64,
    now: DateTime<Utc>,
    ttl: Duration,
  ) -> bool {
    let mut state = self.state.lock();
    if state.do_not_move.contains(dataset) || !state.budget.fits(units, cap, now) {
      return false;
    }
    state.do_not_move.insert(dataset.clone());
    state.budget.reserve(dataset.clone(), units, now, ttl);
    true
  }

  pub fn stats(&self) -> LedgerStats {
    let state = self.state.lock();
    LedgerStats {
      records: state.files.len(),
      counters: state.datasets.len(),
      unresolved: state.unresolved.len(),
      reservations: state.budget.reservations().len(),
      do_not_move: state.do_not_move.len(),
    }
  }

  /// Writes the ledger to its snapshot file. A no-op for in-memory ledgers.
  pub fn persist(&self) -> Result<(), LedgerError> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    let _writer = self.persist_lock.lock();
    let snapshot = snapshot::LedgerSnapshot::capture(&self.state.lock());
    snapshot::write(path, &snapshot)?;
    tracing::debug!(?path, "ledger persisted");
    Ok(())
  }

  fn expiry(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
  }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
  chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
