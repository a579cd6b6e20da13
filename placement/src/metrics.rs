use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// Lock-free counters for the continuous pipeline and the planners.
#[derive(Debug)]
pub struct Metrics {
  // --- Ingestion ---
  pub(crate) datagrams_received: CachePadded<AtomicU64>,
  pub(crate) parse_errors: CachePadded<AtomicU64>,
  pub(crate) queue_full_drops: CachePadded<AtomicU64>,

  // --- Ledger ---
  pub(crate) events_processed: CachePadded<AtomicU64>,
  pub(crate) records_created: CachePadded<AtomicU64>,
  pub(crate) unresolved: CachePadded<AtomicU64>,
  pub(crate) sweeps: CachePadded<AtomicU64>,
  pub(crate) records_expired: CachePadded<AtomicU64>,
  pub(crate) persist_failures: CachePadded<AtomicU64>,

  // --- Placement ---
  pub(crate) placements: CachePadded<AtomicU64>,
  pub(crate) transfer_failures: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      datagrams_received: CachePadded::new(AtomicU64::new(0)),
      parse_errors: CachePadded::new(AtomicU64::new(0)),
      queue_full_drops: CachePadded::new(AtomicU64::new(0)),
      events_processed: CachePadded::new(AtomicU64::new(0)),
      records_created: CachePadded::new(AtomicU64::new(0)),
      unresolved: CachePadded::new(AtomicU64::new(0)),
      sweeps: CachePadded::new(AtomicU64::new(0)),
      records_expired: CachePadded::new(AtomicU64::new(0)),
      persist_failures: CachePadded::new(AtomicU64::new(0)),
      placements: CachePadded::new(AtomicU64::new(0)),
      transfer_failures: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
  }

  /// A point-in-time copy of every counter.
  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
      parse_errors: self.parse_errors.load(Ordering::Relaxed),
      queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
      events_processed: self.events_processed.load(Ordering::Relaxed),
      records_created: self.records_created.load(Ordering::Relaxed),
      unresolved: self.unresolved.load(Ordering::Relaxed),
      sweeps: self.sweeps.load(Ordering::Relaxed),
      records_expired: self.records_expired.load(Ordering::Relaxed),
      persist_failures: self.persist_failures.load(Ordering::Relaxed),
      placements: self.placements.load(Ordering::Relaxed),
      transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time snapshot of the pipeline's metrics.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// Datagrams read from the socket.
  pub datagrams_received: u64,
  /// Datagrams without a usable file key.
  pub parse_errors: u64,
  /// Events dropped because the queue was full.
  pub queue_full_drops: u64,
  /// Events applied to the ledger.
  pub events_processed: u64,
  /// New access records.
  pub records_created: u64,
  /// Events whose file could not be resolved.
  pub unresolved: u64,
  pub sweeps: u64,
  /// Records removed by sweeps.
  pub records_expired: u64,
  pub persist_failures: u64,
  /// Datasets committed for placement.
  pub placements: u64,
  pub transfer_failures: u64,
  pub uptime_secs: u64,
}

impl MetricsSnapshot {
  /// Events that reached the ledger or were dropped on the way.
  pub fn events_accounted(&self) -> u64 {
    self.events_processed + self.queue_full_drops + self.parse_errors
  }
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("datagrams_received", &self.datagrams_received)
      .field("parse_errors", &self.parse_errors)
      .field("queue_full_drops", &self.queue_full_drops)
      .field("events_processed", &self.events_processed)
      .field("records_created", &self.records_created)
      .field("unresolved", &self.unresolved)
      .field("sweeps", &self.sweeps)
      .field("records_expired", &self.records_expired)
      .field("persist_failures", &self.persist_failures)
      .field("placements", &self.placements)
      .field("transfer_failures", &self.transfer_failures)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
