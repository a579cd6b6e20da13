use super::AccessEvent;
use crate::ledger::{Admission, Ledger};
use crate::metrics::Metrics;
use crate::upstream::Catalog;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpmc;

/// The fixed-size pool applying queued events to the ledger.
///
/// Each worker exits once the queue is empty and every sender is gone.
pub(crate) struct WorkerPool {
  handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  pub(crate) fn spawn(
    workers: usize,
    queue: mpmc::Receiver<AccessEvent>,
    ledger: Arc<Ledger>,
    catalog: Arc<dyn Catalog>,
    metrics: Arc<Metrics>,
  ) -> std::io::Result<Self> {
    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers.max(1) {
      let queue = queue.clone();
      let ledger = ledger.clone();
      let catalog = catalog.clone();
      let metrics = metrics.clone();
      let handle = thread::Builder::new()
        .name(format!("dynplace-worker-{index}"))
        .spawn(move || {
          while let Ok(event) = queue.recv() {
            process(&event, &ledger, catalog.as_ref(), &metrics);
          }
          tracing::debug!(worker = index, "worker drained");
        })?;
      handles.push(handle);
    }
    Ok(Self { handles })
  }

  /// Waits for every worker to drain the queue and exit.
  pub(crate) fn join(self) {
    for handle in self.handles {
      if handle.join().is_err() {
        tracing::error!("worker thread panicked");
      }
    }
  }
}

/// Applies one event. Never fails: an event is counted or dropped.
pub(crate) fn process(event: &AccessEvent, ledger: &Ledger, catalog: &dyn Catalog, metrics: &Metrics) {
  let admission = ledger.record_access(event.file.clone(), catalog, event.received_at);
  match admission {
    Admission::Created { ref dataset, count } => {
      Metrics::incr(&metrics.records_created);
      tracing::debug!(file = %event.file, %dataset, count, "new access record");
    }
    Admission::Refreshed { ref dataset, count } => {
      tracing::trace!(file = %event.file, %dataset, count, "access counted");
    }
    Admission::Unresolved => {
      Metrics::incr(&metrics.unresolved);
      tracing::debug!(file = %event.file, "access to unresolved file");
    }
  }
  // Last, so a processed event's other counters are already visible.
  Metrics::incr(&metrics.events_processed);
}
