use crate::ledger::{Ledger, SweepReport};
use crate::metrics::Metrics;
use crate::planner::{ContinuousPlanner, Decision};
use crate::types::DatasetId;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fibre::mpmc;
use fibre::RecvErrorTimeout;
use parking_lot::Mutex;

/// The parts of the service the janitor works on.
pub(crate) struct JanitorContext {
  ledger: Arc<Ledger>,
  planner: ContinuousPlanner,
  metrics: Arc<Metrics>,
  // Held for a whole tick so periodic and on-demand ticks never overlap.
  running: Mutex<()>,
}

/// What one janitor invocation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
  pub sweep: SweepReport,
  pub decisions: Vec<(DatasetId, Decision)>,
  pub persisted: bool,
}

impl JanitorContext {
  pub(crate) fn new(ledger: Arc<Ledger>, planner: ContinuousPlanner, metrics: Arc<Metrics>) -> Self {
    Self {
      ledger,
      planner,
      metrics,
      running: Mutex::new(()),
    }
  }

  /// Sweep, then decide, then persist.
  pub(crate) fn tick(&self, now: DateTime<Utc>) -> TickReport {
    let _running = self.running.lock();
    let sweep = self.ledger.sweep(now);
    Metrics::incr(&self.metrics.sweeps);
    Metrics::add(&self.metrics.records_expired, sweep.expired_records as u64);

    let decisions = self.planner.decide(now);

    let persisted = match self.ledger.persist() {
      Ok(()) => true,
      Err(err) => {
        Metrics::incr(&self.metrics.persist_failures);
        tracing::warn!(%err, "ledger persist failed");
        false
      }
    };

    tracing::info!(
      expired = sweep.expired_records,
      removed_counters = sweep.removed_counters,
      decisions = decisions.len(),
      "janitor tick"
    );
    TickReport {
      sweep,
      decisions,
      persisted,
    }
  }
}

/// The periodic sweeper. Waits on a shutdown channel between ticks, so
/// stopping it does not wait out the interval.
pub(crate) struct Janitor {
  handle: JoinHandle<()>,
  shutdown: mpmc::Sender<()>,
}

impl Janitor {
  pub(crate) fn spawn(context: Arc<JanitorContext>, interval: Duration) -> std::io::Result<Self> {
    let (shutdown, wake) = mpmc::bounded::<()>(1);

    let handle = thread::Builder::new()
      .name("dynplace-janitor".to_string())
      .spawn(move || loop {
        match wake.recv_timeout(interval) {
          Err(RecvErrorTimeout::Timeout) => {
            context.tick(Utc::now());
          }
          _ => break,
        }
      })?;

    Ok(Self { handle, shutdown })
  }

  /// Stops the janitor, letting a tick in progress finish.
  pub(crate) fn stop(self) {
    drop(self.shutdown);
    if self.handle.join().is_err() {
      tracing::error!("janitor thread panicked");
    }
  }
}
