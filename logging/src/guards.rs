use std::fmt;

use tracing_appender::non_blocking::WorkerGuard;

/// Keeps the background writer of every file appender running.
///
/// Dropping it flushes pending lines to disk and stops the writers.
#[must_use = "file appenders stop writing once their guards are dropped"]
#[derive(Default)]
pub struct FlushGuards(Vec<WorkerGuard>);

impl FlushGuards {
  pub(crate) fn push(&mut self, guard: WorkerGuard) {
    self.0.push(guard);
  }

  /// Number of file appenders being kept alive.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for FlushGuards {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("FlushGuards").field(&self.0.len()).finish()
  }
}
