//! The continuous-mode listener service and its builder.

use crate::config::PlacementConfig;
use crate::error::{Error, LedgerError, PlacementError};
use crate::ingest::receiver::Receiver;
use crate::ingest::worker::WorkerPool;
use crate::ingest::AccessEvent;
use crate::ledger::Ledger;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::planner::ContinuousPlanner;
use crate::task::janitor::{Janitor, JanitorContext};
use crate::upstream::{Catalog, QuotaStore};
use crate::Result;

use core::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fibre::mpmc;

pub use crate::task::janitor::TickReport;

/// A builder for [`ListenerService`].
pub struct ServiceBuilder {
  config: Arc<PlacementConfig>,
  catalog: Option<Arc<dyn Catalog>>,
  quotas: Option<Arc<dyn QuotaStore>>,
  ledger: Option<Arc<Ledger>>,
  listen: Option<SocketAddr>,
  janitor_interval: Option<Duration>,
}

impl fmt::Debug for ServiceBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceBuilder")
      .field("has_catalog", &self.catalog.is_some())
      .field("has_quota_store", &self.quotas.is_some())
      .field("has_ledger", &self.ledger.is_some())
      .field("listen", &self.listen)
      .field("janitor_interval", &self.janitor_interval)
      .finish_non_exhaustive()
  }
}

impl ServiceBuilder {
  pub fn new(config: Arc<PlacementConfig>) -> Self {
    Self {
      config,
      catalog: None,
      quotas: None,
      ledger: None,
      listen: None,
      janitor_interval: None,
    }
  }

  /// The catalog used to resolve files and place datasets. Required.
  pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
    self.catalog = Some(catalog);
    self
  }

  /// The quota store used to check destination capacity. Required.
  pub fn quota_store(mut self, quotas: Arc<dyn QuotaStore>) -> Self {
    self.quotas = Some(quotas);
    self
  }

  /// Uses an already opened ledger instead of opening `config.ledger.path`.
  pub fn ledger(mut self, ledger: Arc<Ledger>) -> Self {
    self.ledger = Some(ledger);
    self
  }

  /// Overrides `continuous.listen`.
  pub fn listen(mut self, addr: SocketAddr) -> Self {
    self.listen = Some(addr);
    self
  }

  /// Overrides `continuous.janitor_interval`.
  pub fn janitor_interval(mut self, interval: Duration) -> Self {
    self.janitor_interval = Some(interval);
    self
  }

  /// Opens the ledger, binds the socket and starts the receiver, the
  /// workers and the janitor.
  pub fn start(self) -> Result<ListenerService> {
    let continuous = self
      .config
      .continuous
      .as_ref()
      .ok_or(PlacementError::NotConfigured("continuous"))?;
    let catalog = self.catalog.ok_or(PlacementError::NotConfigured("catalog"))?;
    let quotas = self.quotas.ok_or(PlacementError::NotConfigured("quota store"))?;

    let ledger = match self.ledger {
      Some(ledger) => ledger,
      None => Arc::new(Ledger::open(&self.config.ledger)?),
    };
    for dataset in &self.config.do_not_move {
      ledger.pin(dataset.clone());
    }

    let metrics = Arc::new(Metrics::new());
    let planner = ContinuousPlanner::new(
      self.config.clone(),
      ledger.clone(),
      catalog.clone(),
      quotas,
      metrics.clone(),
    )?;

    let addr = self.listen.unwrap_or(continuous.listen);
    let socket = UdpSocket::bind(addr).map_err(Error::Bind)?;
    let local_addr = socket.local_addr().map_err(Error::Bind)?;

    let (sender, receiver): (mpmc::Sender<AccessEvent>, mpmc::Receiver<AccessEvent>) =
      mpmc::bounded(continuous.queue_capacity);

    let workers = WorkerPool::spawn(
      continuous.workers,
      receiver,
      ledger.clone(),
      catalog,
      metrics.clone(),
    )
    .map_err(Error::Spawn)?;

    let context = Arc::new(JanitorContext::new(ledger.clone(), planner, metrics.clone()));
    let interval = self.janitor_interval.unwrap_or(continuous.janitor_interval);
    let janitor = Janitor::spawn(context.clone(), interval).map_err(Error::Spawn)?;

    let receiver = Receiver::spawn(socket, sender, continuous.file_key.clone(), metrics.clone())
      .map_err(Error::Spawn)?;

    tracing::info!(
      %local_addr,
      workers = continuous.workers,
      queue_capacity = continuous.queue_capacity,
      ?interval,
      "listener service started"
    );

    Ok(ListenerService {
      local_addr,
      ledger,
      metrics,
      context,
      receiver: Some(receiver),
      workers: Some(workers),
      janitor: Some(janitor),
    })
  }
}

/// The running continuous-mode pipeline.
///
/// Dropping the service stops every task without a final persist; call
/// [`shutdown`](Self::shutdown) to persist as well.
pub struct ListenerService {
  local_addr: SocketAddr,
  ledger: Arc<Ledger>,
  metrics: Arc<Metrics>,
  context: Arc<JanitorContext>,
  receiver: Option<Receiver>,
  workers: Option<WorkerPool>,
  janitor: Option<Janitor>,
}

impl fmt::Debug for ListenerService {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerService")
      .field("local_addr", &self.local_addr)
      .field("running", &self.receiver.is_some())
      .finish_non_exhaustive()
  }
}

impl ListenerService {
  /// The address the datagram socket is bound to.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  pub fn ledger(&self) -> &Arc<Ledger> {
    &self.ledger
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Runs one janitor invocation now, as the periodic task would.
  pub fn run_janitor(&self, now: DateTime<Utc>) -> TickReport {
    self.context.tick(now)
  }

  fn stop_tasks(&mut self) {
    if let Some(receiver) = self.receiver.take() {
      receiver.stop();
    }
    // The receiver held the only sender; workers drain the queue and exit.
    if let Some(workers) = self.workers.take() {
      workers.join();
    }
    if let Some(janitor) = self.janitor.take() {
      janitor.stop();
    }
  }

  /// Stops receiving, drains queued events, stops the janitor and persists
  /// the ledger.
  pub fn shutdown(mut self) -> Result<(), LedgerError> {
    tracing::info!("listener service shutting down");
    self.stop_tasks();
    self.ledger.persist()?;
    tracing::info!(metrics = ?self.metrics.snapshot(), "listener service stopped");
    Ok(())
  }
}

impl Drop for ListenerService {
  fn drop(&mut self) {
    self.stop_tasks();
  }
}
