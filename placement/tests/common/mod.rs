#![allow(dead_code)]

use dynplace::config::{BatchConfig, ContinuousConfig, LedgerConfig, SitesConfig};
use dynplace::error::UpstreamError;
use dynplace::inventory::Inventory;
use dynplace::upstream::{
  Catalog, DeletionEvent, Notifier, PopularityStats, QuotaStore, ReplicaInfo, ReplicaQuery, TransferAck,
  TransferOptions,
};
use dynplace::{DatasetId, FileId, PlacementConfig, ScoringPolicy, SiteId};

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub const GROUP: &str = "AnalysisOps";

pub fn ts(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// A fixed "now" for batch cycles.
pub fn now() -> DateTime<Utc> {
  ts("2024-06-15T12:00:00Z")
}

pub fn sites(names: &[&str]) -> SitesConfig {
  SitesConfig::new(names.iter().map(|s| SiteId::from(*s)).collect())
}

pub fn batch_config(dir: &Path, sites: SitesConfig, policy: ScoringPolicy, daily_cap: f64) -> PlacementConfig {
  let mut config = PlacementConfig::new(LedgerConfig::new(dir.join("ledger.bin")), sites);
  let mut batch = BatchConfig::new(policy);
  batch.daily_cap = daily_cap;
  config.batch = Some(batch);
  config
}

pub fn continuous_config(dir: &Path, sites: SitesConfig, threshold: u64, destination: &str) -> PlacementConfig {
  let mut config = PlacementConfig::new(LedgerConfig::new(dir.join("ledger.bin")), sites);
  let mut continuous = ContinuousConfig::new(ScoringPolicy::AccessThreshold { threshold }, SiteId::from(destination));
  continuous.listen = "127.0.0.1:0".parse().unwrap();
  continuous.workers = 2;
  continuous.total_budget = 100.0;
  config.continuous = Some(continuous);
  config
}

/// An [`Inventory`] wrapper that can be told to fail specific calls.
#[derive(Debug, Default)]
pub struct FlakyCatalog {
  pub inner: Inventory,
  pub failing_transfers: Mutex<HashSet<SiteId>>,
  pub failing_replicas: Mutex<HashSet<DatasetId>>,
  pub failing_deletions: Mutex<HashSet<DatasetId>>,
  pub failing_resolution: Mutex<bool>,
  pub failing_stats: Mutex<bool>,
}

impl FlakyCatalog {
  pub fn new(inner: Inventory) -> Self {
    Self {
      inner,
      ..Self::default()
    }
  }

  pub fn fail_transfers_to(&self, site: &str) {
    self.failing_transfers.lock().insert(SiteId::from(site));
  }

  pub fn fail_replicas_of(&self, dataset: &str) {
    self.failing_replicas.lock().insert(DatasetId::from(dataset));
  }

  pub fn fail_deletions_of(&self, dataset: &str) {
    self.failing_deletions.lock().insert(DatasetId::from(dataset));
  }

  pub fn fail_statistics(&self) {
    *self.failing_stats.lock() = true;
  }

  pub fn fail_resolution(&self) {
    *self.failing_resolution.lock() = true;
  }
}

fn unavailable(what: &str) -> UpstreamError {
  UpstreamError::Unavailable(format!("{what} is down"))
}

impl Catalog for FlakyCatalog {
  fn resolve_dataset(&self, file: &FileId) -> Result<Option<DatasetId>, UpstreamError> {
    if *self.failing_resolution.lock() {
      return Err(unavailable("catalog"));
    }
    self.inner.resolve_dataset(file)
  }

  fn list_replicas(&self, query: &ReplicaQuery) -> Result<Vec<ReplicaInfo>, UpstreamError> {
    if let Some(dataset) = &query.dataset {
      if self.failing_replicas.lock().contains(dataset) {
        return Err(unavailable("replica service"));
      }
    }
    self.inner.list_replicas(query)
  }

  fn dataset_size(&self, dataset: &DatasetId) -> Result<Option<u64>, UpstreamError> {
    self.inner.dataset_size(dataset)
  }

  fn request_transfer(
    &self,
    site: &SiteId,
    datasets: &[DatasetId],
    options: &TransferOptions,
  ) -> Result<TransferAck, UpstreamError> {
    if self.failing_transfers.lock().contains(site) {
      return Err(unavailable("transfer service"));
    }
    self.inner.request_transfer(site, datasets, options)
  }

  fn list_deletions(
    &self,
    site: &SiteId,
    dataset: &DatasetId,
    since: DateTime<Utc>,
  ) -> Result<Vec<DeletionEvent>, UpstreamError> {
    if self.failing_deletions.lock().contains(dataset) {
      return Err(unavailable("deletion history"));
    }
    self.inner.list_deletions(site, dataset, since)
  }
}

impl PopularityStats for FlakyCatalog {
  fn access_counts_in_window(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<HashMap<DatasetId, u64>, UpstreamError> {
    if *self.failing_stats.lock() {
      return Err(unavailable("popularity service"));
    }
    self.inner.access_counts_in_window(start, end)
  }
}

impl QuotaStore for FlakyCatalog {
  fn quota(&self, site: &SiteId, group: &str) -> Result<Option<u64>, UpstreamError> {
    self.inner.quota(site, group)
  }
}

/// A notifier that keeps every message, optionally failing each send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  pub sent: Mutex<Vec<(String, String, Vec<String>)>>,
  pub fail: bool,
}

impl RecordingNotifier {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }
}

impl Notifier for RecordingNotifier {
  fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), UpstreamError> {
    self
      .sent
      .lock()
      .push((subject.to_string(), body.to_string(), recipients.to_vec()));
    if self.fail {
      return Err(unavailable("mail relay"));
    }
    Ok(())
  }
}
