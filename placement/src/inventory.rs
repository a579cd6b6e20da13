//! A static, file-backed stand-in for the external services.
//!
//! [`Inventory`] answers every collaborator trait from data loaded once from
//! YAML (or built in code), and records the transfers requested from it.
//! It never changes its replica data in response to a transfer.

use crate::error::{ConfigError, UpstreamError};
use crate::types::{DatasetId, FileId, SiteId};
use crate::upstream::{
  Catalog, DeletionEvent, PopularityStats, QuotaStore, ReplicaInfo, ReplicaQuery, TransferAck,
  TransferOptions,
};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A batch of accesses to one dataset at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessSample {
  pub dataset: DatasetId,
  pub at: DateTime<Utc>,
  #[serde(default = "one")]
  pub count: u64,
}

fn one() -> u64 {
  1
}

/// The serialized form of an inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryData {
  /// File → owning dataset.
  #[serde(default)]
  pub files: BTreeMap<FileId, DatasetId>,
  /// Dataset → size in capacity units. Datasets absent here have an unknown size.
  #[serde(default)]
  pub sizes: BTreeMap<DatasetId, u64>,
  #[serde(default)]
  pub replicas: Vec<ReplicaInfo>,
  #[serde(default)]
  pub deletions: Vec<DeletionEvent>,
  /// Site → group → quota.
  #[serde(default)]
  pub quotas: BTreeMap<SiteId, BTreeMap<String, u64>>,
  #[serde(default)]
  pub accesses: Vec<AccessSample>,
}

/// A transfer request received by the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
  pub request_id: String,
  pub site: SiteId,
  pub datasets: Vec<DatasetId>,
  pub options: TransferOptions,
}

#[derive(Debug, Default)]
pub struct Inventory {
  data: InventoryData,
  transfers: Mutex<Vec<TransferRecord>>,
  next_request: AtomicU64,
}

impl Inventory {
  pub fn new(data: InventoryData) -> Self {
    Self {
      data,
      transfers: Mutex::new(Vec::new()),
      next_request: AtomicU64::new(1),
    }
  }

  pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
    let data: InventoryData = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(Self::new(data))
  }

  pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path)?;
    Self::from_yaml_str(&text)
  }

  pub fn data(&self) -> &InventoryData {
    &self.data
  }

  /// Every transfer requested so far, oldest first.
  pub fn transfers(&self) -> Vec<TransferRecord> {
    self.transfers.lock().clone()
  }

  // --- Builders ---

  pub fn with_file(mut self, file: impl Into<FileId>, dataset: impl Into<DatasetId>) -> Self {
    self.data.files.insert(file.into(), dataset.into());
    self
  }

  pub fn with_size(mut self, dataset: impl Into<DatasetId>, size: u64) -> Self {
    self.data.sizes.insert(dataset.into(), size);
    self
  }

  pub fn with_replica(
    mut self,
    dataset: impl Into<DatasetId>,
    site: impl Into<SiteId>,
    group: Option<&str>,
    units: f64,
  ) -> Self {
    self.data.replicas.push(ReplicaInfo {
      dataset: dataset.into(),
      site: site.into(),
      group: group.map(str::to_string),
      units,
    });
    self
  }

  pub fn with_quota(mut self, site: impl Into<SiteId>, group: &str, quota: u64) -> Self {
    self
      .data
      .quotas
      .entry(site.into())
      .or_default()
      .insert(group.to_string(), quota);
    self
  }

  pub fn with_deletion(
    mut self,
    dataset: impl Into<DatasetId>,
    site: impl Into<SiteId>,
    requested_at: DateTime<Utc>,
  ) -> Self {
    self.data.deletions.push(DeletionEvent {
      dataset: dataset.into(),
      site: site.into(),
      requested_at,
    });
    self
  }

  pub fn with_accesses(mut self, dataset: impl Into<DatasetId>, at: DateTime<Utc>, count: u64) -> Self {
    self.data.accesses.push(AccessSample {
      dataset: dataset.into(),
      at,
      count,
    });
    self
  }
}

impl Catalog for Inventory {
  fn resolve_dataset(&self, file: &FileId) -> Result<Option<DatasetId>, UpstreamError> {
    Ok(self.data.files.get(file).cloned())
  }

  fn list_replicas(&self, query: &ReplicaQuery) -> Result<Vec<ReplicaInfo>, UpstreamError> {
    Ok(
      self
        .data
        .replicas
        .iter()
        .filter(|r| query.dataset.as_ref().map_or(true, |d| *d == r.dataset))
        .filter(|r| query.site.as_ref().map_or(true, |s| *s == r.site))
        .filter(|r| query.group.as_ref().map_or(true, |g| r.group.as_ref() == Some(g)))
        .cloned()
        .collect(),
    )
  }

  fn dataset_size(&self, dataset: &DatasetId) -> Result<Option<u64>, UpstreamError> {
    Ok(self.data.sizes.get(dataset).copied())
  }

  fn request_transfer(
    &self,
    site: &SiteId,
    datasets: &[DatasetId],
    options: &TransferOptions,
  ) -> Result<TransferAck, UpstreamError> {
    let request_id = format!("static-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
    self.transfers.lock().push(TransferRecord {
      request_id: request_id.clone(),
      site: site.clone(),
      datasets: datasets.to_vec(),
      options: options.clone(),
    });
    Ok(TransferAck { request_id })
  }

  fn list_deletions(
    &self,
    site: &SiteId,
    dataset: &DatasetId,
    since: DateTime<Utc>,
  ) -> Result<Vec<DeletionEvent>, UpstreamError> {
    Ok(
      self
        .data
        .deletions
        .iter()
        .filter(|d| d.site == *site && d.dataset == *dataset && d.requested_at >= since)
        .cloned()
        .collect(),
    )
  }
}

impl PopularityStats for Inventory {
  fn access_counts_in_window(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<HashMap<DatasetId, u64>, UpstreamError> {
    let mut counts = HashMap::new();
    for sample in self.data.accesses.iter().filter(|s| s.at >= start && s.at < end) {
      *counts.entry(sample.dataset.clone()).or_insert(0) += sample.count;
    }
    Ok(counts)
  }
}

impl QuotaStore for Inventory {
  fn quota(&self, site: &SiteId, group: &str) -> Result<Option<u64>, UpstreamError> {
    Ok(self.data.quotas.get(site).and_then(|groups| groups.get(group)).copied())
  }
}
