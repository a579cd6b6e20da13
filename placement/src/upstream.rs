//! Traits for the external collaborators the placement core talks to.
//!
//! None of these services are implemented here beyond the static
//! [`Inventory`](crate::inventory::Inventory). Every call may fail
//! transiently; callers convert failures into worst-case sentinels and never
//! retry within the same cycle.

use crate::error::UpstreamError;
use crate::types::{DatasetId, FileId, SiteId};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filters for a replica listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaQuery {
  pub dataset: Option<DatasetId>,
  pub site: Option<SiteId>,
  pub group: Option<String>,
}

impl ReplicaQuery {
  pub fn dataset(dataset: &DatasetId) -> Self {
    Self {
      dataset: Some(dataset.clone()),
      ..Self::default()
    }
  }

  pub fn site(site: &SiteId) -> Self {
    Self {
      site: Some(site.clone()),
      ..Self::default()
    }
  }

  pub fn at(mut self, site: &SiteId) -> Self {
    self.site = Some(site.clone());
    self
  }

  pub fn in_group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }
}

/// One dataset replica at one site, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaInfo {
  pub dataset: DatasetId,
  pub site: SiteId,
  #[serde(default)]
  pub group: Option<String>,
  /// Capacity units the replica occupies, or will occupy once complete if
  /// it is subscribed but still transferring.
  pub units: f64,
}

/// A recorded deletion of a dataset from a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionEvent {
  pub dataset: DatasetId,
  pub site: SiteId,
  pub requested_at: DateTime<Utc>,
}

/// Options attached to a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
  pub group: String,
  /// Ask for approval rather than an immediate subscription.
  pub request_only: bool,
  pub comments: String,
}

/// Acknowledgement of an accepted transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAck {
  pub request_id: String,
}

/// The catalog and transfer service.
pub trait Catalog: Send + Sync {
  /// Resolves the dataset that owns `file`. `Ok(None)` means the catalog
  /// does not know the file.
  fn resolve_dataset(&self, file: &FileId) -> Result<Option<DatasetId>, UpstreamError>;

  fn list_replicas(&self, query: &ReplicaQuery) -> Result<Vec<ReplicaInfo>, UpstreamError>;

  /// Total size of the dataset in capacity units. `Ok(None)` means the
  /// size is unknown.
  fn dataset_size(&self, dataset: &DatasetId) -> Result<Option<u64>, UpstreamError>;

  fn request_transfer(
    &self,
    site: &SiteId,
    datasets: &[DatasetId],
    options: &TransferOptions,
  ) -> Result<TransferAck, UpstreamError>;

  fn list_deletions(
    &self,
    site: &SiteId,
    dataset: &DatasetId,
    since: DateTime<Utc>,
  ) -> Result<Vec<DeletionEvent>, UpstreamError>;
}

/// The popularity-statistics service.
pub trait PopularityStats: Send + Sync {
  /// Access counts per dataset for accesses in `[start, end)`.
  fn access_counts_in_window(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<HashMap<DatasetId, u64>, UpstreamError>;
}

/// The site quota store.
pub trait QuotaStore: Send + Sync {
  /// The quota of `group` at `site` in capacity units, `Ok(None)` if absent.
  fn quota(&self, site: &SiteId, group: &str) -> Result<Option<u64>, UpstreamError>;
}

/// The notification channel. Fire-and-forget.
pub trait Notifier: Send + Sync {
  fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), UpstreamError>;
}

/// A notifier that writes summaries to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), UpstreamError> {
    tracing::info!(target: "dynplace::notify", %subject, recipients = ?recipients, "\n{body}");
    Ok(())
  }
}
