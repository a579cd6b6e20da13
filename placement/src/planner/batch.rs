//! The batch placement cycle.
//!
//! One cycle ranks the most popular datasets, draws them one at a time in
//! proportion to their score, and assigns each to a site drawn in
//! proportion to its remaining budget until the global budget runs out.
//! Each dataset gets at most one attempt per cycle.

use crate::budget::BudgetLedger;
use crate::config::{BatchConfig, PlacementConfig};
use crate::error::PlacementError;
use crate::ranking::{self, CandidateStats};
use crate::selector::{self, WeightedPool};
use crate::types::{DatasetId, SiteId};
use crate::upstream::{Catalog, Notifier, PopularityStats, QuotaStore, ReplicaQuery, TransferOptions};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

/// One committed (site, dataset) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
  pub site: SiteId,
  pub dataset: DatasetId,
  pub size: u64,
}

/// Why a drawn dataset was not placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
  UnknownSize,
  RecentlyDeleted,
  NoDestination,
}

/// The outcome of one transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
  pub site: SiteId,
  pub datasets: Vec<DatasetId>,
  /// The request id on success, the failure message otherwise.
  pub result: Result<String, String>,
}

/// Everything one cycle decided and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
  pub candidates: usize,
  pub admitted: usize,
  pub allocations: Vec<Allocation>,
  pub skipped: Vec<(DatasetId, SkipReason)>,
  /// Set when the final allocation exceeded the remaining global budget.
  pub overflowed: bool,
  pub transfers: Vec<TransferOutcome>,
  pub notified: bool,
  pub dry_run: bool,
}

impl CycleReport {
  pub fn total_units(&self) -> u64 {
    self.allocations.iter().map(|a| a.size).sum()
  }

  /// Allocations grouped by destination site.
  pub fn by_site(&self) -> BTreeMap<SiteId, Vec<&Allocation>> {
    let mut sites: BTreeMap<SiteId, Vec<&Allocation>> = BTreeMap::new();
    for allocation in &self.allocations {
      sites.entry(allocation.site.clone()).or_default().push(allocation);
    }
    sites
  }
}

/// Runs batch cycles against the configured collaborators.
pub struct BatchPlanner {
  config: Arc<PlacementConfig>,
  catalog: Arc<dyn Catalog>,
  stats: Arc<dyn PopularityStats>,
  quotas: Arc<dyn QuotaStore>,
  notifier: Arc<dyn Notifier>,
  do_not_move: BTreeSet<DatasetId>,
}

impl std::fmt::Debug for BatchPlanner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BatchPlanner")
      .field("do_not_move", &self.do_not_move)
      .finish_non_exhaustive()
  }
}

impl BatchPlanner {
  /// Fails with [`PlacementError::NotConfigured`] if the configuration has
  /// no `batch` section.
  pub fn new(
    config: Arc<PlacementConfig>,
    catalog: Arc<dyn Catalog>,
    stats: Arc<dyn PopularityStats>,
    quotas: Arc<dyn QuotaStore>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self, PlacementError> {
    if config.batch.is_none() {
      return Err(PlacementError::NotConfigured("batch"));
    }
    let do_not_move = config.do_not_move.iter().cloned().collect();
    Ok(Self {
      config,
      catalog,
      stats,
      quotas,
      notifier,
      do_not_move,
    })
  }

  /// Adds datasets that must not be placed, such as the ledger's pinned set.
  pub fn with_do_not_move(mut self, datasets: impl IntoIterator<Item = DatasetId>) -> Self {
    self.do_not_move.extend(datasets);
    self
  }

  fn batch(&self) -> Result<&BatchConfig, PlacementError> {
    self.config.batch.as_ref().ok_or(PlacementError::NotConfigured("batch"))
  }

  /// Runs one full cycle: rank, allocate, request transfers, notify.
  ///
  /// Only a failure to fetch popularity statistics aborts the cycle.
  pub fn run_cycle<R: Rng>(&self, now: DateTime<Utc>, rng: &mut R) -> Result<CycleReport, PlacementError> {
    let batch = self.batch()?;
    let candidates = ranking::gather_candidates(
      batch,
      &self.config.sites,
      self.stats.as_ref(),
      self.catalog.as_ref(),
      now,
    )
    .map_err(PlacementError::Statistics)?;

    let mut budget = BudgetLedger::refresh(
      &self.config.sites,
      batch.daily_cap,
      self.quotas.as_ref(),
      self.catalog.as_ref(),
    );

    let mut report = self.allocate(&candidates, &mut budget, now, rng)?;
    report.dry_run = batch.dry_run;

    if !batch.dry_run {
      report.transfers = self.request_transfers(&report);
    }
    report.notified = self.notify(&report, now);

    tracing::info!(
      candidates = report.candidates,
      admitted = report.admitted,
      allocations = report.allocations.len(),
      units = report.total_units(),
      overflowed = report.overflowed,
      dry_run = report.dry_run,
      "batch cycle complete"
    );
    Ok(report)
  }

  /// The allocation loop over already gathered candidates and a fresh budget.
  pub fn allocate<R: Rng>(
    &self,
    candidates: &[CandidateStats],
    budget: &mut BudgetLedger,
    now: DateTime<Utc>,
    rng: &mut R,
  ) -> Result<CycleReport, PlacementError> {
    let batch = self.batch()?;
    let eligible: Vec<&CandidateStats> = candidates
      .iter()
      .filter(|c| !self.do_not_move.contains(&c.dataset))
      .collect();

    let mut pool: WeightedPool<DatasetId> = batch.policy.rank(eligible.iter().copied()).into_iter().collect();
    let sizes: HashMap<&DatasetId, Option<u64>> = candidates.iter().map(|c| (&c.dataset, c.size)).collect();

    let mut report = CycleReport {
      candidates: candidates.len(),
      admitted: pool.len(),
      ..CycleReport::default()
    };
    let since = now - chrono::Duration::from_std(batch.deletion_window).unwrap_or(chrono::Duration::days(30));

    while !budget.is_exhausted() {
      let Some(dataset) = pool.draw(rng) else {
        break;
      };

      let Some(size) = sizes.get(&dataset).copied().flatten() else {
        tracing::debug!(%dataset, "size unknown; skipping");
        report.skipped.push((dataset, SkipReason::UnknownSize));
        continue;
      };

      let sites: Vec<SiteId> = budget.sites().cloned().collect();
      if self.recently_deleted(&dataset, &sites, since) {
        tracing::debug!(%dataset, "recently deleted; skipping");
        report.skipped.push((dataset, SkipReason::RecentlyDeleted));
        continue;
      }

      let holders = self.holders(&dataset, &sites);
      let weights = budget.destination_weights(size as f64, &holders);
      let Some(site) = selector::choose(&weights, rng).cloned() else {
        tracing::debug!(%dataset, size, "no site can take dataset; skipping");
        report.skipped.push((dataset, SkipReason::NoDestination));
        continue;
      };

      let overflow = size as f64 > budget.global_remaining();
      budget.commit(&site, size as f64);
      tracing::info!(%site, %dataset, size, overflow, "allocation committed");
      report.allocations.push(Allocation { site, dataset, size });

      if overflow {
        report.overflowed = true;
        break;
      }
    }
    Ok(report)
  }

  /// A deletion at any eligible site within the window, or a failed lookup,
  /// rules the dataset out.
  fn recently_deleted(&self, dataset: &DatasetId, sites: &[SiteId], since: DateTime<Utc>) -> bool {
    sites.iter().any(|site| match self.catalog.list_deletions(site, dataset, since) {
      Ok(deletions) => !deletions.is_empty(),
      Err(err) => {
        tracing::debug!(%site, %dataset, %err, "deletion lookup failed; assuming deleted");
        true
      }
    })
  }

  /// Sites already holding the dataset. A failed check counts as holding.
  fn holders(&self, dataset: &DatasetId, sites: &[SiteId]) -> HashSet<SiteId> {
    sites
      .iter()
      .filter(|site| match self.catalog.list_replicas(&ReplicaQuery::dataset(dataset).at(site)) {
        Ok(replicas) => !replicas.is_empty(),
        Err(err) => {
          tracing::debug!(%site, %dataset, %err, "replica check failed; assuming present");
          true
        }
      })
      .cloned()
      .collect()
  }

  fn request_transfers(&self, report: &CycleReport) -> Vec<TransferOutcome> {
    let Ok(batch) = self.batch() else {
      return Vec::new();
    };
    let options = TransferOptions {
      group: self.config.sites.group.clone(),
      request_only: batch.transfer.request_only,
      comments: batch.transfer.comments.clone(),
    };

    let mut outcomes = Vec::new();
    for (site, allocations) in report.by_site() {
      let datasets: Vec<DatasetId> = allocations.iter().map(|a| a.dataset.clone()).collect();
      let result = match self.catalog.request_transfer(&site, &datasets, &options) {
        Ok(ack) => {
          tracing::info!(%site, request = %ack.request_id, datasets = datasets.len(), "transfer requested");
          Ok(ack.request_id)
        }
        Err(err) => {
          tracing::warn!(%site, %err, "transfer request failed; skipping site");
          Err(err.to_string())
        }
      };
      outcomes.push(TransferOutcome { site, datasets, result });
    }
    outcomes
  }

  fn notify(&self, report: &CycleReport, now: DateTime<Utc>) -> bool {
    let Ok(batch) = self.batch() else {
      return false;
    };
    let subject = summary_subject(report, &batch.notify.subject, now);
    let body = summary_body(report);
    match self.notifier.send(&subject, &body, &batch.notify.recipients) {
      Ok(()) => true,
      Err(err) => {
        tracing::warn!(%err, "summary notification failed");
        false
      }
    }
  }
}

/// `"<dd/mm/YYYY> | <total> units | <subject>"`
pub fn summary_subject(report: &CycleReport, subject: &str, now: DateTime<Utc>) -> String {
  format!("{} | {} units | {}", now.format("%d/%m/%Y"), report.total_units(), subject)
}

/// One line per allocation under a `Site  Size  Dataset` header, or a
/// single line saying nothing was allocated.
pub fn summary_body(report: &CycleReport) -> String {
  if report.allocations.is_empty() {
    let mut body = String::from("No transfers this cycle.\n");
    if report.dry_run {
      body.push_str("\n(dry run: no transfers were requested)\n");
    }
    return body;
  }

  let width = report
    .allocations
    .iter()
    .map(|a| a.site.as_str().len())
    .max()
    .unwrap_or(0)
    .max("Site".len());

  let mut body = format!("{:<width$}  {:>10}  Dataset\n", "Site", "Size");
  for (site, allocations) in report.by_site() {
    for allocation in allocations {
      let _ = writeln!(body, "{:<width$}  {:>10}  {}", site.as_str(), allocation.size, allocation.dataset);
    }
  }
  if report.dry_run {
    body.push_str("\n(dry run: no transfers were requested)\n");
  }
  body
}
