//! The continuous-mode decision, run by the janitor after each sweep.

use crate::budget;
use crate::config::{ContinuousConfig, PlacementConfig};
use crate::error::PlacementError;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::ranking::{self, CandidateStats, ScoringPolicy};
use crate::types::DatasetId;
use crate::upstream::{Catalog, QuotaStore, ReplicaQuery, TransferOptions};

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// What the decision did with one dataset that passed the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
  /// Pinned, reserved and handed to the transfer service. The transfer
  /// request itself may still have failed; nothing is rolled back.
  Placed { size: u64, transfer_requested: bool },
  AlreadyPinned,
  AlreadyHeld,
  UnknownSize,
  OverBudget,
  InsufficientCapacity,
}

/// Places datasets whose live counter passes the configured policy onto
/// the single configured destination.
pub struct ContinuousPlanner {
  config: Arc<PlacementConfig>,
  ledger: Arc<Ledger>,
  catalog: Arc<dyn Catalog>,
  quotas: Arc<dyn QuotaStore>,
  metrics: Arc<Metrics>,
}

impl ContinuousPlanner {
  pub fn new(
    config: Arc<PlacementConfig>,
    ledger: Arc<Ledger>,
    catalog: Arc<dyn Catalog>,
    quotas: Arc<dyn QuotaStore>,
    metrics: Arc<Metrics>,
  ) -> Result<Self, PlacementError> {
    if config.continuous.is_none() {
      return Err(PlacementError::NotConfigured("continuous"));
    }
    Ok(Self {
      config,
      ledger,
      catalog,
      quotas,
      metrics,
    })
  }

  fn continuous(&self) -> Option<&ContinuousConfig> {
    self.config.continuous.as_ref()
  }

  /// Evaluates every live counter. Counters are copied out first; no
  /// collaborator is called while the ledger is locked.
  pub fn decide(&self, now: DateTime<Utc>) -> Vec<(DatasetId, Decision)> {
    let Some(config) = self.continuous() else {
      return Vec::new();
    };
    let mut decisions = Vec::new();
    for (dataset, count) in self.ledger.counters() {
      let stats = self.live_stats(&config.policy, dataset.clone(), count);
      if config.policy.evaluate(&stats).is_none() {
        continue;
      }
      let decision = self.place(config, &dataset, now);
      tracing::info!(%dataset, count, ?decision, "continuous placement decision");
      decisions.push((dataset, decision));
    }
    decisions
  }

  /// The popularity score needs the real size and replica count; the
  /// access threshold only looks at the counter.
  fn live_stats(&self, policy: &ScoringPolicy, dataset: DatasetId, count: u64) -> CandidateStats {
    let mut stats = CandidateStats::live(dataset, count);
    if let ScoringPolicy::PopularityScore { .. } = policy {
      stats.size = ranking::dataset_size(self.catalog.as_ref(), &stats.dataset);
      stats.replicas = ranking::replica_count(self.catalog.as_ref(), &stats.dataset);
    }
    stats
  }

  fn place(&self, config: &ContinuousConfig, dataset: &DatasetId, now: DateTime<Utc>) -> Decision {
    if self.ledger.is_pinned(dataset) {
      return Decision::AlreadyPinned;
    }
    let Some(size) = ranking::dataset_size(self.catalog.as_ref(), dataset) else {
      return Decision::UnknownSize;
    };
    let units = size as f64;
    if self.ledger.reserved(now) + units > config.total_budget {
      return Decision::OverBudget;
    }

    let destination = &config.destination;
    match self.catalog.list_replicas(&ReplicaQuery::dataset(dataset).at(destination)) {
      Ok(replicas) if replicas.is_empty() => {}
      Ok(_) => return Decision::AlreadyHeld,
      Err(err) => {
        tracing::debug!(%dataset, %err, "replica check failed; assuming present");
        return Decision::AlreadyHeld;
      }
    }

    let capacity = budget::destination_capacity(
      destination,
      &self.config.sites,
      self.quotas.as_ref(),
      self.catalog.as_ref(),
    );
    if capacity.map_or(true, |remaining| remaining < units) {
      return Decision::InsufficientCapacity;
    }

    // Re-checked under the ledger lock; another decision may have won.
    if !self
      .ledger
      .commit_placement(dataset, units, config.total_budget, now, config.reservation_ttl)
    {
      return if self.ledger.is_pinned(dataset) {
        Decision::AlreadyPinned
      } else {
        Decision::OverBudget
      };
    }
    Metrics::incr(&self.metrics.placements);

    let options = TransferOptions {
      group: self.config.sites.group.clone(),
      request_only: config.transfer.request_only,
      comments: config.transfer.comments.clone(),
    };
    let transfer_requested = match self
      .catalog
      .request_transfer(destination, std::slice::from_ref(dataset), &options)
    {
      Ok(ack) => {
        tracing::info!(site = %destination, %dataset, request = %ack.request_id, "transfer requested");
        true
      }
      Err(err) => {
        Metrics::incr(&self.metrics.transfer_failures);
        tracing::warn!(site = %destination, %dataset, %err, "transfer request failed");
        false
      }
    };
    Decision::Placed { size, transfer_requested }
  }
}
