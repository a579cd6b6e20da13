//! Capacity budgets.
//!
//! Batch cycles start from a fresh [`BudgetLedger`]: every reachable site's
//! remaining capacity, plus a global allowance capped per cycle. Continuous
//! placement instead keeps a [`RollingBudget`] of reservations that lapse
//! after a fixed time, standing in for transfers that are assumed complete.

use crate::config::SitesConfig;
use crate::types::{DatasetId, SiteId};
use crate::upstream::{Catalog, QuotaStore, ReplicaQuery};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remaining capacity of a site with `quota` and `used` units, if it clears
/// the minimum floor.
pub fn remaining_capacity(quota: u64, used: f64, config: &SitesConfig) -> Option<f64> {
  let remaining = (config.quota_fraction * quota as f64 - used).max(0.0);
  (remaining >= config.minimum_floor).then_some(remaining)
}

/// Per-site and global remaining capacity for one batch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetLedger {
  sites: BTreeMap<SiteId, f64>,
  global: f64,
}

impl BudgetLedger {
  /// Builds a ledger from already eligible site budgets. The global budget
  /// is the smaller of `cap` and the sum of the site budgets.
  pub fn from_sites(sites: impl IntoIterator<Item = (SiteId, f64)>, cap: f64) -> Self {
    let sites: BTreeMap<SiteId, f64> = sites.into_iter().collect();
    let total: f64 = sites.values().sum();
    Self {
      global: cap.min(total),
      sites,
    }
  }

  /// Computes this cycle's budgets from the quota store and the catalog's
  /// replica listing. Sites whose quota is absent, or whose quota or usage
  /// cannot be fetched, are left out for the cycle.
  pub fn refresh(
    config: &SitesConfig,
    cap: f64,
    quotas: &dyn QuotaStore,
    catalog: &dyn Catalog,
  ) -> Self {
    let mut sites = Vec::new();
    for site in config.eligible() {
      match site_budget(&site, config, quotas, catalog) {
        Some(remaining) => {
          tracing::debug!(%site, remaining, "site eligible");
          sites.push((site, remaining));
        }
        None => tracing::debug!(%site, "site ineligible this cycle"),
      }
    }
    let ledger = Self::from_sites(sites, cap);
    tracing::info!(
      sites = ledger.sites.len(),
      global = ledger.global,
      "budget ledger refreshed"
    );
    ledger
  }

  pub fn site_remaining(&self, site: &SiteId) -> Option<f64> {
    self.sites.get(site).copied()
  }

  pub fn global_remaining(&self) -> f64 {
    self.global
  }

  pub fn is_exhausted(&self) -> bool {
    self.global <= 0.0
  }

  pub fn sites(&self) -> impl Iterator<Item = &SiteId> {
    self.sites.keys()
  }

  /// Selection weights for a dataset of `size` units: every site that can
  /// still hold it, minus `holders`, weighted by remaining capacity.
  pub fn destination_weights(&self, size: f64, holders: &HashSet<SiteId>) -> HashMap<SiteId, f64> {
    self
      .sites
      .iter()
      .filter(|(site, remaining)| **remaining > 0.0 && **remaining >= size && !holders.contains(*site))
      .map(|(site, remaining)| (site.clone(), *remaining))
      .collect()
  }

  /// Deducts `size` from `site` and from the global budget.
  pub fn commit(&mut self, site: &SiteId, size: f64) {
    if let Some(remaining) = self.sites.get_mut(site) {
      *remaining -= size;
    }
    self.global -= size;
  }
}

fn site_budget(
  site: &SiteId,
  config: &SitesConfig,
  quotas: &dyn QuotaStore,
  catalog: &dyn Catalog,
) -> Option<f64> {
  let quota = match quotas.quota(site, &config.group) {
    Ok(Some(quota)) => quota,
    Ok(None) => return None,
    Err(err) => {
      tracing::warn!(%site, %err, "quota lookup failed");
      return None;
    }
  };
  let used = match catalog.list_replicas(&ReplicaQuery::site(site).in_group(config.group.clone())) {
    Ok(replicas) => replicas.iter().map(|r| r.units).sum::<f64>(),
    Err(err) => {
      tracing::warn!(%site, %err, "usage lookup failed");
      return None;
    }
  };
  remaining_capacity(quota, used, config)
}

/// Remaining capacity of a single site, as continuous placement checks it.
pub fn destination_capacity(
  site: &SiteId,
  config: &SitesConfig,
  quotas: &dyn QuotaStore,
  catalog: &dyn Catalog,
) -> Option<f64> {
  site_budget(site, config, quotas, catalog)
}

/// Capacity held by one committed continuous placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
  pub dataset: DatasetId,
  pub units: f64,
  pub expires_at: DateTime<Utc>,
}

/// Reservations against the continuous-mode global cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingBudget {
  reservations: Vec<Reservation>,
}

impl RollingBudget {
  pub fn new() -> Self {
    Self::default()
  }

  /// Units held by reservations that have not yet lapsed.
  pub fn reserved(&self, now: DateTime<Utc>) -> f64 {
    self
      .reservations
      .iter()
      .filter(|r| r.expires_at > now)
      .map(|r| r.units)
      .sum()
  }

  /// Whether `units` more can be reserved without exceeding `cap`.
  pub fn fits(&self, units: f64, cap: f64, now: DateTime<Utc>) -> bool {
    self.reserved(now) + units <= cap
  }

  pub fn reserve(&mut self, dataset: DatasetId, units: f64, now: DateTime<Utc>, ttl: Duration) {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    self.reservations.push(Reservation {
      dataset,
      units,
      expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
    });
  }

  /// Drops lapsed reservations and returns how many were released.
  pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
    let before = self.reservations.len();
    self.reservations.retain(|r| r.expires_at > now);
    before - self.reservations.len()
  }

  pub fn reservations(&self) -> &[Reservation] {
    &self.reservations
  }

  pub(crate) fn from_reservations(reservations: Vec<Reservation>) -> Self {
    Self { reservations }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sites_config() -> SitesConfig {
    SitesConfig::new(vec![SiteId::from("S1"), SiteId::from("S2")])
  }

  #[test]
  fn remaining_applies_fraction_and_floor() {
    let config = sites_config();
    // 0.95 * 100 - 50 = 45
    assert_eq!(remaining_capacity(100, 50.0, &config), Some(45.0));
    // 0.95 * 100 - 70 = 25 < 30
    assert_eq!(remaining_capacity(100, 70.0, &config), None);
    // Over quota clamps at zero and is below the floor.
    assert_eq!(remaining_capacity(100, 500.0, &config), None);
  }

  #[test]
  fn global_budget_is_capped() {
    let ledger = BudgetLedger::from_sites([(SiteId::from("S1"), 40.0), (SiteId::from("S2"), 60.0)], 10.0);
    assert_eq!(ledger.global_remaining(), 10.0);

    let ledger = BudgetLedger::from_sites([(SiteId::from("S1"), 40.0)], 1000.0);
    assert_eq!(ledger.global_remaining(), 40.0);
  }

  #[test]
  fn commit_depletes_site_and_global() {
    let s1 = SiteId::from("S1");
    let mut ledger = BudgetLedger::from_sites([(s1.clone(), 40.0)], 100.0);
    ledger.commit(&s1, 35.0);
    assert_eq!(ledger.site_remaining(&s1), Some(5.0));
    assert_eq!(ledger.global_remaining(), 5.0);
    assert!(!ledger.is_exhausted());
    ledger.commit(&s1, 5.0);
    assert!(ledger.is_exhausted());
  }

  #[test]
  fn destination_weights_skip_holders_and_small_sites() {
    let (s1, s2, s3) = (SiteId::from("S1"), SiteId::from("S2"), SiteId::from("S3"));
    let ledger = BudgetLedger::from_sites([(s1.clone(), 40.0), (s2.clone(), 80.0), (s3.clone(), 20.0)], 500.0);
    let holders: HashSet<SiteId> = [s2.clone()].into_iter().collect();
    let weights = ledger.destination_weights(35.0, &holders);
    assert_eq!(weights.len(), 1);
    assert_eq!(weights.get(&s1), Some(&40.0));
  }

  #[test]
  fn reservations_lapse() {
    let now = Utc::now();
    let mut budget = RollingBudget::new();
    budget.reserve(DatasetId::from("/a"), 30.0, now, Duration::from_secs(60));
    assert_eq!(budget.reserved(now), 30.0);
    assert!(budget.fits(10.0, 40.0, now));
    assert!(!budget.fits(11.0, 40.0, now));

    let later = now + chrono::Duration::seconds(61);
    assert_eq!(budget.reserved(later), 0.0);
    assert_eq!(budget.expire(later), 1);
    assert_eq!(budget.expire(later), 0);
  }
}
