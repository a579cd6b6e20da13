//! Desirability scoring for candidate datasets.
//!
//! Two decision strategies exist side by side: the batch popularity score,
//! which rewards high or rising access rates and penalises size and replica
//! redundancy, and the plain access threshold used by continuous placement.
//! Both are reached through [`ScoringPolicy::evaluate`], and neither mode
//! picks one implicitly.

use crate::config::{BatchConfig, SitesConfig};
use crate::error::UpstreamError;
use crate::types::{DatasetId, SiteId};
use crate::upstream::{Catalog, PopularityStats, ReplicaQuery};

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Replica count assumed when the catalog cannot be asked.
pub const UNKNOWN_REPLICA_COUNT: u32 = 100;

/// Size assumed for scoring when the catalog cannot report one. Datasets
/// scored with it are still skipped at allocation time.
pub const UNKNOWN_SIZE_PENALTY: u64 = 1000;

/// The filter applied to popularity scores before selection.
///
/// The score and the raw access count have historically both been compared
/// against the same constant; which one is meant has to be configured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
  /// Keep candidates whose computed score is at least this value.
  Score(f64),
  /// Keep candidates whose recent access count is at least this value.
  AccessCount(u64),
}

/// A named decision strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
  /// `log10(recent) * max(2*recent - prior, 1) / (size * replicas²)`,
  /// filtered by `cutoff`.
  PopularityScore { cutoff: Cutoff },
  /// Admit once the access count reaches `threshold`; the weight is the
  /// access count itself.
  AccessThreshold { threshold: u64 },
}

/// Everything known about one candidate at decision time.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateStats {
  pub dataset: DatasetId,
  /// Accesses over the most recent window (or the live counter).
  pub recent: u64,
  /// Accesses over the preceding window, if known.
  pub prior: Option<u64>,
  pub replicas: u32,
  /// Size in capacity units, `None` when unknown.
  pub size: Option<u64>,
}

impl CandidateStats {
  /// Stats built from a live counter only, as continuous mode sees them.
  pub fn live(dataset: DatasetId, count: u64) -> Self {
    Self {
      dataset,
      recent: count,
      prior: None,
      replicas: 1,
      size: None,
    }
  }
}

impl ScoringPolicy {
  /// Returns the positive selection weight of an admitted candidate, or
  /// `None` if the policy filters it out.
  pub fn evaluate(&self, stats: &CandidateStats) -> Option<f64> {
    match *self {
      ScoringPolicy::PopularityScore { cutoff } => {
        let score = popularity_score(
          stats.recent,
          stats.prior.unwrap_or(stats.recent),
          stats.replicas,
          stats.size.unwrap_or(UNKNOWN_SIZE_PENALTY),
        );
        let passes = match cutoff {
          Cutoff::Score(min) => score >= min,
          Cutoff::AccessCount(min) => stats.recent >= min,
        };
        (passes && score.is_finite() && score > 0.0).then_some(score)
      }
      ScoringPolicy::AccessThreshold { threshold } => {
        (stats.recent > 0 && stats.recent >= threshold).then_some(stats.recent as f64)
      }
    }
  }

  /// Evaluates every candidate and keeps the admitted ones with their weight.
  pub fn rank<'a>(
    &self,
    candidates: impl IntoIterator<Item = &'a CandidateStats>,
  ) -> Vec<(DatasetId, f64)> {
    candidates
      .into_iter()
      .filter_map(|stats| {
        let weight = self.evaluate(stats);
        tracing::debug!(dataset = %stats.dataset, recent = stats.recent, ?weight, "ranked candidate");
        weight.map(|w| (stats.dataset.clone(), w))
      })
      .collect()
  }
}

/// The batch desirability score.
///
/// A size or replica count of zero is treated as one.
pub fn popularity_score(recent: u64, prior: u64, replicas: u32, size: u64) -> f64 {
  if recent == 0 {
    return 0.0;
  }
  let trend = (2 * recent as i128 - prior as i128).max(1) as f64;
  let replicas = replicas.max(1) as f64;
  let size = size.max(1) as f64;
  (recent as f64).log10() * trend / (size * replicas * replicas)
}

/// Gathers batch-mode candidates: the most accessed datasets of the last
/// window, with their prior-window count, replica count and size.
///
/// Failing to fetch popularity statistics is the only fatal outcome; every
/// catalog failure degrades to a worst-case value for that dataset.
pub fn gather_candidates(
  config: &BatchConfig,
  sites: &SitesConfig,
  stats: &dyn PopularityStats,
  catalog: &dyn Catalog,
  now: DateTime<Utc>,
) -> Result<Vec<CandidateStats>, UpstreamError> {
  let window = chrono_window(config.window);
  let recent = stats.access_counts_in_window(now - window, now)?;
  let prior = stats.access_counts_in_window(now - window - window, now - window)?;

  let include = config.include_pattern.as_deref().and_then(compile_pattern);
  let exclude = config.exclude_pattern.as_deref().and_then(compile_pattern);

  let mut popular: Vec<(DatasetId, u64)> = recent
    .into_iter()
    .filter(|(dataset, _)| include.as_ref().map_or(true, |re| re.is_match(dataset.as_str())))
    .filter(|(dataset, _)| !exclude.as_ref().map_or(false, |re| re.is_match(dataset.as_str())))
    .collect();
  popular.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

  let mut shortlisted = Vec::with_capacity(config.max_candidates.min(popular.len()));
  for (dataset, count) in popular {
    if shortlisted.len() == config.max_candidates {
      break;
    }
    // Only datasets already managed by our group are considered.
    match catalog.list_replicas(&ReplicaQuery::dataset(&dataset).in_group(sites.group.clone())) {
      Ok(replicas) if !replicas.is_empty() => shortlisted.push((dataset, count)),
      Ok(_) => continue,
      Err(err) => {
        tracing::debug!(%dataset, %err, "group replica lookup failed; dropping candidate");
        continue;
      }
    }
  }

  let describe = |(dataset, count): (DatasetId, u64)| CandidateStats {
    prior: prior.get(&dataset).copied(),
    replicas: replica_count(catalog, &dataset),
    size: dataset_size(catalog, &dataset),
    recent: count,
    dataset,
  };

  #[cfg(feature = "bulk")]
  let candidates = {
    use rayon::iter::{IntoParallelIterator, ParallelIterator};
    shortlisted.into_par_iter().map(describe).collect()
  };
  #[cfg(not(feature = "bulk"))]
  let candidates = shortlisted.into_iter().map(describe).collect();

  Ok(candidates)
}

/// Number of distinct sites holding the dataset, with the worst case on failure.
pub fn replica_count(catalog: &dyn Catalog, dataset: &DatasetId) -> u32 {
  match catalog.list_replicas(&ReplicaQuery::dataset(dataset)) {
    Ok(replicas) => {
      let sites: HashSet<&SiteId> = replicas.iter().map(|r| &r.site).collect();
      sites.len() as u32
    }
    Err(err) => {
      tracing::debug!(%dataset, %err, "replica lookup failed; assuming worst case");
      UNKNOWN_REPLICA_COUNT
    }
  }
}

/// The dataset's size, or `None` when unknown or unavailable.
pub fn dataset_size(catalog: &dyn Catalog, dataset: &DatasetId) -> Option<u64> {
  match catalog.dataset_size(dataset) {
    Ok(size) => size,
    Err(err) => {
      tracing::debug!(%dataset, %err, "size lookup failed; treating size as unknown");
      None
    }
  }
}

fn chrono_window(window: Duration) -> chrono::Duration {
  chrono::Duration::from_std(window).unwrap_or(chrono::Duration::days(1))
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
  match Regex::new(pattern) {
    Ok(re) => Some(re),
    Err(err) => {
      tracing::warn!(%pattern, %err, "ignoring invalid dataset pattern");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stats(name: &str, recent: u64, prior: Option<u64>, replicas: u32, size: Option<u64>) -> CandidateStats {
    CandidateStats {
      dataset: DatasetId::from(name),
      recent,
      prior,
      replicas,
      size,
    }
  }

  #[test]
  fn score_matches_formula() {
    // log10(1000) = 3; trend = 2*1000 - 500 = 1500; size*replicas² = 2 * 9.
    let score = popularity_score(1000, 500, 3, 2);
    assert!((score - 3.0 * 1500.0 / 18.0).abs() < 1e-9);
  }

  #[test]
  fn declining_access_is_floored_at_one() {
    let score = popularity_score(100, 1_000, 1, 1);
    assert!((score - 2.0).abs() < 1e-9);
  }

  #[test]
  fn missing_prior_defaults_to_recent() {
    let policy = ScoringPolicy::PopularityScore { cutoff: Cutoff::Score(0.0) };
    let with_default = policy.evaluate(&stats("/a/b/AOD", 1000, None, 1, Some(1))).unwrap();
    let explicit = policy.evaluate(&stats("/a/b/AOD", 1000, Some(1000), 1, Some(1))).unwrap();
    assert_eq!(with_default, explicit);
  }

  #[test]
  fn score_cutoff_filters_low_scores() {
    let policy = ScoringPolicy::PopularityScore { cutoff: Cutoff::Score(200.0) };
    // 3 * 1000 / 1 = 3000 passes, 1 * 10 / 1 = ~20 fails.
    assert!(policy.evaluate(&stats("/x/y/AOD", 1000, None, 1, Some(1))).is_some());
    assert!(policy.evaluate(&stats("/x/z/AOD", 10, None, 1, Some(1))).is_none());
  }

  #[test]
  fn access_count_cutoff_ignores_score() {
    let policy = ScoringPolicy::PopularityScore { cutoff: Cutoff::AccessCount(200) };
    // Huge and replicated everywhere: tiny score, but enough accesses.
    let weight = policy.evaluate(&stats("/x/y/AOD", 250, None, 50, Some(900)));
    assert!(weight.map_or(false, |w| w > 0.0));
    assert!(policy.evaluate(&stats("/x/z/AOD", 150, None, 1, Some(1))).is_none());
  }

  #[test]
  fn single_access_has_zero_score_and_is_dropped() {
    let policy = ScoringPolicy::PopularityScore { cutoff: Cutoff::AccessCount(0) };
    assert!(policy.evaluate(&stats("/x/y/AOD", 1, None, 1, Some(1))).is_none());
  }

  #[test]
  fn access_threshold_weights_by_count() {
    let policy = ScoringPolicy::AccessThreshold { threshold: 200 };
    assert_eq!(policy.evaluate(&CandidateStats::live("/d".into(), 250)), Some(250.0));
    assert_eq!(policy.evaluate(&CandidateStats::live("/d".into(), 199)), None);
  }

  #[test]
  fn policies_deserialize_from_named_yaml() {
    let policy: ScoringPolicy = serde_yaml::from_str("popularity_score:\n  cutoff:\n    score: 200\n").unwrap();
    assert_eq!(policy, ScoringPolicy::PopularityScore { cutoff: Cutoff::Score(200.0) });

    let policy: ScoringPolicy = serde_yaml::from_str("access_threshold:\n  threshold: 200\n").unwrap();
    assert_eq!(policy, ScoringPolicy::AccessThreshold { threshold: 200 });
  }
}
