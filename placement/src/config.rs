//! The process-wide configuration, loaded once and shared read-only.

use crate::de;
use crate::error::ConfigError;
use crate::ranking::ScoringPolicy;
use crate::types::{DatasetId, SiteId};

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementConfig {
  pub ledger: LedgerConfig,
  pub sites: SitesConfig,
  /// Required for batch mode.
  #[serde(default)]
  pub batch: Option<BatchConfig>,
  /// Required for continuous mode.
  #[serde(default)]
  pub continuous: Option<ContinuousConfig>,
  /// Datasets that must never be placed.
  #[serde(default)]
  pub do_not_move: Vec<DatasetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
  /// Snapshot file of the access ledger.
  pub path: PathBuf,
  /// How long one access keeps contributing to its dataset's counter.
  #[serde(default = "default_time_frame", with = "de::duration")]
  pub time_frame: Duration,
  /// How long an access to an unresolvable file is remembered.
  #[serde(default = "default_time_frame", with = "de::duration")]
  pub unresolved_ttl: Duration,
}

impl LedgerConfig {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      time_frame: default_time_frame(),
      unresolved_ttl: default_time_frame(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitesConfig {
  /// Sites considered as destinations.
  #[serde(default)]
  pub candidates: Vec<SiteId>,
  /// Sites removed from `candidates`.
  #[serde(default)]
  pub exclude: Vec<SiteId>,
  /// The accounting group for quotas and replicas.
  #[serde(default = "default_group")]
  pub group: String,
  /// Fraction of the quota that may be filled.
  #[serde(default = "default_quota_fraction")]
  pub quota_fraction: f64,
  /// Sites with less remaining budget than this are skipped for the cycle.
  #[serde(default = "default_minimum_floor")]
  pub minimum_floor: f64,
}

impl SitesConfig {
  pub fn new(candidates: Vec<SiteId>) -> Self {
    Self {
      candidates,
      exclude: Vec::new(),
      group: default_group(),
      quota_fraction: default_quota_fraction(),
      minimum_floor: default_minimum_floor(),
    }
  }

  /// Candidate sites without the excluded ones, first occurrence wins.
  pub fn eligible(&self) -> Vec<SiteId> {
    let mut sites: Vec<SiteId> = Vec::with_capacity(self.candidates.len());
    for site in &self.candidates {
      if !self.exclude.contains(site) && !sites.contains(site) {
        sites.push(site.clone());
      }
    }
    sites
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
  /// Must be chosen explicitly.
  pub policy: ScoringPolicy,
  /// Length of one popularity window.
  #[serde(default = "default_window", with = "de::duration")]
  pub window: Duration,
  /// Upper bound on capacity units placed per cycle.
  #[serde(default = "default_daily_cap")]
  pub daily_cap: f64,
  #[serde(default = "default_max_candidates")]
  pub max_candidates: usize,
  #[serde(default)]
  pub include_pattern: Option<String>,
  #[serde(default)]
  pub exclude_pattern: Option<String>,
  /// Datasets deleted from an eligible site within this window are skipped.
  #[serde(default = "default_deletion_window", with = "de::duration")]
  pub deletion_window: Duration,
  /// Plan and report without requesting transfers.
  #[serde(default)]
  pub dry_run: bool,
  #[serde(default)]
  pub notify: NotifyConfig,
  #[serde(default)]
  pub transfer: TransferConfig,
}

impl BatchConfig {
  pub fn new(policy: ScoringPolicy) -> Self {
    Self {
      policy,
      window: default_window(),
      daily_cap: default_daily_cap(),
      max_candidates: default_max_candidates(),
      include_pattern: None,
      exclude_pattern: None,
      deletion_window: default_deletion_window(),
      dry_run: false,
      notify: NotifyConfig::default(),
      transfer: TransferConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
  #[serde(default = "default_subject")]
  pub subject: String,
  #[serde(default)]
  pub recipients: Vec<String>,
}

impl Default for NotifyConfig {
  fn default() -> Self {
    Self {
      subject: default_subject(),
      recipients: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
  #[serde(default = "default_request_only")]
  pub request_only: bool,
  #[serde(default = "default_comments")]
  pub comments: String,
}

impl Default for TransferConfig {
  fn default() -> Self {
    Self {
      request_only: default_request_only(),
      comments: default_comments(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinuousConfig {
  /// Must be chosen explicitly.
  pub policy: ScoringPolicy,
  /// The single site continuous placement writes to.
  pub destination: SiteId,
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,
  /// The datagram key carrying the accessed file name.
  #[serde(default = "default_file_key")]
  pub file_key: String,
  #[serde(default = "default_janitor_interval", with = "de::duration")]
  pub janitor_interval: Duration,
  /// Capacity units that may be reserved at any one time.
  #[serde(default = "default_total_budget")]
  pub total_budget: f64,
  /// How long a committed placement holds its reservation.
  #[serde(default = "default_reservation_ttl", with = "de::duration")]
  pub reservation_ttl: Duration,
  #[serde(default)]
  pub transfer: TransferConfig,
}

impl ContinuousConfig {
  pub fn new(policy: ScoringPolicy, destination: SiteId) -> Self {
    Self {
      policy,
      destination,
      listen: default_listen(),
      workers: default_workers(),
      queue_capacity: default_queue_capacity(),
      file_key: default_file_key(),
      janitor_interval: default_janitor_interval(),
      total_budget: default_total_budget(),
      reservation_ttl: default_reservation_ttl(),
      transfer: TransferConfig::default(),
    }
  }
}

impl PlacementConfig {
  /// A configuration with neither mode enabled.
  pub fn new(ledger: LedgerConfig, sites: SitesConfig) -> Self {
    Self {
      ledger,
      sites,
      batch: None,
      continuous: None,
      do_not_move: Vec::new(),
    }
  }

  pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
    let config: PlacementConfig =
      serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path)?;
    Self::from_yaml_str(&text)
  }

  /// Checks the values serde cannot.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.sites.quota_fraction > 0.0 && self.sites.quota_fraction <= 1.0) {
      return Err(invalid("sites.quota_fraction", "must be in (0, 1]"));
    }
    if self.sites.minimum_floor < 0.0 {
      return Err(invalid("sites.minimum_floor", "must not be negative"));
    }
    if self.ledger.time_frame.is_zero() {
      return Err(invalid("ledger.time_frame", "must be positive"));
    }
    if let Some(batch) = &self.batch {
      if batch.window.is_zero() {
        return Err(invalid("batch.window", "must be positive"));
      }
      if batch.daily_cap < 0.0 {
        return Err(invalid("batch.daily_cap", "must not be negative"));
      }
      for (field, pattern) in [
        ("batch.include_pattern", &batch.include_pattern),
        ("batch.exclude_pattern", &batch.exclude_pattern),
      ] {
        if let Some(pattern) = pattern {
          regex::Regex::new(pattern).map_err(|e| invalid(field, &e.to_string()))?;
        }
      }
    }
    if let Some(continuous) = &self.continuous {
      if continuous.workers == 0 {
        return Err(invalid("continuous.workers", "at least one worker is required"));
      }
      if continuous.queue_capacity == 0 {
        return Err(invalid("continuous.queue_capacity", "must be positive"));
      }
      if continuous.file_key.is_empty() {
        return Err(invalid("continuous.file_key", "must not be empty"));
      }
      if continuous.janitor_interval.is_zero() {
        return Err(invalid("continuous.janitor_interval", "must be positive"));
      }
    }
    Ok(())
  }
}

fn invalid(field: &str, message: &str) -> ConfigError {
  ConfigError::Invalid {
    field: field.to_string(),
    message: message.to_string(),
  }
}

fn default_time_frame() -> Duration {
  Duration::from_secs(72 * HOUR)
}

fn default_group() -> String {
  "AnalysisOps".to_string()
}

fn default_quota_fraction() -> f64 {
  0.95
}

fn default_minimum_floor() -> f64 {
  30.0
}

fn default_window() -> Duration {
  Duration::from_secs(DAY)
}

fn default_daily_cap() -> f64 {
  10.0
}

fn default_max_candidates() -> usize {
  200
}

fn default_deletion_window() -> Duration {
  Duration::from_secs(30 * DAY)
}

fn default_subject() -> String {
  "Dynamic Data Placement Subscriptions".to_string()
}

fn default_request_only() -> bool {
  true
}

fn default_comments() -> String {
  "Dynamic data placement".to_string()
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([0, 0, 0, 0], 9345))
}

fn default_workers() -> usize {
  num_cpus::get().clamp(1, 4)
}

fn default_queue_capacity() -> usize {
  1024
}

fn default_file_key() -> String {
  "file_lfn".to_string()
}

fn default_janitor_interval() -> Duration {
  Duration::from_secs(HOUR)
}

fn default_total_budget() -> f64 {
  40_000.0
}

fn default_reservation_ttl() -> Duration {
  Duration::from_secs(24 * HOUR)
}
