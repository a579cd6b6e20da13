mod common;

use common::*;

use dynplace::budget::BudgetLedger;
use dynplace::error::PlacementError;
use dynplace::inventory::Inventory;
use dynplace::planner::{BatchPlanner, SkipReason};
use dynplace::ranking::CandidateStats;
use dynplace::{Cutoff, DatasetId, PlacementConfig, ScoringPolicy, SiteId};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand_pcg::Pcg64;

fn planner(config: PlacementConfig, catalog: &Arc<FlakyCatalog>, notifier: &Arc<RecordingNotifier>) -> BatchPlanner {
  BatchPlanner::new(
    Arc::new(config),
    catalog.clone(),
    catalog.clone(),
    catalog.clone(),
    notifier.clone(),
  )
  .unwrap()
}

fn candidate(name: &str, recent: u64, size: Option<u64>) -> CandidateStats {
  CandidateStats {
    dataset: DatasetId::from(name),
    recent,
    prior: None,
    replicas: 1,
    size,
  }
}

fn threshold_one() -> ScoringPolicy {
  ScoringPolicy::AccessThreshold { threshold: 1 }
}

#[test]
fn test_score_cutoff_keeps_only_popular_candidate() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(
    dir.path(),
    sites(&["S1"]),
    ScoringPolicy::PopularityScore { cutoff: Cutoff::Score(200.0) },
    1000.0,
  );
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  // log10(1000) * 1000 / 6 = 500 and / 60 = 50.
  let candidates = vec![candidate("/X/x/AOD", 1000, Some(6)), candidate("/Y/y/AOD", 1000, Some(60))];

  for seed in 0..50 {
    let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 1000.0)], 1000.0);
    let mut rng = Pcg64::seed_from_u64(seed);
    let report = planner.allocate(&candidates, &mut budget, now(), &mut rng).unwrap();
    assert_eq!(report.admitted, 1);
    assert_eq!(report.allocations.len(), 1);
    assert_eq!(report.allocations[0].dataset, DatasetId::from("/X/x/AOD"));
  }
}

fn scenario_b_inventory() -> Inventory {
  let recent = now() - Duration::hours(1);
  Inventory::default()
    .with_quota("S1", GROUP, 100)
    .with_quota("S2", GROUP, 100)
    // S1: 0.95 * 100 - 55 = 40. S2: 0.95 * 100 - 70 = 25, below the floor.
    .with_replica("/fill/s1", "S1", Some(GROUP), 55.0)
    .with_replica("/fill/s2", "S2", Some(GROUP), 70.0)
    .with_replica("/X/x/AOD", "T1_ARCHIVE", Some(GROUP), 35.0)
    .with_size("/X/x/AOD", 35)
    .with_accesses("/X/x/AOD", recent, 1000)
}

#[test]
fn test_allocation_lands_on_only_eligible_site() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 1000.0);
  let sites_config = config.sites.clone();
  let catalog = Arc::new(FlakyCatalog::new(scenario_b_inventory()));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  let mut budget = BudgetLedger::refresh(&sites_config, 1000.0, catalog.as_ref(), catalog.as_ref());
  assert_eq!(budget.site_remaining(&"S1".into()), Some(40.0));
  assert_eq!(budget.site_remaining(&"S2".into()), None);

  let candidates = vec![candidate("/X/x/AOD", 1000, Some(35))];
  let mut rng = Pcg64::seed_from_u64(1);
  let report = planner.allocate(&candidates, &mut budget, now(), &mut rng).unwrap();
  assert_eq!(report.allocations.len(), 1);
  assert_eq!(report.allocations[0].site, SiteId::from("S1"));
  assert_eq!(budget.site_remaining(&"S1".into()), Some(5.0));
}

#[test]
fn test_full_cycle_requests_transfer_and_notifies() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 1000.0);
  if let Some(batch) = config.batch.as_mut() {
    batch.notify.recipients = vec!["ops@example.org".to_string()];
  }
  let catalog = Arc::new(FlakyCatalog::new(scenario_b_inventory()));
  let notifier = Arc::new(RecordingNotifier::default());
  let planner = planner(config, &catalog, &notifier);

  let report = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(9)).unwrap();
  assert_eq!(report.candidates, 1);
  assert_eq!(report.total_units(), 35);

  let transfers = catalog.inner.transfers();
  assert_eq!(transfers.len(), 1);
  assert_eq!(transfers[0].site, SiteId::from("S1"));
  assert_eq!(transfers[0].datasets, vec![DatasetId::from("/X/x/AOD")]);
  assert_eq!(transfers[0].options.group, GROUP);
  assert!(transfers[0].options.request_only);

  assert!(report.notified);
  let sent = notifier.sent.lock();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].0, "15/06/2024 | 35 units | Dynamic Data Placement Subscriptions");
  assert!(sent[0].1.contains("/X/x/AOD"));
  assert_eq!(sent[0].2, vec!["ops@example.org".to_string()]);
}

#[test]
fn test_unknown_size_is_never_allocated() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1"]), threshold_one(), 1000.0);
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  let candidates = vec![candidate("/U/u/AOD", 500, None)];
  let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 1000.0)], 1000.0);
  let report = planner
    .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(2))
    .unwrap();
  assert!(report.allocations.is_empty());
  assert_eq!(report.skipped, vec![(DatasetId::from("/U/u/AOD"), SkipReason::UnknownSize)]);
  assert_eq!(budget.global_remaining(), 1000.0);
}

#[test]
fn test_sites_holding_a_replica_are_never_chosen() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 1000.0);
  let inventory = Inventory::default().with_replica("/Z/z/AOD", "S1", None, 5.0);
  let catalog = Arc::new(FlakyCatalog::new(inventory));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));
  let candidates = vec![candidate("/Z/z/AOD", 50, Some(5))];

  for seed in 0..100 {
    let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 500.0), (SiteId::from("S2"), 50.0)], 1000.0);
    let report = planner
      .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(seed))
      .unwrap();
    assert_eq!(report.allocations.len(), 1);
    assert_eq!(report.allocations[0].site, SiteId::from("S2"));
  }
}

#[test]
fn test_failed_replica_check_rules_out_every_site() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 1000.0);
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  catalog.fail_replicas_of("/Z/z/AOD");
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  let candidates = vec![candidate("/Z/z/AOD", 50, Some(5)), candidate("/W/w/AOD", 50, Some(5))];
  let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 500.0), (SiteId::from("S2"), 500.0)], 1000.0);
  let report = planner
    .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(4))
    .unwrap();
  assert_eq!(report.allocations.len(), 1);
  assert_eq!(report.allocations[0].dataset, DatasetId::from("/W/w/AOD"));
  assert_eq!(report.skipped, vec![(DatasetId::from("/Z/z/AOD"), SkipReason::NoDestination)]);
}

#[test]
fn test_recent_deletions_exclude_dataset() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 1000.0);
  let inventory = Inventory::default()
    .with_deletion("/recent/del/AOD", "S2", now() - Duration::days(10))
    .with_deletion("/old/del/AOD", "S2", now() - Duration::days(40));
  let catalog = Arc::new(FlakyCatalog::new(inventory));
  catalog.fail_deletions_of("/unknown/del/AOD");
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  let candidates = vec![
    candidate("/recent/del/AOD", 10, Some(5)),
    candidate("/old/del/AOD", 10, Some(5)),
    candidate("/unknown/del/AOD", 10, Some(5)),
  ];
  for seed in 0..20 {
    let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 500.0), (SiteId::from("S2"), 500.0)], 1000.0);
    let report = planner
      .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(seed))
      .unwrap();
    let placed: Vec<&str> = report.allocations.iter().map(|a| a.dataset.as_str()).collect();
    assert_eq!(placed, vec!["/old/del/AOD"]);
    let mut skipped = report.skipped.clone();
    skipped.sort();
    assert_eq!(
      skipped,
      vec![
        (DatasetId::from("/recent/del/AOD"), SkipReason::RecentlyDeleted),
        (DatasetId::from("/unknown/del/AOD"), SkipReason::RecentlyDeleted),
      ]
    );
  }
}

#[test]
fn test_overflow_allocation_ends_the_cycle() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 10.0);
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));
  let candidates: Vec<CandidateStats> =
    (0..5).map(|i| candidate(&format!("/D{i}/x/AOD"), 10 + i, Some(8))).collect();

  for seed in 0..20 {
    let mut budget = BudgetLedger::from_sites([(SiteId::from("S1"), 100.0), (SiteId::from("S2"), 100.0)], 10.0);
    let report = planner
      .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(seed))
      .unwrap();
    // 8 fits in 10; the next 8 exceeds the remaining 2 and is the last.
    assert_eq!(report.allocations.len(), 2);
    assert!(report.overflowed);
    assert_eq!(report.total_units(), 16);
    assert!(budget.is_exhausted());
  }
}

#[test]
fn test_site_budgets_are_never_exceeded() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2", "S3"]), threshold_one(), 150.0);
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));
  let initial: HashMap<SiteId, f64> =
    [("S1", 40.0), ("S2", 75.0), ("S3", 31.0)].into_iter().map(|(s, b)| (SiteId::from(s), b)).collect();
  let candidates: Vec<CandidateStats> = (0..30)
    .map(|i| candidate(&format!("/P{i}/x/AOD"), 5 + i, Some(3 + (i * 7) % 29)))
    .collect();

  for seed in 0..200 {
    let mut budget = BudgetLedger::from_sites(initial.clone(), 150.0);
    let report = planner
      .allocate(&candidates, &mut budget, now(), &mut Pcg64::seed_from_u64(seed))
      .unwrap();

    let mut used: HashMap<SiteId, f64> = HashMap::new();
    for allocation in &report.allocations {
      *used.entry(allocation.site.clone()).or_default() += allocation.size as f64;
    }
    for (site, units) in used {
      assert!(units <= initial[&site], "seed {seed}: {site} took {units}");
    }
    let mut seen = std::collections::HashSet::new();
    assert!(report.allocations.iter().all(|a| seen.insert(a.dataset.clone())));
  }
}

#[test]
fn test_statistics_failure_aborts_cycle() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1"]), threshold_one(), 10.0);
  let catalog = Arc::new(FlakyCatalog::new(scenario_b_inventory()));
  catalog.fail_statistics();
  let notifier = Arc::new(RecordingNotifier::default());
  let planner = planner(config, &catalog, &notifier);

  let result = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(0));
  assert!(matches!(result, Err(PlacementError::Statistics(_))));
  assert!(catalog.inner.transfers().is_empty());
  assert!(notifier.sent.lock().is_empty());
}

fn two_site_inventory() -> Inventory {
  let recent = now() - Duration::hours(2);
  Inventory::default()
    .with_quota("S1", GROUP, 100)
    .with_quota("S2", GROUP, 100)
    // /A is only placeable on S1, /B only on S2.
    .with_replica("/A/a/AOD", "S2", Some(GROUP), 5.0)
    .with_replica("/B/b/AOD", "S1", Some(GROUP), 5.0)
    .with_size("/A/a/AOD", 5)
    .with_size("/B/b/AOD", 5)
    .with_accesses("/A/a/AOD", recent, 300)
    .with_accesses("/B/b/AOD", recent, 200)
}

#[test]
fn test_transfer_failure_at_one_site_does_not_stop_others() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 100.0);
  let catalog = Arc::new(FlakyCatalog::new(two_site_inventory()));
  catalog.fail_transfers_to("S1");
  let planner = planner(config, &catalog, &Arc::new(RecordingNotifier::default()));

  let report = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(5)).unwrap();
  assert_eq!(report.allocations.len(), 2);
  assert_eq!(report.transfers.len(), 2);
  let failed: Vec<&str> = report
    .transfers
    .iter()
    .filter(|t| t.result.is_err())
    .map(|t| t.site.as_str())
    .collect();
  assert_eq!(failed, vec!["S1"]);

  let accepted = catalog.inner.transfers();
  assert_eq!(accepted.len(), 1);
  assert_eq!(accepted[0].site, SiteId::from("S2"));
}

#[test]
fn test_notification_failure_keeps_allocations() {
  let dir = tempfile::tempdir().unwrap();
  let config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 100.0);
  let catalog = Arc::new(FlakyCatalog::new(two_site_inventory()));
  let notifier = Arc::new(RecordingNotifier::failing());
  let planner = planner(config, &catalog, &notifier);

  let report = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(5)).unwrap();
  assert!(!report.notified);
  assert_eq!(notifier.sent.lock().len(), 1);
  assert_eq!(report.allocations.len(), 2);
  assert_eq!(catalog.inner.transfers().len(), 2);
}

#[test]
fn test_dry_run_requests_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 100.0);
  if let Some(batch) = config.batch.as_mut() {
    batch.dry_run = true;
  }
  let catalog = Arc::new(FlakyCatalog::new(two_site_inventory()));
  let notifier = Arc::new(RecordingNotifier::default());
  let planner = planner(config, &catalog, &notifier);

  let report = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(5)).unwrap();
  assert!(report.dry_run);
  assert_eq!(report.allocations.len(), 2);
  assert!(report.transfers.is_empty());
  assert!(catalog.inner.transfers().is_empty());
  assert!(notifier.sent.lock()[0].1.contains("dry run"));
}

#[test]
fn test_do_not_move_datasets_are_excluded() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = batch_config(dir.path(), sites(&["S1", "S2"]), threshold_one(), 100.0);
  config.do_not_move = vec![DatasetId::from("/A/a/AOD")];
  let catalog = Arc::new(FlakyCatalog::new(two_site_inventory()));
  let notifier = Arc::new(RecordingNotifier::default());
  let planner = planner(config, &catalog, &notifier).with_do_not_move([DatasetId::from("/B/b/AOD")]);

  let report = planner.run_cycle(now(), &mut Pcg64::seed_from_u64(5)).unwrap();
  assert_eq!(report.candidates, 2);
  assert_eq!(report.admitted, 0);
  assert!(report.allocations.is_empty());
  assert!(catalog.inner.transfers().is_empty());

  // An empty cycle still reports that nothing moved.
  assert!(report.notified);
  let sent = notifier.sent.lock();
  assert_eq!(sent.len(), 1);
  assert!(sent[0].0.contains("| 0 units |"));
  assert!(sent[0].1.contains("No transfers"));
}

#[test]
fn test_batch_requires_configuration() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = batch_config(dir.path(), sites(&["S1"]), threshold_one(), 10.0);
  config.batch = None;
  let catalog = Arc::new(FlakyCatalog::new(Inventory::default()));
  let result = BatchPlanner::new(
    Arc::new(config),
    catalog.clone(),
    catalog.clone(),
    catalog.clone(),
    Arc::new(RecordingNotifier::default()),
  );
  assert!(matches!(result, Err(PlacementError::NotConfigured("batch"))));
}
