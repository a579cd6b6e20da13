//! `dynplace-agent`: process bootstrap for the placement modes.
//!
//! `batch` runs a single placement cycle against the configured collaborators
//! and exits; `listen` ingests access datagrams until interrupted.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use dynplace::inventory::Inventory;
use dynplace::planner::CycleReport;
use dynplace::upstream::LogNotifier;
use dynplace::{BatchPlanner, Ledger, PlacementConfig, ServiceBuilder};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "dynplace-agent", about = "Popularity-driven dataset replica placement", version)]
struct Cli {
  /// Placement configuration (YAML).
  #[arg(long, short)]
  config: PathBuf,

  /// Logging configuration (YAML). Logs INFO to stderr when omitted.
  #[arg(long)]
  logging: Option<PathBuf>,

  /// Static inventory standing in for the catalog, statistics and quota services.
  #[arg(long)]
  inventory: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one batch placement cycle and exit.
  Batch(BatchArgs),
  /// Run the continuous listener until Ctrl-C.
  Listen,
}

#[derive(Args)]
struct BatchArgs {
  /// Plan and report without requesting any transfer.
  #[arg(long)]
  dry_run: bool,

  /// Seed the selection generator for a reproducible cycle.
  #[arg(long)]
  seed: Option<u64>,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let _logging = match &cli.logging {
    Some(path) => dynplace_logging::init_from_file(path),
    None => dynplace_logging::init_console(LevelFilter::INFO),
  }
  .context("failed to initialise logging")?;

  let mut config = PlacementConfig::from_yaml_file(&cli.config)
    .with_context(|| format!("failed to load placement configuration {:?}", cli.config))?;

  let inventory = Arc::new(match &cli.inventory {
    Some(path) => Inventory::from_yaml_file(path).with_context(|| format!("failed to load inventory {path:?}"))?,
    None => Inventory::default(),
  });

  match cli.command {
    Commands::Batch(args) => {
      if let Some(batch) = config.batch.as_mut() {
        batch.dry_run |= args.dry_run;
      }
      run_batch(Arc::new(config), inventory, args.seed)
    }
    Commands::Listen => run_listen(Arc::new(config), inventory),
  }
}

fn run_batch(config: Arc<PlacementConfig>, inventory: Arc<Inventory>, seed: Option<u64>) -> Result<()> {
  // Datasets pinned by the continuous mode stay where they are.
  let ledger = Ledger::open(&config.ledger).context("failed to open the access ledger")?;
  let pinned = ledger.pinned();

  let planner = BatchPlanner::new(
    config,
    inventory.clone(),
    inventory.clone(),
    inventory,
    Arc::new(LogNotifier),
  )?
  .with_do_not_move(pinned);

  let mut rng = match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_os_rng(),
  };

  let report = planner.run_cycle(Utc::now(), &mut rng)?;
  log_report(&report);
  Ok(())
}

fn log_report(report: &CycleReport) {
  tracing::info!(
    candidates = report.candidates,
    admitted = report.admitted,
    allocations = report.allocations.len(),
    units = report.total_units(),
    skipped = report.skipped.len(),
    overflowed = report.overflowed,
    dry_run = report.dry_run,
    "batch cycle finished"
  );
  for outcome in &report.transfers {
    if let Err(reason) = &outcome.result {
      tracing::warn!(site = %outcome.site, datasets = outcome.datasets.len(), %reason, "transfer request failed");
    }
  }
}

fn run_listen(config: Arc<PlacementConfig>, inventory: Arc<Inventory>) -> Result<()> {
  let service = ServiceBuilder::new(config)
    .catalog(inventory.clone())
    .quota_store(inventory)
    .start()?;
  tracing::info!(addr = %service.local_addr(), "listening for access datagrams");

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to build signal runtime")?;
  runtime
    .block_on(tokio::signal::ctrl_c())
    .context("failed to wait for Ctrl-C")?;

  tracing::info!("shutting down");
  let metrics = service.metrics();
  service.shutdown()?;
  tracing::info!(metrics = ?metrics, "listener stopped");
  Ok(())
}
