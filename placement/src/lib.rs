//! Popularity-driven replica placement for immutable datasets.
//!
//! `dynplace` decides which datasets should be replicated to which storage
//! sites, under strict capacity budgets, from observed access popularity.
//!
//! # Features
//! - **Decaying access ledger**: per-dataset access counters whose
//!   contributions expire after a configurable time frame, persisted across
//!   restarts.
//! - **Budget accounting**: per-site and global remaining capacity for batch
//!   cycles, plus a rolling reservation budget for continuous placement.
//! - **Configurable scoring**: the popularity score and the raw access
//!   threshold are both available as named policies.
//! - **Weighted random admission**: candidates and destinations are drawn in
//!   proportion to their weight, without replacement.
//! - **Concurrent ingestion**: a datagram receiver feeding a bounded queue
//!   and a worker pool, with a janitor expiring counters in the background.

// Public modules that form the API
pub mod budget;
pub mod config;
pub mod error;
pub mod ingest;
pub mod inventory;
pub mod ledger;
pub mod metrics;
pub mod planner;
pub mod ranking;
pub mod selector;
pub mod service;
pub mod types;
pub mod upstream;

// Internal, crate-only modules
mod de;
mod task;

// Re-export the primary user-facing types for convenience
pub use config::PlacementConfig;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::MetricsSnapshot;
pub use planner::{BatchPlanner, ContinuousPlanner};
pub use ranking::{Cutoff, ScoringPolicy};
pub use service::{ListenerService, ServiceBuilder};
pub use types::{DatasetId, FileId, SiteId};
