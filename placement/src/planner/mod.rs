//! Placement decisions for both operating modes.

pub mod batch;
pub mod continuous;

pub use batch::{Allocation, BatchPlanner, CycleReport, SkipReason, TransferOutcome};
pub use continuous::{ContinuousPlanner, Decision};
