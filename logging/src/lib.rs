//! `dynplace_logging` - configuration-driven logging for the placement agent.
//!
//! A YAML file names a set of appenders (console, plain file, rolling file)
//! and a set of loggers that route target prefixes at a minimum level to
//! those appenders. Initialisation installs a global `tracing` subscriber
//! and bridges the `log` facade into it.

pub mod config;
pub mod error;
pub mod guards;
pub mod init;

pub use error::{Error, Result};
pub use guards::FlushGuards;
pub use init::{build_layers, find_config_file, init_console, init_from_file, init_from_str};

/// Returned by every initialisation function.
///
/// Dropping it flushes and stops the non-blocking file writers, so it must
/// live until the process is about to exit.
#[must_use = "file appenders stop writing once the InitResult is dropped"]
#[derive(Debug)]
pub struct InitResult {
  pub guards: FlushGuards,
}
