use std::path::PathBuf;

use thiserror::Error;

/// A failed call to an external collaborator (catalog, popularity
/// statistics, quota store or notification channel).
///
/// Callers resolve these locally to a worst-case sentinel; only the batch
/// cycle's popularity fetch escalates one to a [`PlacementError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
  #[error("upstream service unavailable: {0}")]
  Unavailable(String),

  #[error("upstream returned malformed data: {0}")]
  Malformed(String),
}

/// A datagram that could not be turned into an access event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("datagram contains no key=value pairs")]
  Empty,

  #[error("datagram is missing required key '{0}'")]
  MissingKey(String),
}

/// Errors raised by the persistent access ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
  /// The snapshot exists but cannot be decoded. Fatal at startup.
  #[error("ledger snapshot {path:?} is unreadable: {reason}")]
  Unreadable { path: PathBuf, reason: String },

  #[error("ledger I/O failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to encode ledger snapshot: {0}")]
  Encode(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read configuration file: {0}")]
  Read(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  Parse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  Invalid { field: String, message: String },
}

/// A batch cycle could not proceed at all.
#[derive(Debug, Error)]
pub enum PlacementError {
  #[error("popularity statistics unavailable: {0}")]
  Statistics(UpstreamError),

  #[error("mode '{0}' is not configured")]
  NotConfigured(&'static str),
}

/// The umbrella error type for `dynplace` operations.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Ledger(#[from] LedgerError),

  #[error(transparent)]
  Placement(#[from] PlacementError),

  #[error("failed to bind datagram socket: {0}")]
  Bind(std::io::Error),

  #[error("failed to spawn background thread: {0}")]
  Spawn(std::io::Error),
}

/// A specialized `Result` type for `dynplace` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
