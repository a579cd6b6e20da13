use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures while loading a logging config or installing the subscriber.
#[derive(Debug, Error)]
pub enum Error {
  #[error("no logging config in {dir:?}; looked for {candidates:?} ({env_var} selects the environment)")]
  NoConfigFile {
    dir: PathBuf,
    candidates: Vec<String>,
    env_var: &'static str,
  },

  #[error("cannot read logging config {path:?}: {source}")]
  ReadConfig {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("logging config is not valid YAML: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("logging config field '{field}': {message}")]
  InvalidField { field: String, message: String },

  #[error("appender '{appender}' cannot use {path:?}: {source}")]
  AppenderPath {
    appender: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Either the `log` bridge or the global `tracing` subscriber was set earlier.
  #[error("logging is already installed in this process: {0}")]
  AlreadyInstalled(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
