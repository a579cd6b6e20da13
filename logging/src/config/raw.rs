//! Structs mapping one-to-one onto the logging YAML file.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigRaw {
  #[serde(default = "default_version")]
  pub version: u32,
  #[serde(default)]
  pub appenders: BTreeMap<String, AppenderConfigRaw>,
  #[serde(default)]
  pub loggers: BTreeMap<String, LoggerConfigRaw>,
}

fn default_version() -> u32 {
  1
}

impl Default for ConfigRaw {
  fn default() -> Self {
    Self {
      version: default_version(),
      appenders: BTreeMap::new(),
      loggers: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum AppenderConfigRaw {
  Console(ConsoleAppenderConfigRaw),
  File(FileAppenderConfigRaw),
  RollingFile(RollingFileAppenderConfigRaw),
}

impl AppenderConfigRaw {
  pub fn encoder(&self) -> Option<&EncoderConfigRaw> {
    match self {
      AppenderConfigRaw::Console(c) => c.encoder.as_ref(),
      AppenderConfigRaw::File(f) => f.encoder.as_ref(),
      AppenderConfigRaw::RollingFile(r) => r.encoder.as_ref(),
    }
  }
}

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConsoleAppenderConfigRaw {
  #[serde(default)]
  pub encoder: Option<EncoderConfigRaw>,
  /// Write to stderr instead of stdout.
  #[serde(default)]
  pub stderr: bool,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileAppenderConfigRaw {
  pub path: String,
  #[serde(default)]
  pub encoder: Option<EncoderConfigRaw>,
}

fn default_file_name_prefix() -> String {
  "dynplace.log".to_string()
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RollingFileAppenderConfigRaw {
  pub directory: String,
  #[serde(default = "default_file_name_prefix")]
  pub file_name_prefix: String,
  /// One of "minutely", "hourly", "daily" or "never".
  pub time_granularity: String,
  #[serde(default)]
  pub encoder: Option<EncoderConfigRaw>,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum EncoderConfigRaw {
  Full(FormatOptionsRaw),
  Compact(FormatOptionsRaw),
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct FormatOptionsRaw {
  #[serde(default = "default_true")]
  pub with_target: bool,
  #[serde(default)]
  pub with_thread_names: bool,
  #[serde(default)]
  pub ansi: bool,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfigRaw {
  pub level: String,
  #[serde(default)]
  pub appenders: Vec<String>,
}
