use crate::config::raw::{AppenderConfigRaw, ConfigRaw, EncoderConfigRaw, FormatOptionsRaw, LoggerConfigRaw};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::Rotation;
use tracing_core::metadata::LevelFilter;

pub const ROOT_LOGGER: &str = "root";

#[derive(Debug, Clone)]
pub struct ConfigInternal {
  pub appenders: BTreeMap<String, AppenderInternal>,
  pub loggers: BTreeMap<String, LoggerInternal>,
}

impl ConfigInternal {
  /// The root logger always exists after processing.
  pub fn root(&self) -> Option<&LoggerInternal> {
    self.loggers.get(ROOT_LOGGER)
  }

  /// Loggers that route events to `appender`, root included.
  pub fn loggers_for<'a>(&'a self, appender: &'a str) -> impl Iterator<Item = &'a LoggerInternal> + 'a {
    self
      .loggers
      .values()
      .filter(move |logger| logger.appender_names.iter().any(|name| name == appender))
  }
}

#[derive(Debug, Clone)]
pub struct AppenderInternal {
  pub name: String,
  pub kind: AppenderKindInternal,
  pub encoder: EncoderInternal,
}

#[derive(Debug, Clone)]
pub enum AppenderKindInternal {
  Console { stderr: bool },
  File { path: PathBuf },
  RollingFile(RollingFileAppenderInternal),
}

#[derive(Debug, Clone)]
pub struct RollingFileAppenderInternal {
  pub directory: PathBuf,
  pub file_name_prefix: String,
  pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStyle {
  Full,
  Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInternal {
  pub style: EncoderStyle,
  pub with_target: bool,
  pub with_thread_names: bool,
  pub ansi: bool,
}

impl Default for EncoderInternal {
  fn default() -> Self {
    Self {
      style: EncoderStyle::Full,
      with_target: true,
      with_thread_names: false,
      ansi: false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct LoggerInternal {
  pub name: String,
  pub min_level: LevelFilter,
  pub appender_names: Vec<String>,
}

impl LoggerInternal {
  pub fn is_root(&self) -> bool {
    self.name == ROOT_LOGGER
  }
}

/// Validates a raw configuration.
///
/// Appender references are checked, levels parsed, and a `root` logger at
/// INFO with no appenders is added when the file does not define one.
pub fn process_raw_config(raw_config: ConfigRaw) -> Result<ConfigInternal> {
  let mut appenders = BTreeMap::new();

  for (name, raw_appender) in raw_config.appenders {
    let encoder = raw_appender.encoder().map(process_encoder).unwrap_or_default();

    let kind = match raw_appender {
      AppenderConfigRaw::Console(console) => AppenderKindInternal::Console { stderr: console.stderr },
      AppenderConfigRaw::File(file) => {
        if file.path.is_empty() {
          return Err(Error::InvalidField {
            field: format!("appenders.{name}.path"),
            message: "File appender path cannot be empty.".to_string(),
          });
        }
        AppenderKindInternal::File {
          path: PathBuf::from(file.path),
        }
      }
      AppenderConfigRaw::RollingFile(rolling) => {
        let rotation = parse_rotation(&rolling.time_granularity).ok_or_else(|| Error::InvalidField {
          field: format!("appenders.{name}.time_granularity"),
          message: format!(
            "Unknown time_granularity '{}'. Expected 'minutely', 'hourly', 'daily', or 'never'.",
            rolling.time_granularity
          ),
        })?;
        if rolling.directory.is_empty() {
          return Err(Error::InvalidField {
            field: format!("appenders.{name}.directory"),
            message: "Rolling file appender directory cannot be empty.".to_string(),
          });
        }
        AppenderKindInternal::RollingFile(RollingFileAppenderInternal {
          directory: PathBuf::from(rolling.directory),
          file_name_prefix: rolling.file_name_prefix,
          rotation,
        })
      }
    };

    appenders.insert(name.clone(), AppenderInternal { name, kind, encoder });
  }

  let mut raw_loggers = raw_config.loggers;
  raw_loggers.entry(ROOT_LOGGER.to_string()).or_insert_with(|| LoggerConfigRaw {
    level: "info".to_string(),
    appenders: Vec::new(),
  });

  let mut loggers = BTreeMap::new();
  for (name, raw_logger) in raw_loggers {
    let min_level = parse_level_filter(&raw_logger.level, &name)?;

    if let Some(missing) = raw_logger.appenders.iter().find(|a| !appenders.contains_key(*a)) {
      return Err(Error::InvalidField {
        field: format!("loggers.{name}.appenders"),
        message: format!(
          "Logger '{name}' refers to undefined appender '{missing}'. Available appenders: {:?}",
          appenders.keys().collect::<Vec<_>>()
        ),
      });
    }

    loggers.insert(
      name.clone(),
      LoggerInternal {
        name,
        min_level,
        appender_names: raw_logger.appenders,
      },
    );
  }

  Ok(ConfigInternal { appenders, loggers })
}

fn process_encoder(raw: &EncoderConfigRaw) -> EncoderInternal {
  let (style, options): (EncoderStyle, &FormatOptionsRaw) = match raw {
    EncoderConfigRaw::Full(options) => (EncoderStyle::Full, options),
    EncoderConfigRaw::Compact(options) => (EncoderStyle::Compact, options),
  };
  EncoderInternal {
    style,
    with_target: options.with_target,
    with_thread_names: options.with_thread_names,
    ansi: options.ansi,
  }
}

fn parse_rotation(granularity: &str) -> Option<Rotation> {
  match granularity.to_lowercase().as_str() {
    "minutely" => Some(Rotation::MINUTELY),
    "hourly" => Some(Rotation::HOURLY),
    "daily" => Some(Rotation::DAILY),
    "never" => Some(Rotation::NEVER),
    _ => None,
  }
}

pub(crate) fn parse_level_filter(level_str: &str, logger_name: &str) -> Result<LevelFilter> {
  let upper = level_str.to_uppercase();
  if upper == "OFF" {
    return Ok(LevelFilter::OFF);
  }

  upper
    .parse::<Level>()
    .map(LevelFilter::from_level)
    .map_err(|_| Error::InvalidField {
      field: format!("loggers.{logger_name}.level"),
      message: format!("Invalid log level string '{level_str}'. Expected TRACE, DEBUG, INFO, WARN, ERROR, or OFF."),
    })
}
