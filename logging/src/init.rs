// Public initialization entry points for dynplace_logging.

use crate::{
  config::{
    processed::{process_raw_config, AppenderInternal, AppenderKindInternal, ConfigInternal, EncoderInternal, EncoderStyle},
    raw::ConfigRaw,
  },
  error::{Error, Result},
  guards::FlushGuards,
  InitResult,
};

use std::{
  env,
  fs::{self, OpenOptions},
  path::{Path, PathBuf},
};

use tracing_appender::rolling::RollingFileAppender;
use tracing_core::metadata::LevelFilter;
use tracing_subscriber::{
  filter::Targets,
  fmt::{self, MakeWriter},
  prelude::*,
  Layer, Registry,
};

const DEFAULT_CONFIG_BASE_NAME: &str = "dynplace-logging";
const DEFAULT_CONFIG_EXTENSION: &str = "yaml";
const ENVIRONMENT_VAR: &str = "DYNPLACE_ENV";

/// A type-erased appender layer, ready to stack on a [`Registry`].
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Looks for `dynplace-logging.<env>.yaml`, then `dynplace-logging.yaml`, in `dir`.
///
/// `<env>` is `environment_suffix` or, failing that, the `DYNPLACE_ENV` variable.
pub fn find_config_file(dir: &Path, environment_suffix: Option<&str>) -> Result<PathBuf> {
  let environment = environment_suffix
    .map(str::to_string)
    .or_else(|| env::var(ENVIRONMENT_VAR).ok())
    .filter(|s| !s.is_empty());

  let mut candidates = Vec::with_capacity(2);
  if let Some(environment) = &environment {
    candidates.push(format!("{DEFAULT_CONFIG_BASE_NAME}.{environment}.{DEFAULT_CONFIG_EXTENSION}"));
  }
  candidates.push(format!("{DEFAULT_CONFIG_BASE_NAME}.{DEFAULT_CONFIG_EXTENSION}"));

  candidates
    .iter()
    .map(|name| dir.join(name))
    .find(|path| path.is_file())
    .ok_or_else(|| Error::NoConfigFile {
      dir: dir.to_path_buf(),
      candidates,
      env_var: ENVIRONMENT_VAR,
    })
}

/// Initializes global logging from a YAML file.
pub fn init_from_file(config_path: &Path) -> Result<InitResult> {
  let text = fs::read_to_string(config_path).map_err(|source| Error::ReadConfig {
    path: config_path.to_path_buf(),
    source,
  })?;
  init_from_str(&text)
}

/// Initializes global logging from YAML text.
pub fn init_from_str(yaml: &str) -> Result<InitResult> {
  let raw: ConfigRaw = serde_yaml::from_str(yaml)?;
  let config = process_raw_config(raw)?;
  let (layers, guards) = build_layers(&config)?;
  install(layers)?;
  tracing::debug!(appenders = guards.len(), "file appenders started");
  Ok(InitResult { guards })
}

/// Initializes global logging with a single stderr appender at `level`.
///
/// Used when no logging file is configured.
pub fn init_console(level: LevelFilter) -> Result<InitResult> {
  let layer = fmt_layer(std::io::stderr, &EncoderInternal::default(), Targets::new().with_default(level));
  install(vec![layer])?;
  Ok(InitResult {
    guards: FlushGuards::default(),
  })
}

fn install(layers: Vec<BoxedLayer>) -> Result<()> {
  tracing_log::LogTracer::init().map_err(|e| Error::AlreadyInstalled(e.to_string()))?;
  let subscriber = tracing_subscriber::registry().with(layers);
  tracing::subscriber::set_global_default(subscriber).map_err(|e| Error::AlreadyInstalled(e.to_string()))
}

/// Builds one formatting layer per appender without installing anything.
///
/// The returned guards flush the file writers when dropped.
pub fn build_layers(config: &ConfigInternal) -> Result<(Vec<BoxedLayer>, FlushGuards)> {
  let mut guards = FlushGuards::default();
  let mut layers = Vec::with_capacity(config.appenders.len());

  for appender in config.appenders.values() {
    let filter = build_filter_for_appender(&appender.name, config);
    let layer = match &appender.kind {
      AppenderKindInternal::Console { stderr: true } => fmt_layer(std::io::stderr, &appender.encoder, filter),
      AppenderKindInternal::Console { stderr: false } => fmt_layer(std::io::stdout, &appender.encoder, filter),
      AppenderKindInternal::File { path } => {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
          create_dir(appender, parent)?;
        }
        let file = OpenOptions::new()
          .create(true)
          .append(true)
          .open(path)
          .map_err(|source| Error::AppenderPath {
            appender: appender.name.clone(),
            path: path.clone(),
            source,
          })?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        guards.push(guard);
        fmt_layer(writer, &appender.encoder, filter)
      }
      AppenderKindInternal::RollingFile(rolling) => {
        create_dir(appender, &rolling.directory)?;
        let file_appender = RollingFileAppender::new(
          rolling.rotation.clone(),
          &rolling.directory,
          &rolling.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        fmt_layer(writer, &appender.encoder, filter)
      }
    };
    layers.push(layer);
  }

  Ok((layers, guards))
}

fn create_dir(appender: &AppenderInternal, dir: &Path) -> Result<()> {
  fs::create_dir_all(dir).map_err(|source| Error::AppenderPath {
    appender: appender.name.clone(),
    path: dir.to_path_buf(),
    source,
  })
}

fn fmt_layer<W>(writer: W, encoder: &EncoderInternal, filter: Targets) -> BoxedLayer
where
  W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
  let layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(encoder.ansi)
    .with_target(encoder.with_target)
    .with_thread_names(encoder.with_thread_names);
  match encoder.style {
    EncoderStyle::Full => layer.with_filter(filter).boxed(),
    EncoderStyle::Compact => layer.compact().with_filter(filter).boxed(),
  }
}

/// The root logger sets the default level when it routes to this appender;
/// every other routing logger adds a target-prefix rule. Targets no rule
/// covers are dropped.
fn build_filter_for_appender(appender_name: &str, config: &ConfigInternal) -> Targets {
  config
    .loggers_for(appender_name)
    .fold(Targets::new(), |targets, logger| {
      if logger.is_root() {
        targets.with_default(logger.min_level)
      } else {
        targets.with_target(logger.name.clone(), logger.min_level)
      }
    })
}
