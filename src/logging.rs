//! Structured logging initialisation.
//!
//! The engine itself only emits `tracing` events: compile and cache decisions,
//! converter and adapter resolution, callback scheduling, cancellation and
//! suspension resumes. Applications that do not install their own subscriber can
//! call [`init_logging`] or [`init_logging_with_config`], configured through:
//!
//! - `RETROWIRE_LOG_LEVEL`: trace/debug/info/warn/error (default `info`)
//! - `RETROWIRE_LOG_FORMAT`: json/pretty (default `json`)
//! - `RETROWIRE_LOG_ASYNC`: buffer output on a background writer (default `false`)
//! - `RETROWIRE_LOG_TARGET_FILTER`: extra comma-separated filter directives,
//!   e.g. `retrowire::cache=debug`
//! - `RETROWIRE_LOG_INCLUDE_LOCATION`: add file and line (default `false`)
//!
//! `RUST_LOG` takes precedence over the level when set.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to JSON.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Hand events to a background writer thread instead of writing inline
    pub non_blocking: bool,
    /// Extra per-target directives layered over `level`
    pub directives: Vec<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            non_blocking: false,
            directives: Vec::new(),
            include_location: false,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env::var("RETROWIRE_LOG_LEVEL")
                .map(|level| parse_level(&level))
                .unwrap_or(defaults.level),
            format: env::var("RETROWIRE_LOG_FORMAT")
                .ok()
                .and_then(|format| format.parse().ok())
                .unwrap_or(defaults.format),
            non_blocking: env_flag("RETROWIRE_LOG_ASYNC").unwrap_or(defaults.non_blocking),
            directives: env::var("RETROWIRE_LOG_TARGET_FILTER")
                .map(|filter| split_directives(&filter))
                .unwrap_or_default(),
            include_location: env_flag("RETROWIRE_LOG_INCLUDE_LOCATION")
                .unwrap_or(defaults.include_location),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok()?.trim().parse().ok()
}

fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

fn split_directives(filter: &str) -> Vec<String> {
    filter
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_owned)
        .collect()
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(config.level).into())
    });

    config
        .directives
        .iter()
        .fold(base, |filter, raw| match raw.parse::<Directive>() {
            Ok(directive) => filter.add_directive(directive),
            Err(err) => {
                eprintln!("retrowire: ignoring log directive {raw:?}: {err}");
                filter
            }
        })
}

fn output_layer<S, W>(config: &LogConfig, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(writer);
    match config.format {
        LogFormat::Json => layer.json().with_current_span(true).with_thread_ids(true).boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Install a global subscriber at `level`, everything else from the environment.
///
/// ```no_run
/// let _guard = retrowire::logging::init_logging("debug")?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// When a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<Option<WorkerGuard>> {
    let config = LogConfig {
        level: parse_level(level),
        ..LogConfig::from_env()
    };
    init_logging_with_config(&config)
}

/// Install a global subscriber built from `config`.
///
/// With `non_blocking` the returned guard must be kept alive; dropping it flushes
/// and stops the background writer.
///
/// # Errors
///
/// When a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let guard = if config.non_blocking {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        registry.with(output_layer(config, writer)).try_init().map(|()| Some(guard))
    } else {
        registry.with(output_layer(config, std::io::stdout)).try_init().map(|()| None)
    };
    guard.context("a global tracing subscriber is already installed")
}
