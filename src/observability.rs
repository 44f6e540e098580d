//! Structured logging setup: a single registry with a compact stderr
//! layer behind a `reload::Layer`, so the log level can be changed at
//! runtime without restarting the process.

use clap::ValueEnum;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter,
    Registry,
};

/// Log filter level for the indexer.
#[derive(Default, Debug, Copy, Clone, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LogLevel::Trace => f.pad("trace"),
            LogLevel::Debug => f.pad("debug"),
            LogLevel::Info => f.pad("info"),
            LogLevel::Warn => f.pad("warn"),
            LogLevel::Error => f.pad("error"),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// A sharable handle to the observability stack, allowing the log level
/// to be changed after startup (e.g. from an admin operation).
#[derive(Debug, Clone)]
pub struct Observability {
    crate_name: &'static str,
    reload_handle: reload::Handle<EnvFilter, Registry>,
    last_directive: std::sync::Arc<RwLock<String>>,
}

impl Observability {
    /// Initializes the global tracing subscriber. Must be called exactly
    /// once, before any other module emits a tracing event.
    pub fn init(crate_name: &'static str, level: LogLevel) -> anyhow::Result<Self> {
        let directive = format!("{}={}", crate_name, LevelFilter::from(level));
        let filter = Self::parse_filter(&directive)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(tracing_subscriber::fmt::format().compact().with_target(true)),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

        Ok(Self {
            crate_name,
            reload_handle,
            last_directive: std::sync::Arc::new(RwLock::new(directive)),
        })
    }

    /// Changes the log level for the indexer's own crate, leaving other
    /// crates' directives (set via `RUST_LOG`) untouched.
    pub fn set_log_level(&self, level: LogLevel) -> anyhow::Result<()> {
        let directive = format!("{}={}", self.crate_name, LevelFilter::from(level));
        let new_filter = Self::parse_filter(&directive)?;
        self.reload_handle.reload(new_filter)?;
        *self
            .last_directive
            .write()
            .expect("observability lock is poisoned") = directive;
        Ok(())
    }

    fn parse_filter(directive: &str) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env();
        filter = filter.add_directive(directive.parse()?);
        Ok(filter)
    }
}
