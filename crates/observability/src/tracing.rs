//! Subscriber construction with a reloadable level filter.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as tfmt, reload};

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,

    #[error("log filter reload failed: {0}")]
    Reload(#[from] reload::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ObservabilityError::UnknownLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub level: LogLevel,
    /// JSON lines instead of the compact human format.
    pub json: bool,
}

/// Runtime control over the installed level filter.
///
/// Only works while the subscriber it was built with is alive.
#[derive(Clone)]
pub struct LogHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("current", &self.current_filter().ok())
            .finish()
    }
}

impl LogHandle {
    pub fn set_level(&self, level: LogLevel) -> Result<(), ObservabilityError> {
        self.inner.reload(EnvFilter::new(level.as_str()))?;
        ::tracing::info!(%level, "log level changed");
        Ok(())
    }

    /// The active filter directives, e.g. `"debug"`.
    pub fn current_filter(&self) -> Result<String, ObservabilityError> {
        Ok(self.inner.with_current(|filter| filter.to_string())?)
    }
}

/// Build a subscriber without installing it.
///
/// `RUST_LOG`, when set, wins over `settings.level` for the initial filter.
pub fn build(
    settings: &LogSettings,
) -> (impl ::tracing::Subscriber + Send + Sync + 'static, LogHandle) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));
    let (filter, handle) = reload::Layer::new(filter);

    let output = if settings.json {
        tfmt::layer()
            .json()
            .with_timer(tfmt::time::SystemTime)
            .with_target(false)
            .boxed()
    } else {
        tfmt::layer().compact().boxed()
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(output);
    (subscriber, LogHandle { inner: handle })
}

/// Install the process-wide subscriber.
///
/// Fails with [`ObservabilityError::AlreadyInitialized`] on a second call.
pub fn init(settings: &LogSettings) -> Result<LogHandle, ObservabilityError> {
    let (subscriber, handle) = build(settings);
    ::tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| ObservabilityError::AlreadyInitialized)?;
    Ok(handle)
}
