//! Tracing/logging setup shared by the binaries.
//!
//! [`init`] installs the process-wide subscriber once and hands back a
//! [`LogHandle`]; whoever owns the handle can change verbosity at runtime.

pub mod tracing;

pub use crate::tracing::{LogHandle, LogLevel, LogSettings, ObservabilityError, build, init};
