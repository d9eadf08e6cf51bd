//! Structured logging utilities for the staging core's components.
//!
//! # Usage
//!
//! ```ignore
//! use kiln_config::logging::*;
//!
//! log_cas_debug!("inserted blob", hash = %hash);
//! log_session_info!("job admitted", job_id = %job_id);
//! ```

/// Component identifiers for log filtering.
pub struct Component;

impl Component {
    pub const CAS: &'static str = "CAS";
    pub const SESSION: &'static str = "SESSION";
    pub const MATERIALIZE: &'static str = "MATERIALIZE";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// === CAS logging macros ===

#[macro_export]
macro_rules! log_cas_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CAS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cas_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CAS", $($key = $value,)* $msg)
    };
}

// === SESSION logging macros ===

#[macro_export]
macro_rules! log_session_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "SESSION", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_session_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SESSION", $($key = $value,)* $msg)
    };
}

// === MATERIALIZE logging macros ===

#[macro_export]
macro_rules! log_materialize_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "MATERIALIZE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_materialize_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "MATERIALIZE", $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given default level filter.
/// Call this once at application startup; `RUST_LOG` overrides it if set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
