//! Structured logging for helpdesk-sync
//!
//! A small tagged logging API:
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via `--debug-<module>` flags
//! - Colored console output with aligned tags
//!
//! ## Usage
//!
//! ```rust
//! use helpdesk_sync::logger::{self, LogTag};
//!
//! logger::warning(LogTag::Transport, "Heartbeat timeout, forcing reconnect");
//! logger::info(LogTag::Coordinator, "Synchronization started");
//! logger::debug(LogTag::Poller, "Interval now 10000ms"); // Only if --debug-poller
//! ```
//!
//! Call [`init`] once at startup so the process arguments are scanned for
//! debug flags. Library users that never call it get the default config
//! (info and above, no debug tags).

mod config;
mod core;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger from command-line arguments
pub fn init() {
    config::init_from_args();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (shown unless --quiet raises nothing above it)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level
///
/// Only shown when the `--debug-<module>` flag for the tag was provided.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (only with --verbose)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}
