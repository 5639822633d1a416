/// Logger configuration derived from command-line flags
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_cmd_args, is_quiet_enabled, is_verbose_enabled};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Highest level that is printed
    pub min_level: LogLevel,
    /// Tags with `--debug-<tag>` enabled
    pub debug_tags: HashSet<String>,
    /// Tags with `--verbose-<tag>` enabled
    pub verbose_tags: HashSet<String>,
    /// If non-empty, only these tags are printed
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Snapshot of the active logger config
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG
        .read()
        .map(|cfg| cfg.clone())
        .unwrap_or_default()
}

/// Replace the active logger config
pub fn set_logger_config(config: LoggerConfig) {
    if let Ok(mut cfg) = LOGGER_CONFIG.write() {
        *cfg = config;
    }
}

/// Build the logger config from `--debug-*`, `--verbose*` and `--quiet`
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    for arg in get_cmd_args() {
        if let Some(tag) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(tag.to_string());
            if config.min_level < LogLevel::Debug {
                config.min_level = LogLevel::Debug;
            }
        } else if let Some(tag) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(tag.to_string());
        }
    }

    if is_verbose_enabled() {
        config.min_level = LogLevel::Verbose;
    } else if is_quiet_enabled() {
        config.min_level = LogLevel::Warning;
    }

    set_logger_config(config);
}

pub(super) fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    get_logger_config().debug_tags.contains(&tag.to_debug_key())
}

pub(super) fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    get_logger_config()
        .verbose_tags
        .contains(&tag.to_debug_key())
}
