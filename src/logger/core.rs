/// Core logging implementation with automatic filtering
use super::config::{get_logger_config, is_debug_enabled_for_tag, is_verbose_enabled_for_tag};
use super::levels::LogLevel;
use super::tags::LogTag;

/// Check if a log message should be displayed
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Check against minimum log level threshold
/// 3. Debug level requires --debug-<module> flag for that tag
/// 4. Verbose level requires --verbose flag OR --verbose-<module> flag for that tag
/// 5. If enabled_tags is non-empty, tag must be in the set
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    let config = get_logger_config();

    if level == LogLevel::Error {
        return true;
    }

    if level == LogLevel::Verbose {
        return config.min_level == LogLevel::Verbose || is_verbose_enabled_for_tag(tag);
    }

    if level > config.min_level {
        return false;
    }

    if level == LogLevel::Debug {
        return is_debug_enabled_for_tag(tag);
    }

    if !config.enabled_tags.is_empty() && !config.enabled_tags.contains(&tag.to_debug_key()) {
        return false;
    }

    true
}

/// Internal logging function with automatic filtering
pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level, message);
}

#[cfg(test)]
mod tests {
    use super::super::config::{set_logger_config, LoggerConfig};
    use super::*;

    #[test]
    fn test_filtering_rules() {
        let mut config = LoggerConfig::default();
        config.min_level = LogLevel::Debug;
        config.debug_tags.insert("poller".to_string());
        set_logger_config(config);

        assert!(should_log(&LogTag::Transport, LogLevel::Error));
        assert!(should_log(&LogTag::Transport, LogLevel::Info));
        assert!(should_log(&LogTag::Poller, LogLevel::Debug));
        assert!(!should_log(&LogTag::Transport, LogLevel::Debug));
        assert!(!should_log(&LogTag::Poller, LogLevel::Verbose));

        set_logger_config(LoggerConfig::default());
        assert!(!should_log(&LogTag::Poller, LogLevel::Debug));
    }
}
