/// Configuration utilities - loading, saving and validation
///
/// Configuration is loaded once by the host and handed to the coordinator
/// explicitly; there is no process-wide config instance.
use super::schemas::Config;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use std::path::Path;

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "helpdesk-sync.toml";

/// Load and validate configuration from a TOML file
///
/// A missing file is not an error: the built-in defaults are used instead.
///
/// # Example
/// ```no_run
/// use helpdesk_sync::config::load_config_from_path;
///
/// let config = load_config_from_path("helpdesk-sync.toml").unwrap();
/// println!("push channel: {}", config.transport.url);
/// ```
pub fn load_config_from_path(path: impl AsRef<Path>) -> SyncResult<Config> {
    let path = path.as_ref();

    let config = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str::<Config>(&contents).map_err(|e| {
            SyncError::Config(format!("Failed to parse config file '{}': {}", path.display(), e))
        })?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        Config::default()
    };

    config.validate().map_err(SyncError::Config)?;

    logger::debug(
        LogTag::Config,
        &format!(
            "Loaded config from '{}' ({} topics, push url {})",
            path.display(),
            config.topics.len(),
            config.transport.url
        ),
    );

    Ok(config)
}

/// Write a configuration to disk as pretty TOML
pub fn save_config(config: &Config, path: impl AsRef<Path>) -> SyncResult<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| SyncError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, contents)?;
    Ok(())
}
