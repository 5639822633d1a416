/// Centralized argument handling for helpdesk-sync
///
/// Stores the process arguments once and answers flag queries from anywhere
/// in the crate. The logger uses it to decide which `--debug-<module>` output
/// to show; the CLI host uses clap for its own subcommands.
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Overrides the stored arguments (used by tests and embedding hosts)
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        // Poisoned mutex: fall back to the real process arguments
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value following a flag, if any
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// =============================================================================

/// Push channel debug mode
pub fn is_debug_transport_enabled() -> bool {
    has_arg("--debug-transport")
}

/// Heartbeat ping/pong debug mode
pub fn is_debug_heartbeat_enabled() -> bool {
    has_arg("--debug-heartbeat")
}

/// Room subscription debug mode
pub fn is_debug_subscriptions_enabled() -> bool {
    has_arg("--debug-subscriptions")
}

/// Fallback poller debug mode
pub fn is_debug_poller_enabled() -> bool {
    has_arg("--debug-poller")
}

/// State store debug mode
pub fn is_debug_store_enabled() -> bool {
    has_arg("--debug-store")
}

/// Coordinator debug mode
pub fn is_debug_coordinator_enabled() -> bool {
    has_arg("--debug-coordinator")
}

/// Verbose tracing for every module
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Only warnings and errors
pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet")
}

/// Gets a list of all enabled debug modes
pub fn get_enabled_debug_modes() -> Vec<&'static str> {
    let checks: [(&'static str, fn() -> bool); 6] = [
        ("transport", is_debug_transport_enabled),
        ("heartbeat", is_debug_heartbeat_enabled),
        ("subscriptions", is_debug_subscriptions_enabled),
        ("poller", is_debug_poller_enabled),
        ("store", is_debug_store_enabled),
        ("coordinator", is_debug_coordinator_enabled),
    ];

    checks
        .iter()
        .filter(|(_, enabled)| enabled())
        .map(|(name, _)| *name)
        .collect()
}

/// Checks if any debug mode is enabled
pub fn is_any_debug_enabled() -> bool {
    !get_enabled_debug_modes().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share the global store, so they run in one test
    #[test]
    fn test_flag_lookup() {
        set_cmd_args(vec![
            "helpdesk-sync".to_string(),
            "--debug-poller".to_string(),
            "--config".to_string(),
            "sync.toml".to_string(),
        ]);

        assert!(has_arg("--debug-poller"));
        assert!(!has_arg("--debug-transport"));
        assert_eq!(get_arg_value("--config"), Some("sync.toml".to_string()));
        assert_eq!(get_arg_value("sync.toml"), None);
        assert_eq!(get_enabled_debug_modes(), vec!["poller"]);
        assert!(is_any_debug_enabled());

        set_cmd_args(vec!["helpdesk-sync".to_string()]);
        assert!(!is_any_debug_enabled());
    }
}
