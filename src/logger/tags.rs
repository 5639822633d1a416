/// Log tags, one per synchronization module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Transport,
    Heartbeat,
    Subscriptions,
    Poller,
    Store,
    Coordinator,
}

impl LogTag {
    /// Key used by `--debug-<key>` flags
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Transport => "transport",
            LogTag::Heartbeat => "heartbeat",
            LogTag::Subscriptions => "subscriptions",
            LogTag::Poller => "poller",
            LogTag::Store => "store",
            LogTag::Coordinator => "coordinator",
        }
        .to_string()
    }

    /// Uppercase label printed in the tag column
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Transport => "TRANSPORT",
            LogTag::Heartbeat => "HEARTBEAT",
            LogTag::Subscriptions => "ROOMS",
            LogTag::Poller => "POLLER",
            LogTag::Store => "STORE",
            LogTag::Coordinator => "COORD",
        }
    }
}
