/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the config_struct! macro, so a TOML file
/// only needs to mention the values it overrides.
use crate::config_struct;
use crate::topics::{CONNECTED_AGENTS, CONVERSATION_UPDATES, SYSTEM_MODE};
use std::collections::HashSet;
use std::time::Duration;

// ============================================================================
// PUSH CHANNEL CONFIGURATION
// ============================================================================

config_struct! {
    /// Push channel connection, reconnect and heartbeat settings
    pub struct TransportConfig {
        /// WebSocket endpoint of the helpdesk server
        url: String = "ws://127.0.0.1:8000/ws".to_string(),

        /// Upper bound for a single connection attempt
        connect_timeout_ms: u64 = 10_000,

        /// First reconnect delay, doubled per attempt
        reconnect_base_delay_ms: u64 = 1_000,

        /// Cap for the exponential reconnect delay (before jitter)
        reconnect_max_delay_ms: u64 = 30_000,

        /// Attempts after an unexpected drop before giving up
        reconnect_max_attempts: u32 = 8,

        /// Maximum random jitter added to each reconnect delay
        reconnect_jitter_ms: u64 = 250,

        /// Ping cadence while connected
        heartbeat_interval_ms: u64 = 25_000,

        /// Time allowed for the pong after each ping
        pong_timeout_ms: u64 = 10_000,
    }
}

// ============================================================================
// PULL API CONFIGURATION
// ============================================================================

config_struct! {
    /// HTTP API used by the fallback pollers
    pub struct ApiConfig {
        /// Base URL that topic endpoints are joined onto
        base_url: String = "http://127.0.0.1:8000".to_string(),

        /// Pull requests exceeding this are treated as failures
        request_timeout_ms: u64 = 8_000,
    }
}

// ============================================================================
// POLLER CONFIGURATION
// ============================================================================

config_struct! {
    /// Adaptive poll cadence for one topic
    pub struct PollerConfig {
        base_interval_ms: u64 = 5_000,
        max_interval_ms: u64 = 60_000,
        backoff_multiplier: f64 = 2.0,

        /// Skip polls while the push channel is delivering this topic
        suppress_when_push_healthy: bool = true,
    }
}

config_struct! {
    /// A synchronized topic and the endpoint that returns its current value
    pub struct TopicConfig {
        name: String = String::new(),
        endpoint: String = String::new(),
        poller: PollerConfig = PollerConfig::default(),
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration for the synchronization layer
    pub struct Config {
        transport: TransportConfig = TransportConfig::default(),
        api: ApiConfig = ApiConfig::default(),
        topics: Vec<TopicConfig> = default_topics(),
    }
}

fn default_topics() -> Vec<TopicConfig> {
    vec![
        TopicConfig {
            name: CONNECTED_AGENTS.to_string(),
            endpoint: "/api/agents/connected".to_string(),
            poller: PollerConfig::default(),
        },
        TopicConfig {
            name: SYSTEM_MODE.to_string(),
            endpoint: "/api/settings/mode".to_string(),
            poller: PollerConfig {
                base_interval_ms: 10_000,
                max_interval_ms: 120_000,
                ..PollerConfig::default()
            },
        },
        TopicConfig {
            name: CONVERSATION_UPDATES.to_string(),
            endpoint: "/api/conversations/live".to_string(),
            poller: PollerConfig {
                base_interval_ms: 3_000,
                max_interval_ms: 30_000,
                ..PollerConfig::default()
            },
        },
    ]
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Validate push channel configuration
    pub fn validate(&self) -> Result<(), String> {
        let parsed =
            url::Url::parse(&self.url).map_err(|e| format!("Invalid transport url '{}': {}", self.url, e))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(format!("Transport url must use ws:// or wss://, got '{}'", self.url));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be > 0".to_string());
        }
        if self.pong_timeout_ms == 0 {
            return Err("pong_timeout_ms must be > 0".to_string());
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err("reconnect_base_delay_ms must be > 0".to_string());
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err("reconnect_max_delay_ms must be >= reconnect_base_delay_ms".to_string());
        }
        Ok(())
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate pull API configuration
    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| format!("Invalid api base_url '{}': {}", self.base_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("Api base_url must use http:// or https://, got '{}'", self.base_url));
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

impl PollerConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Validate poll cadence
    pub fn validate(&self) -> Result<(), String> {
        if self.base_interval_ms == 0 {
            return Err("base_interval_ms must be > 0".to_string());
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err("max_interval_ms must be >= base_interval_ms".to_string());
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.transport.validate()?;
        self.api.validate()?;

        let mut seen = HashSet::new();
        for topic in &self.topics {
            if topic.name.trim().is_empty() {
                return Err("Topic name cannot be empty".to_string());
            }
            if !seen.insert(topic.name.as_str()) {
                return Err(format!("Duplicate topic '{}'", topic.name));
            }
            if topic.endpoint.trim().is_empty() {
                return Err(format!("Topic '{}' has no endpoint", topic.name));
            }
            topic
                .poller
                .validate()
                .map_err(|e| format!("Topic '{}': {}", topic.name, e))?;
        }

        Ok(())
    }

    /// Look up a topic section by name
    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.topic(SYSTEM_MODE).unwrap().poller.base_interval_ms, 10_000);
        assert_eq!(config.transport.heartbeat_interval(), Duration::from_secs(25));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            url = "wss://support.example.com/ws"
            reconnect_max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.url, "wss://support.example.com/ws");
        assert_eq!(config.transport.reconnect_max_attempts, 3);
        assert_eq!(config.transport.pong_timeout_ms, 10_000);
        assert_eq!(config.topics.len(), 3);
    }

    #[test]
    fn test_validation_rejects_bad_sections() {
        let mut config = Config::default();
        config.transport.url = "http://127.0.0.1/ws".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.topics[0].poller.backoff_multiplier = 0.5;
        assert!(config.validate().unwrap_err().contains("backoff_multiplier"));

        let mut config = Config::default();
        config.topics[1].name = config.topics[0].name.clone();
        assert!(config.validate().unwrap_err().contains("Duplicate"));

        let mut config = Config::default();
        config.topics[2].poller.max_interval_ms = 1;
        assert!(config.validate().is_err());
    }
}
