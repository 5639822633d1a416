/// Pull side of topic synchronization
///
/// A fetch is one idempotent GET returning the topic's current value. The
/// HTTP fetcher attaches the bearer credential and bounds every request with
/// the configured timeout, so a hung endpoint turns into a poll failure.
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::Config;
use crate::errors::{SyncError, SyncResult};
use crate::topics::{Credential, Topic};

#[async_trait]
pub trait TopicFetcher: Send + Sync {
    async fn fetch(&self, topic: &Topic, credential: &Credential) -> SyncResult<Value>;
}

pub struct HttpTopicFetcher {
    client: reqwest::Client,
    base_url: String,
    endpoints: HashMap<Topic, String>,
    request_timeout: Duration,
}

impl HttpTopicFetcher {
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        let request_timeout = config.api.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let endpoints = config
            .topics
            .iter()
            .map(|topic| (Topic::from(topic.name.as_str()), topic.endpoint.clone()))
            .collect();

        Ok(Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            endpoints,
            request_timeout,
        })
    }

    pub fn url_for(&self, topic: &Topic) -> Option<String> {
        let endpoint = self.endpoints.get(topic)?;
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Some(endpoint.clone());
        }
        Some(format!("{}/{}", self.base_url, endpoint.trim_start_matches('/')))
    }
}

#[async_trait]
impl TopicFetcher for HttpTopicFetcher {
    async fn fetch(&self, topic: &Topic, credential: &Credential) -> SyncResult<Value> {
        let url = self
            .url_for(topic)
            .ok_or_else(|| SyncError::Config(format!("No endpoint configured for '{}'", topic)))?;

        let request = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header(reqwest::header::ACCEPT, "application/json")
            .send();

        let response = match timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => {
                return Err(SyncError::Timeout {
                    millis: self.request_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(SyncError::Transport(format!("GET {} failed: {}", url, e))),
            Err(_) => {
                return Err(SyncError::Timeout {
                    millis: self.request_timeout.as_millis() as u64,
                })
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
                endpoint: url,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("Reading {} failed: {}", url, e)))?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::Malformed(format!("{} returned invalid JSON: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, TopicConfig};

    fn config() -> Config {
        let mut config = Config::default();
        config.api = ApiConfig {
            base_url: "http://helpdesk.local:8000/".to_string(),
            ..ApiConfig::default()
        };
        config.topics.push(TopicConfig {
            name: "external".to_string(),
            endpoint: "https://status.example.com/mode".to_string(),
            ..TopicConfig::default()
        });
        config
    }

    #[test]
    fn test_url_resolution() {
        let fetcher = HttpTopicFetcher::from_config(&config()).unwrap();
        assert_eq!(
            fetcher.url_for(&Topic::from("system-mode")).as_deref(),
            Some("http://helpdesk.local:8000/api/settings/mode")
        );
        assert_eq!(
            fetcher.url_for(&Topic::from("external")).as_deref(),
            Some("https://status.example.com/mode")
        );
        assert_eq!(fetcher.url_for(&Topic::from("unknown")), None);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_config_error() {
        let fetcher = HttpTopicFetcher::from_config(&config()).unwrap();
        let result = fetcher
            .fetch(&Topic::from("unknown"), &Credential::new("t"))
            .await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
