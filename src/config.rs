//! Subscriber configuration
//!
//! Mirrors the knobs a deployment actually tunes: where to find producers
//! (static host/port or discovery addresses), the flow-control budget, and
//! the timing of discovery polls and reconnect backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Maximum length of a topic or channel name
const MAX_NAME_LEN: usize = 64;

/// Configuration for a [`Subscriber`](crate::Subscriber)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Static producer host; ignored when `lookup` is non-empty
    pub host: Option<String>,

    /// Static producer port; ignored when `lookup` is non-empty
    pub port: Option<u16>,

    /// Topic to subscribe to
    pub topic: String,

    /// Channel within the topic
    pub channel: String,

    /// Discovery service addresses, either bare `host:port` pairs
    /// (assumed HTTP) or full lookup-service URIs
    pub lookup: Vec<String>,

    /// Total flow-control credit budget across the connection pool
    pub concurrency: u64,

    /// Interval between discovery polls
    pub discover_frequency: Duration,

    /// Margin subtracted from the message timeout when negotiating the
    /// connection keepalive interval
    pub keepalive_offset: Duration,

    /// Per-request timeout for discovery queries and connection handshakes
    pub timeout: Duration,

    /// Consecutive connect failures before a connection is dropped for good
    pub max_connect_attempts: u32,

    /// Per-attempt reconnect delay factor (delay = factor × attempt, capped)
    pub reconnect_delay_factor: Duration,

    /// Cap on the reconnect delay
    pub max_reconnect_delay: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            topic: String::new(),
            channel: String::new(),
            lookup: Vec::new(),
            concurrency: 1,
            discover_frequency: Duration::from_secs(300),
            keepalive_offset: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
            max_connect_attempts: 5,
            reconnect_delay_factor: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_secs(120),
        }
    }
}

impl SubscriberConfig {
    /// Whether discovery mode is active (lookup addresses configured)
    pub fn discovery_mode(&self) -> bool {
        !self.lookup.is_empty()
    }

    /// Validate the configuration.
    ///
    /// Misconfiguration is fatal at construction; everything that can be
    /// checked without touching the network is checked here.
    pub fn validate(&self) -> Result<()> {
        validate_name("topic", &self.topic)?;
        validate_name("channel", &self.channel)?;

        if self.lookup.is_empty() && (self.host.is_none() || self.port.is_none()) {
            return Err(ClientError::Configuration(
                "either host and port or at least one lookup address must be supplied".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ClientError::Configuration(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.discover_frequency.is_zero() {
            return Err(ClientError::Configuration(
                "discover_frequency must be greater than 0".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(ClientError::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_connect_attempts == 0 {
            return Err(ClientError::Configuration(
                "max_connect_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Topic and channel names: `[A-Za-z0-9._-]`, at most 64 characters, with an
/// optional trailing `#ephemeral` marker.
fn validate_name(what: &str, name: &str) -> Result<()> {
    let base = name.strip_suffix("#ephemeral").unwrap_or(name);

    if base.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ClientError::Configuration(format!(
            "{} must be 1-{} characters, got {:?}",
            what, MAX_NAME_LEN, name
        )));
    }

    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ClientError::Configuration(format!(
            "{} contains invalid characters: {:?}",
            what, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SubscriberConfig {
        SubscriberConfig {
            topic: "events".to_string(),
            channel: "workers".to_string(),
            lookup: vec!["127.0.0.1:4161".to_string()],
            ..SubscriberConfig::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SubscriberConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.discover_frequency, Duration::from_secs(300));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.reconnect_delay_factor, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(120));
        assert_eq!(config.keepalive_offset, Duration::from_millis(500));
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn ephemeral_names_pass() {
        let mut config = valid();
        config.channel = "workers#ephemeral".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn requires_host_port_or_lookup() {
        let mut config = valid();
        config.lookup.clear();
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration(_))
        ));

        config.host = Some("127.0.0.1".to_string());
        config.port = Some(4150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        let mut config = valid();
        config.topic = String::new();
        assert!(config.validate().is_err());

        config.topic = "has spaces".to_string();
        assert!(config.validate().is_err());

        config.topic = "x".repeat(65);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_knobs() {
        let mut config = valid();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.discover_frequency = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_connect_attempts = 0;
        assert!(config.validate().is_err());
    }
}
