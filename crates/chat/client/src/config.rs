//! Connection configuration and reconnect policy.

use std::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// Realtime endpoint (`ws://` or `wss://`).
    pub url: String,
    pub connect_timeout: Duration,
    /// Liveness ping cadence for non-operator identities.
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Automatic reconnect attempts after an unexpected close. Once
    /// exhausted the caller must call `connect()` again.
    pub max_reconnect_attempts: u32,
}

impl ChatClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Delay before reconnect attempt `attempt` (zero-based): the base delay
/// doubled per attempt, capped at the configured maximum.
#[must_use]
pub fn reconnect_backoff(config: &ChatClientConfig, attempt: u32) -> Duration {
    let capped_attempt = attempt.min(8);
    let multiplier = 1_u32 << capped_attempt;
    (config.reconnect_base_delay * multiplier).min(config.reconnect_max_delay)
}
