use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("t_ping must be greater than zero")]
    ZeroProbeInterval,

    #[error("eviction window {window} must cover the full probe budget of {budget} ticks")]
    EvictionWindowTooShort { window: u64, budget: u64 },

    #[error("protocol period must be greater than zero")]
    ZeroProtocolPeriod,
}

/// Protocol timing, in ticks of the injected clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probe interval; also the direct-ack deadline. Indirect acks get a second `t_ping`.
    pub t_ping: u64,

    /// Age after which a silent member or a rumor is dropped.
    pub eviction_window: u64,

    /// Helpers asked to probe indirectly once the direct deadline passes.
    pub forward_pingers: usize,

    /// Wall-clock length of one tick for the threaded runtime.
    #[serde(with = "millis")]
    pub protocol_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            t_ping: 2,
            eviction_window: 6,
            forward_pingers: 3,
            protocol_period: Duration::from_millis(200),
        };
    }
}

impl Config {
    pub fn with_t_ping(mut self, t_ping: u64) -> Self {
        self.t_ping = t_ping;
        return self;
    }

    pub fn with_eviction_window(mut self, eviction_window: u64) -> Self {
        self.eviction_window = eviction_window;
        return self;
    }

    pub fn with_forward_pingers(mut self, forward_pingers: usize) -> Self {
        self.forward_pingers = forward_pingers;
        return self;
    }

    pub fn with_protocol_period(mut self, protocol_period: Duration) -> Self {
        self.protocol_period = protocol_period;
        return self;
    }

    /// Ticks after which an unanswered probe declares its target dead.
    pub fn probe_budget(&self) -> u64 {
        return self.t_ping.saturating_mul(2);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.t_ping == 0 {
            return Err(ConfigError::ZeroProbeInterval);
        }
        if self.eviction_window < self.probe_budget() {
            return Err(ConfigError::EvictionWindowTooShort { window: self.eviction_window, budget: self.probe_budget() });
        }
        if self.protocol_period.is_zero() {
            return Err(ConfigError::ZeroProtocolPeriod);
        }
        return Ok(());
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return (duration.as_millis() as u64).serialize(serializer);
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        return Ok(Duration::from_millis(u64::deserialize(deserializer)?));
    }
}
