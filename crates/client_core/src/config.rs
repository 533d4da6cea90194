use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_CONTROLLER_URL: &str = "ws://127.0.0.1:16621";
pub const DEFAULT_SURFACE_ID: &str = "automation-direct";

/// Consecutive network failures add one unit of backoff each, up to this many units.
pub const RECONNECT_CEILING_UNITS: u32 = 5;
/// Unexpected internal failures always wait this many units.
pub const INTERNAL_FAILURE_UNITS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub surface_id: String,
    pub request_timeout: Duration,
    pub reconnect_unit: Duration,
    pub interaction_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CONTROLLER_URL.into(),
            surface_id: DEFAULT_SURFACE_ID.into(),
            request_timeout: Duration::from_secs(1),
            reconnect_unit: Duration::from_secs(1),
            interaction_queue_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        validate_url(&url)?;
        Ok(Self {
            url,
            ..Self::default()
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_unit(mut self, unit: Duration) -> Self {
        self.reconnect_unit = unit;
        self
    }

    pub fn with_surface_id(mut self, surface_id: impl Into<String>) -> Self {
        self.surface_id = surface_id.into();
        self
    }

    pub fn with_interaction_queue_capacity(mut self, capacity: usize) -> Self {
        self.interaction_queue_capacity = capacity.max(1);
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            unit: self.reconnect_unit,
            ceiling_units: RECONNECT_CEILING_UNITS,
            internal_failure_units: INTERNAL_FAILURE_UNITS,
        }
    }
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}', expected ws:// or wss://"),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub unit: Duration,
    pub ceiling_units: u32,
    pub internal_failure_units: u32,
}

/// Reconnect delay bookkeeping for the transport loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    units: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, units: 1 }
    }

    pub fn reset(&mut self) {
        self.units = 1;
    }

    /// Delay after a network-level failure; grows by one unit per consecutive failure.
    pub fn next_network_delay(&mut self) -> Duration {
        let delay = self.policy.unit * self.units;
        self.units = (self.units + 1).min(self.policy.ceiling_units.max(1));
        delay
    }

    pub fn internal_failure_delay(&self) -> Duration {
        self.policy.unit * self.policy.internal_failure_units
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
