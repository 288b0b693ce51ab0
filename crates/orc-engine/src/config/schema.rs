use std::time::Duration;

use orc_core::error::{OrcError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    pub connection: ConnectionSection,

    #[serde(default)]
    pub subscriptions: SubscriptionSection,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(OrcError::UnsupportedVersion);
        }

        self.connection.validate()?;
        self.subscriptions.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    pub host: String,

    pub port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,
}

impl ConnectionSection {
    /// Section for `host:port` with every other field at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            send_queue_depth: default_send_queue_depth(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(OrcError::Config("connection.host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(OrcError::Config("connection.port must be between 1 and 65535".into()));
        }
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            return Err(OrcError::Config(
                "connection.connect_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if !(64..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(OrcError::Config(
                "connection.max_frame_bytes must be between 64 and 67108864".into(),
            ));
        }
        if !(1..=65_536).contains(&self.send_queue_depth) {
            return Err(OrcError::Config(
                "connection.send_queue_depth must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionSection {
    /// 0 disables expiry.
    #[serde(default)]
    pub ttl_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            ttl_ms: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl SubscriptionSection {
    pub fn validate(&self) -> Result<()> {
        if self.ttl_ms != 0 && !(1_000..=86_400_000).contains(&self.ttl_ms) {
            return Err(OrcError::Config(
                "subscriptions.ttl_ms must be 0 or between 1000 and 86400000".into(),
            ));
        }
        if !(100..=600_000).contains(&self.sweep_interval_ms) {
            return Err(OrcError::Config(
                "subscriptions.sweep_interval_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
fn default_send_queue_depth() -> usize {
    1024
}
fn default_sweep_interval_ms() -> u64 {
    5000
}
