use crate::{
    error::ConfigError,
    types::{Endpoint, RegisterPolicy, DEFAULT_MODBUS_PORT},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest holding register block a single FC 0x03 request may carry.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Per-deployment panel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Remote controller host name or IP address
    #[serde(default = "PanelConfig::default_host")]
    pub host: String,
    /// Remote controller TCP port
    #[serde(default = "PanelConfig::default_port")]
    pub port: u16,
    /// Modbus unit (slave) id
    #[serde(default = "PanelConfig::default_unit_id")]
    pub unit_id: u8,
    /// Register address of channel 0
    #[serde(default)]
    pub start_address: u16,
    /// Number of output channels on the panel
    #[serde(default = "PanelConfig::default_channel_count")]
    pub channel_count: u16,
    /// Register value decoding policy
    #[serde(default)]
    pub register_policy: RegisterPolicy,
    /// Auto-refresh interval; 0 disables polling
    #[serde(default = "PanelConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "PanelConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "PanelConfig::default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Pause between a write and its confirming read; 0 reads immediately
    #[serde(default = "PanelConfig::default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl PanelConfig {
    fn default_host() -> String {
        "127.0.0.1".into()
    }

    fn default_port() -> u16 {
        DEFAULT_MODBUS_PORT
    }

    fn default_unit_id() -> u8 {
        1
    }

    fn default_channel_count() -> u16 {
        12
    }

    fn default_poll_interval_ms() -> u64 {
        5_000
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_io_timeout_ms() -> u64 {
        3_000
    }

    fn default_settle_delay_ms() -> u64 {
        500
    }

    #[inline]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Auto-refresh period, `None` when polling is disabled.
    #[inline]
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    #[inline]
    pub fn settle_delay(&self) -> Option<Duration> {
        (self.settle_delay_ms > 0).then(|| Duration::from_millis(self.settle_delay_ms))
    }

    /// Check structural constraints that the client relies on.
    ///
    /// The endpoint itself is validated on connect, since operators may
    /// override it at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 || self.channel_count > MAX_READ_REGISTERS {
            return Err(ConfigError::new(
                "channel_count",
                format!("must be within 1..={MAX_READ_REGISTERS}"),
            ));
        }
        if self.start_address.checked_add(self.channel_count - 1).is_none() {
            return Err(ConfigError::new(
                "start_address",
                format!(
                    "{} channels starting at {} exceed the register address space",
                    self.channel_count, self.start_address
                ),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::new("connect_timeout_ms", "must be non-zero"));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::new("io_timeout_ms", "must be non-zero"));
        }
        Ok(())
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            unit_id: Self::default_unit_id(),
            start_address: 0,
            channel_count: Self::default_channel_count(),
            register_policy: RegisterPolicy::default(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            io_timeout_ms: Self::default_io_timeout_ms(),
            settle_delay_ms: Self::default_settle_delay_ms(),
        }
    }
}
