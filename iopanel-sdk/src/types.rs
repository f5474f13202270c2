use crate::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard Modbus TCP port, used whenever an endpoint omits one.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Remote Modbus TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "Endpoint::default_port")]
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn default_port() -> u16 {
        DEFAULT_MODBUS_PORT
    }

    /// Parse an `host:port` string as typed by an operator.
    ///
    /// A missing or unparsable port falls back to [`DEFAULT_MODBUS_PORT`];
    /// surrounding whitespace is ignored. The result is not validated, call
    /// [`Endpoint::validate`] before connecting.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        match input.split_once(':') {
            Some((host, port)) => Self {
                host: host.trim().to_string(),
                port: port.trim().parse().unwrap_or(DEFAULT_MODBUS_PORT),
            },
            None => Self {
                host: input.to_string(),
                port: DEFAULT_MODBUS_PORT,
            },
        }
    }

    /// Reject endpoints that can never be connected to.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.host.trim().is_empty() {
            return Err(ConnectError::InvalidEndpoint("host is empty".to_string()));
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(ConnectError::InvalidEndpoint(format!(
                "host '{}' contains whitespace",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ConnectError::InvalidEndpoint(
                "port must be within 1..=65535".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Decoded state of one output channel as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub index: u16,
    pub is_on: bool,
}

impl ChannelState {
    #[inline]
    pub fn new(index: u16, is_on: bool) -> Self {
        Self { index, is_on }
    }
}

/// How a holding register value maps to a channel's on/off state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterPolicy {
    /// ON is exactly `0x100`, OFF is `0x200`; any other value reads as OFF.
    #[default]
    StrictSentinel,
    /// Any nonzero value reads as ON.
    NonZero,
}

/// Connection lifecycle of a single Modbus client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
        };
        f.write_str(s)
    }
}

/// The operation a failure report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Connect,
    Disconnect,
    Write,
    Read,
    Poll,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Write => "write",
            Self::Read => "read",
            Self::Poll => "poll",
        };
        f.write_str(s)
    }
}
