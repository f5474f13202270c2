use crate::types::OperationKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidEndpoint,
    AlreadyConnected,
    ConnectionInProgress,
    DisconnectInProgress,
    NotConnected,
    InvalidIndex,
    InvalidCount,
    AlreadyRunning,
    Stopping,
    InvalidInterval,
    Configuration,
    Transport,
}

/// Failure raised by the underlying Modbus TCP stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Read/Write timeout after {0:?}")]
    Timeout(Duration),
    #[error("Expected {expected} registers, received {actual}")]
    UnexpectedLength { expected: u16, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Connection attempt already in progress")]
    ConnectionInProgress,
    #[error("Disconnect in progress")]
    DisconnectInProgress,
    #[error("Connect failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("Disconnect failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid channel index {index} (channel count {channel_count})")]
    InvalidIndex { index: u16, channel_count: u16 },
    #[error("Write failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid register count {count} starting at {start_address}")]
    InvalidCount { count: u16, start_address: u16 },
    #[error("Read failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("Poller already running")]
    AlreadyRunning,
    #[error("Poller is stopping")]
    Stopping,
    #[error("Poll interval must be greater than zero")]
    InvalidInterval,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error returned by controller-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Disconnect(#[from] DisconnectError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Poller(#[from] PollerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            Self::AlreadyConnected => ErrorKind::AlreadyConnected,
            Self::ConnectionInProgress => ErrorKind::ConnectionInProgress,
            Self::DisconnectInProgress => ErrorKind::DisconnectInProgress,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl DisconnectError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidIndex { .. } => ErrorKind::InvalidIndex,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidCount { .. } => ErrorKind::InvalidCount,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl PollerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning => ErrorKind::AlreadyRunning,
            Self::Stopping => ErrorKind::Stopping,
            Self::InvalidInterval => ErrorKind::InvalidInterval,
        }
    }
}

impl PanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(e) => e.kind(),
            Self::Disconnect(e) => e.kind(),
            Self::Write(e) => e.kind(),
            Self::Read(e) => e.kind(),
            Self::Poller(e) => e.kind(),
            Self::Config(_) => ErrorKind::Configuration,
        }
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Connect(_) | Self::Config(_) => OperationKind::Connect,
            Self::Disconnect(_) => OperationKind::Disconnect,
            Self::Write(_) => OperationKind::Write,
            Self::Read(_) => OperationKind::Read,
            Self::Poller(_) => OperationKind::Poll,
        }
    }

    /// The underlying transport cause, if this failure came from the wire.
    pub fn transport_cause(&self) -> Option<&TransportError> {
        match self {
            Self::Connect(ConnectError::Transport(e))
            | Self::Disconnect(DisconnectError::Transport(e))
            | Self::Write(WriteError::Transport(e))
            | Self::Read(ReadError::Transport(e)) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_keep_cause_in_message() {
        let err = WriteError::from(TransportError::Io("connection reset by peer".into()));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn test_panel_error_maps_operation_and_kind() {
        let err = PanelError::from(ReadError::NotConnected);
        assert_eq!(err.operation(), OperationKind::Read);
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(err.transport_cause().is_none());

        let err = PanelError::from(ConnectError::Transport(TransportError::Timeout(
            Duration::from_secs(5),
        )));
        assert_eq!(err.operation(), OperationKind::Connect);
        assert_eq!(
            err.transport_cause(),
            Some(&TransportError::Timeout(Duration::from_secs(5)))
        );
    }
}
