mod config;
mod error;
mod observer;
mod retry;
mod types;

pub type PanelResult<T> = Result<T, PanelError>;

pub use config::{PanelConfig, MAX_READ_REGISTERS};
pub use error::{
    ConfigError, ConnectError, DisconnectError, ErrorKind, PanelError, PollerError, ReadError,
    TransportError, WriteError,
};
pub use observer::PanelObserver;
pub use retry::{build_exponential_backoff, RetryPolicy};
pub use types::{
    ChannelState, ConnectionState, Endpoint, OperationKind, RegisterPolicy, DEFAULT_MODBUS_PORT,
};
