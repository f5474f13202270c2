pub mod client;
mod codec;
pub mod transport;

pub use client::{ChannelClientConfig, ClientDiagnostics, ModbusChannelClient};
pub use codec::RegisterCodec;
pub use transport::{Connector, RegisterTransport, TcpConnector};
