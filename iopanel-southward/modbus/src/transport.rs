//! Transport seam between the channel client and a Modbus TCP stack.
//!
//! [`TcpConnector`] is the production implementation on top of
//! `tokio-modbus`. The client only ever talks to the object-safe
//! [`Connector`] / [`RegisterTransport`] traits, so tests can substitute an
//! in-memory device.

use async_trait::async_trait;
use iopanel_sdk::{Endpoint, TransportError};
use std::{future::Future, net::SocketAddr, time::Duration};
use tokio::{net::lookup_host, time::timeout};
use tokio_modbus::{
    client::{tcp, Client as _, Context, Reader as _, Writer as _},
    Slave,
};
use tracing::{debug, warn};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// An established session able to exchange holding register requests with
/// one unit.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Function code 0x03.
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Function code 0x06.
    async fn write_single_register(&mut self, address: u16, value: u16)
        -> Result<(), TransportError>;

    /// Close the session. Called at most once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
    ) -> Result<Box<dyn RegisterTransport>, TransportError>;
}

/// `tokio-modbus` TCP connector with connect and per-request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, TransportError> {
        let addrs: Vec<SocketAddr> = lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| TransportError::Resolve {
                host: endpoint.host.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                host: endpoint.host.clone(),
                reason: "no addresses returned".to_string(),
            });
        }
        Ok(addrs)
    }

    /// Try each resolved address in order; the last failure is reported.
    async fn connect_any(
        addrs: Vec<SocketAddr>,
        unit_id: u8,
    ) -> Result<(SocketAddr, Context), TransportError> {
        let mut last_error = None;
        for addr in addrs {
            debug!(%addr, unit_id, "Opening Modbus TCP session");
            match tcp::connect_slave(addr, Slave(unit_id)).await {
                Ok(ctx) => return Ok((addr, ctx)),
                Err(e) => {
                    debug!(%addr, error = %e, "Modbus TCP connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(TransportError::Io(match last_error {
            Some(e) => format!("Modbus TCP connect error: {e}"),
            None => "Modbus TCP connect error: no address to try".to_string(),
        }))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
    ) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let attempt = async {
            let addrs = Self::resolve(endpoint).await?;
            Self::connect_any(addrs, unit_id).await
        };
        let (peer, ctx) = timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        Ok(Box::new(TcpTransport {
            ctx,
            peer,
            io_timeout: self.io_timeout,
        }))
    }
}

/// Live `tokio-modbus` client context bound to one unit id.
pub struct TcpTransport {
    ctx: Context,
    peer: SocketAddr,
    io_timeout: Duration,
}

/// Run one request under the I/O timeout and flatten the nested
/// transport/exception result.
async fn run_op<T, Fut>(
    io_timeout: Duration,
    op_label: &'static str,
    op: Fut,
) -> Result<T, TransportError>
where
    Fut: Future<Output = tokio_modbus::Result<T>>,
{
    match timeout(io_timeout, op).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(code))) => Err(TransportError::Exception(format!(
            "{op_label} rejected by device: {code:?}"
        ))),
        Ok(Err(e)) => {
            warn!(op = op_label, err = %e, "Modbus transport error");
            Err(TransportError::Io(e.to_string()))
        }
        Err(_elapsed) => {
            warn!(
                op = op_label,
                timeout_ms = io_timeout.as_millis() as u64,
                "Modbus operation timeout"
            );
            Err(TransportError::Timeout(io_timeout))
        }
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        run_op(
            self.io_timeout,
            "ReadHoldingRegisters",
            self.ctx.read_holding_registers(address, count),
        )
        .await
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        run_op(
            self.io_timeout,
            "WriteSingleRegister",
            self.ctx.write_single_register(address, value),
        )
        .await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(peer = %self.peer, "Closing Modbus TCP session");
        match timeout(self.io_timeout, self.ctx.disconnect()).await {
            Ok(res) => res.map_err(|e| TransportError::Io(e.to_string())),
            Err(_) => Err(TransportError::Timeout(self.io_timeout)),
        }
    }
}
