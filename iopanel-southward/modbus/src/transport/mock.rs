//! In-memory Modbus device for exercising the client without a socket.

use super::{Connector, RegisterTransport};
use async_trait::async_trait;
use iopanel_sdk::{Endpoint, TransportError};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::time::sleep;

/// A request observed by the mock device, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    Connect { endpoint: Endpoint, unit_id: u8 },
    Read { address: u16, count: u16 },
    Write { address: u16, value: u16 },
    Close,
}

#[derive(Debug, Default)]
struct DeviceState {
    registers: BTreeMap<u16, u16>,
    requests: Vec<MockRequest>,
    connect_delay: Duration,
    read_delay: Duration,
    connect_error: Option<TransportError>,
    read_error: Option<TransportError>,
    write_error: Option<TransportError>,
    close_error: Option<TransportError>,
    short_reads: bool,
    reads_in_flight: usize,
    max_reads_in_flight: usize,
}

/// Shared handle to a scriptable device; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Preload registers starting at `start`.
    pub fn with_registers(self, start: u16, values: &[u16]) -> Self {
        {
            let mut state = self.lock();
            for (offset, value) in (0u16..).zip(values) {
                state.registers.insert(start + offset, *value);
            }
        }
        self
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.lock().read_delay = delay;
    }

    pub fn fail_connect(&self, error: Option<TransportError>) {
        self.lock().connect_error = error;
    }

    pub fn fail_reads(&self, error: Option<TransportError>) {
        self.lock().read_error = error;
    }

    pub fn fail_writes(&self, error: Option<TransportError>) {
        self.lock().write_error = error;
    }

    pub fn fail_close(&self, error: Option<TransportError>) {
        self.lock().close_error = error;
    }

    /// Answer reads with one register fewer than requested.
    pub fn short_reads(&self, enabled: bool) {
        self.lock().short_reads = enabled;
    }

    pub fn register(&self, address: u16) -> u16 {
        self.lock().registers.get(&address).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests other than connect/close.
    pub fn io_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| matches!(r, MockRequest::Read { .. } | MockRequest::Write { .. }))
            .count()
    }

    pub fn read_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| matches!(r, MockRequest::Read { .. }))
            .count()
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                MockRequest::Write { address, value } => Some((*address, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn reads_in_flight(&self) -> usize {
        self.lock().reads_in_flight
    }

    pub fn max_reads_in_flight(&self) -> usize {
        self.lock().max_reads_in_flight
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }
}

/// Connector handing out transports bound to a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        unit_id: u8,
    ) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let (delay, error) = {
            let mut state = self.device.lock();
            state.requests.push(MockRequest::Connect {
                endpoint: endpoint.clone(),
                unit_id,
            });
            (state.connect_delay, state.connect_error.clone())
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        match error {
            Some(e) => Err(e),
            None => Ok(Box::new(MockTransport {
                device: self.device.clone(),
            })),
        }
    }
}

#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let delay = {
            let mut state = self.device.lock();
            state.requests.push(MockRequest::Read { address, count });
            state.reads_in_flight += 1;
            state.max_reads_in_flight = state.max_reads_in_flight.max(state.reads_in_flight);
            state.read_delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
        let mut state = self.device.lock();
        state.reads_in_flight -= 1;
        if let Some(e) = state.read_error.clone() {
            return Err(e);
        }
        let returned = if state.short_reads {
            count.saturating_sub(1)
        } else {
            count
        };
        Ok((0..returned)
            .map(|offset| {
                state
                    .registers
                    .get(&(address + offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let mut state = self.device.lock();
        state.requests.push(MockRequest::Write { address, value });
        if let Some(e) = state.write_error.clone() {
            return Err(e);
        }
        state.registers.insert(address, value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.device.lock();
        state.requests.push(MockRequest::Close);
        match state.close_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
