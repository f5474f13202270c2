use crate::{
    codec::RegisterCodec,
    transport::{Connector, RegisterTransport},
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use iopanel_sdk::{
    ChannelState, ConnectError, ConnectionState, DisconnectError, Endpoint, PanelConfig,
    ReadError, RegisterPolicy, TransportError, WriteError, MAX_READ_REGISTERS,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Addressing parameters of one client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClientConfig {
    pub unit_id: u8,
    /// Register address of channel 0.
    pub start_address: u16,
    pub channel_count: u16,
    pub policy: RegisterPolicy,
}

impl Default for ChannelClientConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            start_address: 0,
            channel_count: 12,
            policy: RegisterPolicy::StrictSentinel,
        }
    }
}

impl From<&PanelConfig> for ChannelClientConfig {
    fn from(config: &PanelConfig) -> Self {
        Self {
            unit_id: config.unit_id,
            start_address: config.start_address,
            channel_count: config.channel_count,
            policy: config.register_policy,
        }
    }
}

/// Point-in-time health snapshot of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDiagnostics {
    pub connection_state: ConnectionState,
    pub endpoint: Option<Endpoint>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Rolling average over successful requests.
    pub average_response_time: Duration,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ClientDiagnostics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.successful_requests as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct RequestMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    avg_response_time_ms: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
    last_activity: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl RequestMetrics {
    fn record<T>(&self, result: &Result<T, TransportError>, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(_) => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                let elapsed_ms = elapsed.as_millis() as u64;
                let prev = self.avg_response_time_ms.load(Ordering::Acquire);
                let new_avg = if prev == 0 {
                    elapsed_ms
                } else {
                    (prev.saturating_mul(9) + elapsed_ms) / 10
                };
                self.avg_response_time_ms.store(new_avg, Ordering::Release);
            }
            Err(e) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                self.set_last_error(e);
            }
        }
        self.touch();
    }

    fn set_last_error(&self, error: &TransportError) {
        let _ = self
            .last_error
            .lock()
            .map(|mut g| *g = Some(error.to_string()));
    }

    fn touch(&self) {
        let _ = self.last_activity.lock().map(|mut g| *g = Some(Utc::now()));
    }
}

/// Resets a `Connecting` state left behind by an abandoned connect.
struct ConnectingGuard<'a> {
    state_tx: &'a watch::Sender<ConnectionState>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state_tx.send_if_modified(|state| {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
    }
}

/// Modbus TCP client for a bank of discrete output channels, each mapped to
/// one holding register at `start_address + index`.
///
/// The transport lives behind a single fair async mutex: requests issued
/// concurrently from the poller and from user actions are executed one at a
/// time in arrival order, and a write is never reordered with a read queued
/// after it. Connection state is published through a `watch` channel and is
/// checked before any request is queued, so calls on a client that is not
/// `Connected` fail without touching the network.
pub struct ModbusChannelClient {
    config: ChannelClientConfig,
    connector: Arc<dyn Connector>,
    /// Present only while connected
    session: Mutex<Option<Box<dyn RegisterTransport>>>,
    state_tx: watch::Sender<ConnectionState>,
    endpoint: ArcSwapOption<Endpoint>,
    metrics: RequestMetrics,
}

impl ModbusChannelClient {
    pub fn new(config: ChannelClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            session: Mutex::new(None),
            state_tx,
            endpoint: ArcSwapOption::empty(),
            metrics: RequestMetrics::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ChannelClientConfig {
        &self.config
    }

    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    #[inline]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Endpoint of the current or most recent connection attempt.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.load_full().map(|e| (*e).clone())
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(from = %state, to = %next, "Connection state changed");
                *state = next;
                true
            }
        });
    }

    /// Atomically move `from` -> `to`; false if the current state differs.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == from {
                debug!(from = %from, to = %to, "Connection state changed");
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn begin_connect(&self) -> Result<(), ConnectError> {
        let mut outcome = Ok(());
        self.state_tx.send_if_modified(|state| match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting => {
                outcome = Err(ConnectError::ConnectionInProgress);
                false
            }
            ConnectionState::Connected => {
                outcome = Err(ConnectError::AlreadyConnected);
                false
            }
            ConnectionState::Disconnecting => {
                outcome = Err(ConnectError::DisconnectInProgress);
                false
            }
        });
        outcome
    }

    /// Open the connection to `endpoint`.
    ///
    /// The endpoint is validated before any state change. On a transport
    /// failure the state returns to `Disconnected`.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnectError> {
        endpoint.validate()?;
        self.begin_connect()?;
        let guard = ConnectingGuard {
            state_tx: &self.state_tx,
            armed: true,
        };
        self.endpoint.store(Some(Arc::new(endpoint.clone())));

        let mut session = self.session.lock().await;
        if session.is_some() {
            // Lost a race with a connect that completed while we were queued
            return Err(ConnectError::AlreadyConnected);
        }

        info!(endpoint = %endpoint, unit_id = self.config.unit_id, "Connecting to Modbus device");
        match self.connector.connect(&endpoint, self.config.unit_id).await {
            Ok(mut transport) => {
                self.metrics.touch();
                if self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
                    *session = Some(transport);
                    guard.disarm();
                    info!(endpoint = %endpoint, "Modbus device connected");
                    Ok(())
                } else {
                    // A disconnect arrived while the socket was opening
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "Closing superseded session failed");
                    }
                    Err(ConnectError::DisconnectInProgress)
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Modbus connect failed");
                self.metrics.set_last_error(&e);
                self.metrics.touch();
                drop(guard);
                Err(ConnectError::Transport(e))
            }
        }
    }

    /// Close the connection.
    ///
    /// Publishes `Disconnecting` first so that new requests fail fast, then
    /// waits for the request holding the transport to finish before closing
    /// it. The state always ends `Disconnected`; a close failure is reported
    /// afterwards. Succeeds without I/O when already disconnected.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let proceed = self.state_tx.send_if_modified(|state| match *state {
            ConnectionState::Disconnected => false,
            _ => {
                *state = ConnectionState::Disconnecting;
                true
            }
        });
        if !proceed {
            return Ok(());
        }

        let transport = self.session.lock().await.take();
        let result = match transport {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        };
        self.set_state(ConnectionState::Disconnected);
        self.metrics.touch();

        match result {
            Ok(()) => {
                info!("Modbus device disconnected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Modbus session did not close cleanly");
                self.metrics.set_last_error(&e);
                Err(DisconnectError::Transport(e))
            }
        }
    }

    /// Register address for `index`, if it names a configured channel.
    #[inline]
    pub fn channel_address(&self, index: u16) -> Option<u16> {
        if index >= self.config.channel_count {
            return None;
        }
        self.config.start_address.checked_add(index)
    }

    async fn timed<T, Fut>(&self, op: Fut) -> Result<T, TransportError>
    where
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let started = Instant::now();
        let result = op.await;
        self.metrics.record(&result, started.elapsed());
        result
    }

    /// Command channel `index` on or off with a single register write.
    ///
    /// A failed write leaves the connection open.
    pub async fn write_channel(&self, index: u16, is_on: bool) -> Result<(), WriteError> {
        if !self.connection_state().is_connected() {
            return Err(WriteError::NotConnected);
        }
        let address = self
            .channel_address(index)
            .ok_or(WriteError::InvalidIndex {
                index,
                channel_count: self.config.channel_count,
            })?;
        let value = RegisterCodec::encode(is_on, self.config.policy);

        let mut session = self.session.lock().await;
        if !self.connection_state().is_connected() {
            return Err(WriteError::NotConnected);
        }
        let transport = session.as_mut().ok_or(WriteError::NotConnected)?;

        debug!(index, address, value, "Writing channel register");
        self.timed(transport.write_single_register(address, value))
            .await
            .map_err(|e| {
                warn!(index, address, error = %e, "Channel write failed");
                WriteError::Transport(e)
            })
    }

    /// Read `count` consecutive channels starting at channel 0 with one
    /// holding register request.
    pub async fn read_all_channels(&self, count: u16) -> Result<Vec<ChannelState>, ReadError> {
        if !self.connection_state().is_connected() {
            return Err(ReadError::NotConnected);
        }
        let start_address = self.config.start_address;
        if count == 0
            || count > MAX_READ_REGISTERS
            || start_address.checked_add(count - 1).is_none()
        {
            return Err(ReadError::InvalidCount {
                count,
                start_address,
            });
        }

        let mut session = self.session.lock().await;
        if !self.connection_state().is_connected() {
            return Err(ReadError::NotConnected);
        }
        let transport = session.as_mut().ok_or(ReadError::NotConnected)?;

        let values = self
            .timed(async {
                let values = transport
                    .read_holding_registers(start_address, count)
                    .await?;
                if values.len() != count as usize {
                    return Err(TransportError::UnexpectedLength {
                        expected: count,
                        actual: values.len(),
                    });
                }
                Ok(values)
            })
            .await
            .map_err(|e| {
                warn!(start_address, count, error = %e, "Channel read failed");
                ReadError::Transport(e)
            })?;
        drop(session);

        let states = RegisterCodec::decode_channels(&values, self.config.policy);
        debug!(count, on = states.iter().filter(|s| s.is_on).count(), "Read channel states");
        Ok(states)
    }

    /// Read every configured channel.
    #[inline]
    pub async fn read_channels(&self) -> Result<Vec<ChannelState>, ReadError> {
        self.read_all_channels(self.config.channel_count).await
    }

    pub fn diagnostics(&self) -> ClientDiagnostics {
        ClientDiagnostics {
            connection_state: self.connection_state(),
            endpoint: self.endpoint(),
            total_requests: self.metrics.total_requests.load(Ordering::Acquire),
            successful_requests: self.metrics.successful_requests.load(Ordering::Acquire),
            failed_requests: self.metrics.failed_requests.load(Ordering::Acquire),
            average_response_time: Duration::from_millis(
                self.metrics.avg_response_time_ms.load(Ordering::Acquire),
            ),
            last_error: self
                .metrics
                .last_error
                .lock()
                .ok()
                .and_then(|g| g.clone()),
            last_activity: self.metrics.last_activity.lock().ok().and_then(|g| *g),
        }
    }
}
