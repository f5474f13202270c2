use crate::poller::Poller;
use backoff::backoff::Backoff;
use iopanel_driver_modbus::{ClientDiagnostics, Connector, ModbusChannelClient, TcpConnector};
use iopanel_sdk::{
    build_exponential_backoff, ChannelState, ConnectError, ConnectionState, Endpoint,
    OperationKind, PanelConfig, PanelError, PanelObserver, PanelResult, RetryPolicy,
};
use std::sync::Arc;
use tokio::{
    sync::{watch, Mutex},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drives one [`ModbusChannelClient`] and its [`Poller`] for a fixed bank of
/// channels, reporting every outcome to a presentation observer.
///
/// Channel states shown to the observer always come from a device read;
/// after a toggle the controller waits for the device to settle and reads
/// back instead of assuming the commanded state.
pub struct ChannelPanelController {
    config: PanelConfig,
    client: Arc<ModbusChannelClient>,
    poller: Poller,
    observer: Arc<dyn PanelObserver>,
    /// Serializes connect and disconnect so polling never outlives a session
    lifecycle: Mutex<()>,
    /// Stops the connection state forwarder
    cancel_token: CancellationToken,
}

impl ChannelPanelController {
    /// Controller speaking Modbus TCP. Must be called from within a tokio
    /// runtime.
    pub fn new(config: PanelConfig, observer: Arc<dyn PanelObserver>) -> PanelResult<Self> {
        let connector = Arc::new(TcpConnector::new(
            config.connect_timeout(),
            config.io_timeout(),
        ));
        Self::with_connector(config, connector, observer)
    }

    pub fn with_connector(
        config: PanelConfig,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn PanelObserver>,
    ) -> PanelResult<Self> {
        config.validate()?;
        let client = Arc::new(ModbusChannelClient::new((&config).into(), connector));
        let cancel_token = CancellationToken::new();
        Self::spawn_state_forwarder(
            client.subscribe_connection_state(),
            Arc::clone(&observer),
            cancel_token.clone(),
        );

        Ok(Self {
            config,
            client,
            poller: Poller::new(),
            observer,
            lifecycle: Mutex::new(()),
            cancel_token,
        })
    }

    /// Forward connection state changes to the observer. Rapid successive
    /// changes may be coalesced into the latest one.
    fn spawn_state_forwarder(
        mut rx: watch::Receiver<ConnectionState>,
        observer: Arc<dyn PanelObserver>,
        token: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *rx.borrow_and_update();
                        observer.on_connection_state_changed(state);
                    }
                }
            }
            debug!("Connection state forwarder exited");
        });
    }

    #[inline]
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    #[inline]
    pub fn client(&self) -> &Arc<ModbusChannelClient> {
        &self.client
    }

    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    #[inline]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.client.subscribe_connection_state()
    }

    #[inline]
    pub fn diagnostics(&self) -> ClientDiagnostics {
        self.client.diagnostics()
    }

    #[inline]
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    fn report(&self, operation: OperationKind, error: &PanelError) {
        self.observer
            .on_operation_failed(operation, error.kind(), &error.to_string());
    }

    /// Connect, read every channel once and start auto-refresh when a poll
    /// interval is configured.
    ///
    /// A failed initial read is reported to the observer but does not fail
    /// the connect.
    #[instrument(name = "panel-connect", skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(&self, endpoint: Endpoint) -> PanelResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Err(e) = self.client.connect(endpoint).await {
            let err = PanelError::from(e);
            self.report(OperationKind::Connect, &err);
            return Err(err);
        }

        let _ = self.refresh().await;
        if !self.client.connection_state().is_connected() {
            let err = PanelError::from(ConnectError::DisconnectInProgress);
            self.report(OperationKind::Connect, &err);
            return Err(err);
        }
        self.start_polling()?;
        Ok(())
    }

    /// Connect to the endpoint named by the configuration.
    pub async fn connect_configured(&self) -> PanelResult<()> {
        self.connect(self.config.endpoint()).await
    }

    /// Start auto-refresh; a no-op when no poll interval is configured.
    pub fn start_polling(&self) -> PanelResult<()> {
        let Some(interval) = self.config.poll_interval() else {
            return Ok(());
        };
        let observer = Arc::clone(&self.observer);
        self.poller
            .start(
                Arc::clone(&self.client),
                self.config.channel_count,
                interval,
                move |result| match result {
                    Ok(states) => observer.on_channel_states_updated(&states),
                    Err(e) => {
                        observer.on_operation_failed(OperationKind::Poll, e.kind(), &e.to_string())
                    }
                },
            )
            .map_err(|e| {
                let err = PanelError::from(e);
                self.report(OperationKind::Poll, &err);
                err
            })
    }

    pub async fn stop_polling(&self) {
        self.poller.stop().await;
    }

    /// Stop auto-refresh, then close the connection.
    #[instrument(name = "panel-disconnect", skip_all)]
    pub async fn disconnect(&self) -> PanelResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.poller.stop().await;
        self.client.disconnect().await.map_err(|e| {
            let err = PanelError::from(e);
            self.report(OperationKind::Disconnect, &err);
            err
        })
    }

    /// Command channel `index` to `desired` and return the states read back
    /// from the device afterwards.
    #[instrument(name = "panel-toggle", skip(self))]
    pub async fn toggle(&self, index: u16, desired: bool) -> PanelResult<Vec<ChannelState>> {
        if let Err(e) = self.client.write_channel(index, desired).await {
            let err = PanelError::from(e);
            self.report(OperationKind::Write, &err);
            return Err(err);
        }
        debug!(index, desired, "Channel write acknowledged");

        if let Some(delay) = self.config.settle_delay() {
            sleep(delay).await;
        }
        self.refresh().await
    }

    /// Read every channel and push the result to the observer.
    #[instrument(name = "panel-refresh", skip_all)]
    pub async fn refresh(&self) -> PanelResult<Vec<ChannelState>> {
        match self.client.read_channels().await {
            Ok(states) => {
                self.observer.on_channel_states_updated(&states);
                Ok(states)
            }
            Err(e) => {
                let err = PanelError::from(e);
                self.report(OperationKind::Read, &err);
                Err(err)
            }
        }
    }

    /// Drop the current connection and connect again, retrying transport
    /// failures with exponential backoff as allowed by `policy`.
    ///
    /// Failures other than transport errors are returned immediately.
    #[instrument(name = "panel-reconnect", skip_all, fields(endpoint = %endpoint))]
    pub async fn reconnect(
        &self,
        endpoint: Endpoint,
        policy: &RetryPolicy,
    ) -> PanelResult<()> {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "Previous session did not close cleanly");
        }

        let mut backoff = build_exponential_backoff(policy);
        let mut failures = 0u32;
        loop {
            match self.connect(endpoint.clone()).await {
                Ok(()) => {
                    if failures > 0 {
                        info!(attempts = failures + 1, "Reconnected");
                    }
                    return Ok(());
                }
                Err(PanelError::Connect(ConnectError::Transport(e))) => {
                    failures += 1;
                    let delay = if policy.allows_retry(failures) {
                        backoff.next_backoff()
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        warn!(attempts = failures, error = %e, "Giving up reconnecting");
                        return Err(ConnectError::Transport(e).into());
                    };
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connect failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for ChannelPanelController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
