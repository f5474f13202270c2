#![allow(dead_code)]

use iopanel_core::{ChannelPanelController, EventChannelObserver, PanelEvent};
use iopanel_driver_modbus::transport::mock::MockDevice;
use iopanel_sdk::{Endpoint, PanelConfig};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use tracing::Level;

pub const STUB_HOST: &str = "127.0.0.1";
pub const STUB_PORT: u16 = 5020;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

pub fn stub_endpoint() -> Endpoint {
    Endpoint::new(STUB_HOST, STUB_PORT)
}

/// Twelve channels at unit 1, address 0, no auto-refresh and no settle delay.
pub fn panel_config() -> PanelConfig {
    PanelConfig {
        host: STUB_HOST.to_string(),
        port: STUB_PORT,
        unit_id: 1,
        start_address: 0,
        channel_count: 12,
        poll_interval_ms: 0,
        settle_delay_ms: 0,
        ..Default::default()
    }
}

/// Channels 0 and 2 ON, channel 1 OFF, the rest unset.
pub fn panel_device() -> MockDevice {
    MockDevice::new().with_registers(0, &[0x100, 0x200, 0x100])
}

pub fn build_controller(
    config: PanelConfig,
    device: &MockDevice,
) -> (ChannelPanelController, mpsc::UnboundedReceiver<PanelEvent>) {
    let (observer, rx) = EventChannelObserver::channel();
    let controller =
        ChannelPanelController::with_connector(config, Arc::new(device.connector()), Arc::new(observer))
            .unwrap();
    (controller, rx)
}

/// Everything received so far, without waiting.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn channel_updates(events: &[PanelEvent]) -> Vec<Vec<bool>> {
    events
        .iter()
        .filter_map(|e| match e {
            PanelEvent::ChannelStatesUpdated(states) => {
                Some(states.iter().map(|s| s.is_on).collect())
            }
            _ => None,
        })
        .collect()
}
