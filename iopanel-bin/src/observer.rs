use iopanel_sdk::{ChannelState, ConnectionState, ErrorKind, OperationKind, PanelObserver};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Renders panel events as log lines, one `CHnn:ON|OFF` cell per channel.
#[derive(Default)]
pub struct LogObserver {
    last_states: Mutex<Option<Vec<ChannelState>>>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(states: &[ChannelState]) -> String {
        states
            .iter()
            .map(|s| format!("CH{:02}:{}", s.index + 1, if s.is_on { "ON" } else { "OFF" }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PanelObserver for LogObserver {
    fn on_connection_state_changed(&self, state: ConnectionState) {
        info!(%state, "Connection state");
    }

    fn on_channel_states_updated(&self, states: &[ChannelState]) {
        let changed = self
            .last_states
            .lock()
            .map(|mut last| {
                let changed = last.as_deref() != Some(states);
                *last = Some(states.to_vec());
                changed
            })
            .unwrap_or(true);
        if changed {
            info!("{}", Self::render(states));
        } else {
            debug!("Channel states unchanged");
        }
    }

    fn on_operation_failed(&self, operation: OperationKind, kind: ErrorKind, message: &str) {
        match kind {
            ErrorKind::Transport => warn!(%operation, ?kind, "{message}"),
            _ => error!(%operation, ?kind, "{message}"),
        }
    }
}
