use iopanel_sdk::{ChannelState, ConnectionState, ErrorKind, OperationKind, PanelObserver};
use tokio::sync::mpsc;

/// Observer callbacks as owned values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    ConnectionStateChanged(ConnectionState),
    ChannelStatesUpdated(Vec<ChannelState>),
    OperationFailed {
        operation: OperationKind,
        kind: ErrorKind,
        message: String,
    },
}

/// [`PanelObserver`] that forwards every callback into an unbounded channel,
/// for consumers that prefer to await events on their own task.
#[derive(Debug, Clone)]
pub struct EventChannelObserver {
    tx: mpsc::UnboundedSender<PanelEvent>,
}

impl EventChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PanelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: PanelEvent) {
        // Receiver gone means nobody is rendering anymore
        let _ = self.tx.send(event);
    }
}

impl PanelObserver for EventChannelObserver {
    fn on_connection_state_changed(&self, state: ConnectionState) {
        self.forward(PanelEvent::ConnectionStateChanged(state));
    }

    fn on_channel_states_updated(&self, states: &[ChannelState]) {
        self.forward(PanelEvent::ChannelStatesUpdated(states.to_vec()));
    }

    fn on_operation_failed(&self, operation: OperationKind, kind: ErrorKind, message: &str) {
        self.forward(PanelEvent::OperationFailed {
            operation,
            kind,
            message: message.to_string(),
        });
    }
}
