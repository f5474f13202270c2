use crate::{
    error::ErrorKind,
    types::{ChannelState, ConnectionState, OperationKind},
};

/// Callback interface implemented by a presentation layer.
///
/// Callbacks run on runtime worker tasks, never on a rendering thread; an
/// implementation is responsible for marshalling onto its own thread. They
/// must return quickly and must not call back into the poller that invoked
/// them.
pub trait PanelObserver: Send + Sync {
    fn on_connection_state_changed(&self, state: ConnectionState);

    /// Fresh channel states as reported by the device, in index order.
    fn on_channel_states_updated(&self, states: &[ChannelState]);

    /// `message` is the error's display text, carrying the transport cause.
    fn on_operation_failed(&self, operation: OperationKind, kind: ErrorKind, message: &str);
}
