mod controller;
mod events;
mod poller;

pub use controller::ChannelPanelController;
pub use events::{EventChannelObserver, PanelEvent};
pub use poller::{PollResult, Poller, PollerState};
