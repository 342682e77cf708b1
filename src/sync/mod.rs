// Producers that keep the store current, and the rules that merge them.

pub use backoff::ReconnectPolicy;
pub use channel::{ChannelHandle, Connector, EventChannel, Inbound, Transport, WsConnector};
pub use dispatcher::{DispatchSettings, Dispatcher, Prepared};
pub use poller::Poller;
pub use protocol::{ClientMessage, ServerMessage, Topic};
pub use reconciler::{Polled, Reconciler, Update};

mod backoff;
mod channel;
mod dispatcher;
mod poller;
pub mod protocol;
mod reconciler;
