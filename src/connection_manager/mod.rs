mod backoff;
mod channel;
mod registry;
mod stats;
mod subscriber;
mod types;

pub use backoff::ReconnectBackoff;
pub use channel::Channel;
pub use registry::ChannelManager;
pub use stats::{ChannelInfo, ChannelStats};
pub use subscriber::{subscriber, Subscriber, SubscriberRef};
pub use types::{ChannelEvent, ChannelState, ConnectionStatus};
