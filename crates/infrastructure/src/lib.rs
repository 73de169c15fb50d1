pub mod class_channel;
pub mod discovery;
pub mod framing;
pub mod observability;
pub mod reactor;
pub mod resource_cache;

pub use class_channel::{ClassChannelHandler, ClassState};
pub use discovery::{Broadcaster, Listener, PeerConnectionHandler};
pub use framing::FramedMessage;
pub use observability::MetricsCollector;
pub use reactor::{Acceptor, ChannelContext, Reactor, Registration, RoleHandler};
pub use resource_cache::ResourceCache;
