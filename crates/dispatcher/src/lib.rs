pub mod bundler;
pub mod node_channel;
pub mod queue;

pub use bundler::{Bundler, BundlerProfile, BundlerRegistry};
pub use node_channel::{NodeChannelHandler, NodeState};
pub use queue::JobQueue;
