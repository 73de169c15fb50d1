pub mod executors;
pub mod service;

pub use executors::{EchoExecutor, SleepExecutor, TaskExecutor};
pub use service::{read_frame, write_frame, NodeConfig, NodeService};
