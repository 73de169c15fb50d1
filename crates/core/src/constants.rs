//! 系统级常量

/// 任务分发通道默认监听端口
pub const DEFAULT_NODE_PORT: u16 = 11111;

/// 类加载通道默认监听端口
pub const DEFAULT_CLASS_PORT: u16 = 11112;

/// 对端发现默认多播组地址
pub const DEFAULT_MULTICAST_GROUP: &str = "230.0.0.1";

/// 对端发现默认多播端口
pub const DEFAULT_MULTICAST_PORT: u16 = 11224;

/// 对端发现默认广播间隔（毫秒）
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 1000;

/// 单个消息帧的默认大小上限（64 MiB）
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// 默认最大束大小（单轮派发给一个节点的任务数上限）
pub const DEFAULT_MAX_BUNDLE_SIZE: usize = 50;

/// 作业名称最大长度
pub const MAX_JOB_NAME_LENGTH: usize = 255;
