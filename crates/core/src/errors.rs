use thiserror::Error;
use uuid::Uuid;

/// 网格系统统一错误类型
#[derive(Debug, Error)]
pub enum GridError {
    #[error("通道已断开: {0}")]
    ChannelDisconnected(String),
    #[error("协议错误: {0}")]
    Protocol(String),
    #[error("未知的对端角色代码: {0:#06x}")]
    UnknownPeerRole(u32),
    #[error("消息帧过大: {size} 字节 (上限 {max} 字节)")]
    FrameTooLarge { size: usize, max: usize },
    #[error("作业未找到: {id}")]
    JobNotFound { id: Uuid },
    #[error("作业 '{name}' 不包含任何任务")]
    EmptyJob { name: String },
    #[error("未知的负载均衡算法: {0}")]
    UnknownBundler(String),
    #[error("任务结果不属于作业 {job_id}: 位置 {position}")]
    UnknownTaskResult { job_id: Uuid, position: usize },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn disconnected<S: Into<String>>(msg: S) -> Self {
        Self::ChannelDisconnected(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
