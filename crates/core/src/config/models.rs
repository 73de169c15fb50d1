use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::errors::{GridError, GridResult};

/// 应用总配置
///
/// 各段分别对应驱动器的网络监听、作业队列、负载均衡和对端发现子系统。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub bundler: BundlerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 网络监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 监听地址
    pub bind_host: String,
    /// 任务分发通道端口
    pub node_port: u16,
    /// 类加载通道端口
    pub class_port: u16,
    /// 单个消息帧大小上限（字节）
    pub max_frame_size: usize,
}

/// 作业队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 单轮派发给一个节点的任务数上限
    pub max_bundle_size: usize,
}

/// 负载均衡（束大小计算）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlerConfig {
    /// 算法名称，如 "fixed"、"autotuned"、"rl"
    pub algorithm: String,
    /// 算法参数表，扁平的字符串键值对
    #[serde(default)]
    pub profile: HashMap<String, String>,
}

/// 对端发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// 多播组地址（仅支持 IPv4）
    pub multicast_group: String,
    pub multicast_port: u16,
    /// 广播间隔（毫秒）
    pub broadcast_interval_ms: u64,
    /// 描述符中携带的子网掩码长度
    pub subnet_mask_len: u8,
    /// 参与广播的本机接口地址；为空时自动探测
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// 是否输出 JSON 结构化日志
    pub json: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            node_port: constants::DEFAULT_NODE_PORT,
            class_port: constants::DEFAULT_CLASS_PORT,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_bundle_size: constants::DEFAULT_MAX_BUNDLE_SIZE,
        }
    }
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            algorithm: "fixed".to_string(),
            profile: HashMap::new(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_group: constants::DEFAULT_MULTICAST_GROUP.to_string(),
            multicast_port: constants::DEFAULT_MULTICAST_PORT,
            broadcast_interval_ms: constants::DEFAULT_BROADCAST_INTERVAL_MS,
            subnet_mask_len: 24,
            interfaces: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// 校验配置各段的取值范围
    pub fn validate(&self) -> GridResult<()> {
        if self.network.bind_host.is_empty() {
            return Err(GridError::configuration("network.bind_host 不能为空"));
        }
        // 端口 0 表示由系统分配（测试场景），允许两者同时为 0
        if self.network.node_port != 0 && self.network.node_port == self.network.class_port {
            return Err(GridError::configuration(
                "network.node_port 与 network.class_port 不能相同",
            ));
        }
        if self.network.max_frame_size == 0 {
            return Err(GridError::configuration("network.max_frame_size 必须大于 0"));
        }
        if self.queue.max_bundle_size == 0 {
            return Err(GridError::configuration("queue.max_bundle_size 必须大于 0"));
        }
        if self.bundler.algorithm.is_empty() {
            return Err(GridError::configuration("bundler.algorithm 不能为空"));
        }
        if self.discovery.broadcast_interval_ms == 0 {
            return Err(GridError::configuration(
                "discovery.broadcast_interval_ms 必须大于 0",
            ));
        }
        if self.discovery.multicast_group.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(GridError::Configuration(format!(
                "discovery.multicast_group 不是有效的 IPv4 地址: {}",
                self.discovery.multicast_group
            )));
        }
        if self.discovery.subnet_mask_len > 32 {
            return Err(GridError::configuration(
                "discovery.subnet_mask_len 不能超过 32",
            ));
        }
        Ok(())
    }
}
