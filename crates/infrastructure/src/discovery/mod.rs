mod broadcaster;
mod listener;

pub use broadcaster::Broadcaster;
pub use listener::Listener;

use std::net::{IpAddr, Ipv4Addr};

use taskgrid_core::{GridError, GridResult};
use taskgrid_domain::value_objects::ConnectionDescriptor;

/// 发现回调接口
///
/// 监听线程每发现一个真正的新对端就调用一次，连接的建立由回调的
/// 实现方负责。
pub trait PeerConnectionHandler: Send + Sync {
    fn on_new_connection(&self, name: &str, descriptor: &ConnectionDescriptor);
}

/// 探测本机对外通信使用的 IPv4 地址
///
/// 通过连接一个公网地址（不发送任何数据）读取内核选择的本地地址。
/// 仅支持 IPv4，IPv6-only 环境下的行为是已知限制。
pub fn detect_local_ipv4() -> GridResult<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| GridError::Network(format!("创建探测套接字失败: {}", e)))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|e| GridError::Network(format!("探测本机地址失败: {}", e)))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| GridError::Network(format!("读取本地地址失败: {}", e)))?;
    match local_addr.ip() {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(GridError::network("探测到 IPv6 地址，发现机制仅支持 IPv4")),
    }
}
