use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskgrid_core::DiscoveryConfig;
use taskgrid_domain::value_objects::ConnectionDescriptor;

use super::PeerConnectionHandler;

/// 对端发现监听器
///
/// 加入多播组接收连接描述符，对照历史记录与本机描述符去重，
/// 对每个真正的新对端以合成名称调用一次注册的回调。
pub struct Listener {
    local_hosts: Vec<String>,
    local_ports: Vec<u16>,
    config: DiscoveryConfig,
    handler: Arc<dyn PeerConnectionHandler>,
    shutdown_rx: broadcast::Receiver<()>,
    seen: HashSet<ConnectionDescriptor>,
    discovered_count: u64,
}

impl Listener {
    pub fn new(
        local_hosts: Vec<String>,
        local_ports: Vec<u16>,
        config: DiscoveryConfig,
        handler: Arc<dyn PeerConnectionHandler>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            local_hosts,
            local_ports,
            config,
            handler,
            shutdown_rx,
            seen: HashSet::new(),
            discovered_count: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.multicast_port)).await
        {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    "发现监听器绑定端口 {} 失败，退出: {}",
                    self.config.multicast_port, e
                );
                return;
            }
        };

        match self.config.multicast_group.parse::<Ipv4Addr>() {
            Ok(group) => {
                if let Err(e) = socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                    // 加入失败仍可收到同机数据报，记录后继续
                    warn!("加入多播组 {} 失败: {}", group, e);
                }
            }
            Err(e) => {
                warn!("多播组地址无效，监听器退出: {}", e);
                return;
            }
        }

        info!("发现监听器启动，端口 {}", self.config.multicast_port);
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("发现监听器收到停止信号");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                    Err(e) => warn!("接收发现数据报失败: {}", e),
                }
            }
        }
        info!("发现监听器已停止");
    }

    fn handle_datagram(&mut self, payload: &[u8], from: SocketAddr) {
        let descriptor: ConnectionDescriptor = match serde_json::from_slice(payload) {
            Ok(d) => d,
            Err(e) => {
                debug!("忽略来自 {} 的无法解析的数据报: {}", from, e);
                return;
            }
        };
        // 通过构造函数重新排序端口，保证按值比较的一致性
        let descriptor = ConnectionDescriptor::new(
            descriptor.host,
            descriptor.ports,
            descriptor.subnet_mask_len,
        );
        self.process_descriptor(descriptor);
    }

    /// 去重与自检后触发回调
    fn process_descriptor(&mut self, descriptor: ConnectionDescriptor) {
        if descriptor.is_self(&self.local_hosts, &self.local_ports) {
            debug!("忽略本机自身的描述符: {}", descriptor);
            return;
        }
        if !self.seen.insert(descriptor.clone()) {
            return;
        }
        self.discovered_count += 1;
        let name = format!("peer-driver-{}", self.discovered_count);
        info!("发现新的对等驱动器 [{}]: {}", name, descriptor);
        self.handler.on_new_connection(&name, &descriptor);
    }
}
