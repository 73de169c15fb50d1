use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskgrid_core::DiscoveryConfig;
use taskgrid_domain::value_objects::ConnectionDescriptor;

use super::detect_local_ipv4;

/// 同一接口连续发送失败多少次后放弃该接口
const MAX_CONSECUTIVE_SEND_FAILURES: u32 = 5;

struct BroadcastInterface {
    addr: Ipv4Addr,
    socket: UdpSocket,
    /// 已记录过失败日志，成功后清除
    errored: bool,
    consecutive_failures: u32,
}

/// 对端发现广播器
///
/// 按配置的间隔在每个可用的本机接口上多播本驱动器的连接描述符。
/// 接口的发送失败只记录首次出现，之后静默重试，成功时清除；
/// 连续失败过多的接口被放弃，接口耗尽后广播器自行停止。
pub struct Broadcaster {
    descriptor: ConnectionDescriptor,
    config: DiscoveryConfig,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Broadcaster {
    pub fn new(
        descriptor: ConnectionDescriptor,
        config: DiscoveryConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            descriptor,
            config,
            shutdown_rx,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let payload = match serde_json::to_vec(&self.descriptor) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("序列化连接描述符失败，广播器退出: {}", e);
                return;
            }
        };
        let group: Ipv4Addr = match self.config.multicast_group.parse() {
            Ok(group) => group,
            Err(e) => {
                warn!("多播组地址无效，广播器退出: {}", e);
                return;
            }
        };
        let target = SocketAddrV4::new(group, self.config.multicast_port);

        let mut interfaces = Self::build_interfaces(&self.config).await;
        if interfaces.is_empty() {
            warn!("没有可用的广播接口，广播器退出");
            return;
        }
        info!(
            "发现广播器启动: {} 个接口, 目标 {}, 间隔 {}ms",
            interfaces.len(),
            target,
            self.config.broadcast_interval_ms
        );

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.broadcast_interval_ms));
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("发现广播器收到停止信号");
                    break;
                }
                _ = interval.tick() => {
                    for iface in interfaces.iter_mut() {
                        match iface.socket.send_to(&payload, target).await {
                            Ok(_) => {
                                if iface.errored {
                                    info!("接口 {} 广播恢复", iface.addr);
                                    iface.errored = false;
                                }
                                iface.consecutive_failures = 0;
                            }
                            Err(e) => {
                                iface.consecutive_failures += 1;
                                if !iface.errored {
                                    warn!("接口 {} 广播失败，将继续重试: {}", iface.addr, e);
                                    iface.errored = true;
                                }
                            }
                        }
                    }
                    interfaces.retain(|iface| {
                        if iface.consecutive_failures >= MAX_CONSECUTIVE_SEND_FAILURES {
                            warn!("接口 {} 连续失败 {} 次，放弃", iface.addr, iface.consecutive_failures);
                            false
                        } else {
                            true
                        }
                    });
                    if interfaces.is_empty() {
                        warn!("没有剩余可用接口，广播器停止");
                        break;
                    }
                }
            }
        }
        info!("发现广播器已停止");
    }

    /// 解析并绑定广播接口
    ///
    /// 未配置接口时自动探测本机地址，探测失败回退到回环地址。
    /// 绑定失败的接口在此处排除。
    async fn build_interfaces(config: &DiscoveryConfig) -> Vec<BroadcastInterface> {
        let mut addrs: Vec<Ipv4Addr> = Vec::new();
        for value in &config.interfaces {
            match value.parse() {
                Ok(addr) => addrs.push(addr),
                Err(e) => warn!("忽略无效的接口地址 '{}': {}", value, e),
            }
        }
        if addrs.is_empty() {
            match detect_local_ipv4() {
                Ok(addr) => addrs.push(addr),
                Err(e) => {
                    debug!("自动探测本机地址失败，回退到回环地址: {}", e);
                    addrs.push(Ipv4Addr::LOCALHOST);
                }
            }
        }

        let mut interfaces = Vec::new();
        for addr in addrs {
            match UdpSocket::bind((addr, 0)).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_multicast_loop_v4(true) {
                        debug!("接口 {} 设置多播回环失败: {}", addr, e);
                    }
                    interfaces.push(BroadcastInterface {
                        addr,
                        socket,
                        errored: false,
                        consecutive_failures: 0,
                    });
                }
                Err(e) => {
                    warn!("接口 {} 绑定失败，排除: {}", addr, e);
                }
            }
        }
        interfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn test_config(port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            enabled: true,
            multicast_group: "230.0.0.1".to_string(),
            multicast_port: port,
            broadcast_interval_ms: 50,
            subnet_mask_len: 24,
            interfaces: vec!["127.0.0.1".to_string()],
        }
    }

    #[tokio::test]
    async fn test_broadcaster_observes_shutdown_within_one_interval() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let descriptor = ConnectionDescriptor::new("127.0.0.1", vec![11111, 11112], 24);
        let broadcaster = Broadcaster::new(descriptor, test_config(39001), shutdown_rx);
        let handle = broadcaster.spawn();

        tokio::time::sleep(Duration::from_millis(80)).await;
        shutdown_tx.send(()).unwrap();

        // 停止信号应在一个广播间隔内被观察到
        timeout(Duration::from_millis(200), handle)
            .await
            .expect("广播器未按时停止")
            .unwrap();
    }

    #[tokio::test]
    async fn test_broadcaster_exits_without_usable_interfaces() {
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut config = test_config(39002);
        // TEST-NET-3 地址不属于任何本机接口，绑定必然失败
        config.interfaces = vec!["203.0.113.1".to_string()];
        let descriptor = ConnectionDescriptor::new("127.0.0.1", vec![11111], 24);
        let broadcaster = Broadcaster::new(descriptor, config, shutdown_rx);

        timeout(Duration::from_millis(500), broadcaster.run())
            .await
            .expect("无接口时广播器应立即退出");
    }
}
