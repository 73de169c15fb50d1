use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::select_all;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskgrid_core::{GridError, GridResult, NetworkConfig};
use taskgrid_domain::value_objects::PeerRole;

use crate::framing::FramedMessage;
use crate::reactor::Registration;

/// 识别阶段的通道状态
///
/// 新连接唯一的状态是等待识别帧；识别完成后通道即移交下游反应器，
/// 不存在显式的终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptorState {
    IdentifyingPeer,
}

struct IdentifyingChannel {
    stream: Arc<TcpStream>,
    peer_addr: SocketAddr,
    state: AcceptorState,
    frame: FramedMessage,
}

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    ChannelReady(u64, io::Result<Ready>),
}

/// 连接接受器
///
/// 监听全部服务端口，对每个新连接读取其第一帧——4 字节大端角色代码，
/// 然后把原始传输连同角色递交给对应的下游反应器，不丢失也不重读任何
/// 字节。无法识别的角色代码只对该连接致命。
pub struct Acceptor {
    listeners: Vec<TcpListener>,
    node_tx: mpsc::UnboundedSender<Registration<PeerRole>>,
    class_tx: mpsc::UnboundedSender<Registration<PeerRole>>,
    shutdown_rx: broadcast::Receiver<()>,
    channels: HashMap<u64, IdentifyingChannel>,
    next_channel_id: u64,
    max_frame_size: usize,
}

impl Acceptor {
    /// 绑定任务端口与类加载端口
    pub async fn bind(
        config: &NetworkConfig,
        node_tx: mpsc::UnboundedSender<Registration<PeerRole>>,
        class_tx: mpsc::UnboundedSender<Registration<PeerRole>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> GridResult<Self> {
        let mut listeners = Vec::new();
        for port in [config.node_port, config.class_port] {
            let listener = TcpListener::bind((config.bind_host.as_str(), port))
                .await
                .map_err(|e| {
                    GridError::Network(format!("绑定 {}:{} 失败: {}", config.bind_host, port, e))
                })?;
            info!("接受器监听 {}", listener.local_addr()?);
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            node_tx,
            class_tx,
            shutdown_rx,
            channels: HashMap::new(),
            next_channel_id: 0,
            max_frame_size: config.max_frame_size,
        })
    }

    /// 实际绑定到的本地端口，端口 0 测试时使用
    pub fn local_ports(&self) -> Vec<u16> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .map(|a| a.port())
            .collect()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("反应器 [acceptor] 启动");
        loop {
            let accept_futs: Vec<_> = self
                .listeners
                .iter()
                .map(|l| Box::pin(l.accept()))
                .collect();
            let accept_any = async move {
                let (result, _, _) = select_all(accept_futs).await;
                result
            };

            let ready_futs = self.readiness_futures();
            let readiness = async move {
                if ready_futs.is_empty() {
                    std::future::pending::<(u64, io::Result<Ready>)>().await
                } else {
                    let ((id, result), _, _) = select_all(ready_futs).await;
                    (id, result)
                }
            };

            let event = tokio::select! {
                _ = self.shutdown_rx.recv() => Event::Shutdown,
                accepted = accept_any => Event::Accepted(accepted),
                (id, result) = readiness => Event::ChannelReady(id, result),
            };

            match event {
                Event::Shutdown => {
                    info!("反应器 [acceptor] 收到停止信号");
                    break;
                }
                Event::Accepted(Ok((stream, peer_addr))) => self.register(stream, peer_addr),
                Event::Accepted(Err(e)) => {
                    warn!("接受连接失败: {}", e);
                }
                Event::ChannelReady(id, result) => self.handle_ready(id, result),
            }
        }

        let count = self.channels.len();
        self.channels.clear();
        info!("反应器 [acceptor] 已关闭，释放 {} 个未识别通道", count);
    }

    fn readiness_futures(
        &self,
    ) -> Vec<Pin<Box<dyn Future<Output = (u64, io::Result<Ready>)> + Send>>> {
        self.channels
            .iter()
            .map(|(id, ch)| {
                let id = *id;
                let stream = Arc::clone(&ch.stream);
                Box::pin(async move { (id, stream.ready(Interest::READABLE).await) })
                    as Pin<Box<dyn Future<Output = (u64, io::Result<Ready>)> + Send>>
            })
            .collect()
    }

    fn register(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.next_channel_id;
        self.next_channel_id += 1;

        debug!("接受连接 #{} ({}), 等待识别帧", id, peer_addr);
        let mut frame = FramedMessage::new(self.max_frame_size);
        frame.begin_read();
        self.channels.insert(
            id,
            IdentifyingChannel {
                stream: Arc::new(stream),
                peer_addr,
                state: AcceptorState::IdentifyingPeer,
                frame,
            },
        );
    }

    fn handle_ready(&mut self, id: u64, result: io::Result<Ready>) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        let peer_addr = channel.peer_addr;

        let outcome = result
            .map_err(|e| GridError::Network(format!("就绪等待失败: {}", e)))
            .and_then(|_| Self::perform_transition(channel));

        match outcome {
            // 识别帧尚未完整，保持当前状态等待下一次就绪
            Ok(None) => {}
            Ok(Some(role)) => {
                if let Some(channel) = self.channels.remove(&id) {
                    info!("连接 #{} ({}) 识别为 [{}]", id, peer_addr, role);
                    self.route(channel, role);
                }
            }
            Err(e) => {
                warn!(
                    "通道 #{} [acceptor {}] 识别失败，关闭并注销: {}",
                    id, peer_addr, e
                );
                self.channels.remove(&id);
            }
        }
    }

    /// 推进识别状态机：读取识别帧并解析角色代码
    fn perform_transition(channel: &mut IdentifyingChannel) -> GridResult<Option<PeerRole>> {
        match channel.state {
            AcceptorState::IdentifyingPeer => {
                match channel.frame.continue_read(&channel.stream)? {
                    Some(payload) => Ok(Some(PeerRole::decode_frame(&payload)?)),
                    None => Ok(None),
                }
            }
        }
    }

    /// 把已识别的连接递交给负责该角色的反应器
    fn route(&self, channel: IdentifyingChannel, role: PeerRole) {
        let registration = Registration {
            stream: channel.stream,
            seed: role,
        };
        let target = match role {
            PeerRole::TaskNode | PeerRole::PeerDriver => &self.node_tx,
            PeerRole::ClassRequester | PeerRole::ClassProvider => &self.class_tx,
        };
        if target.send(registration).is_err() {
            warn!("[{}] 反应器已停止，丢弃新识别的连接", role);
        }
    }
}
