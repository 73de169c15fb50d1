mod acceptor;

pub use acceptor::Acceptor;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::select_all;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskgrid_core::GridResult;

use crate::framing::FramedMessage;

/// 递交给反应器的新通道
#[derive(Debug)]
pub struct Registration<S> {
    pub stream: Arc<TcpStream>,
    pub seed: S,
}

impl<S> Registration<S> {
    pub fn new(stream: TcpStream, seed: S) -> Self {
        Self {
            stream: Arc::new(stream),
            seed,
        }
    }
}

/// 单个连接的上下文
///
/// 持有当前逻辑状态、进行中的消息帧和角色相关数据。上下文只属于
/// 一个反应器，随注册创建、随断开或协议故障销毁。
pub struct ChannelContext<R: RoleHandler> {
    pub id: u64,
    pub stream: Arc<TcpStream>,
    pub peer_addr: SocketAddr,
    pub state: R::State,
    pub frame: FramedMessage,
    pub data: R::Data,
}

/// 某一服务器角色的通道状态机
///
/// 每个状态定义一次 `perform_transition`：至多执行一步非阻塞 I/O，
/// 检查完成情况并返回下一个状态。转移中抛出的任何错误只对该通道
/// 致命——通道被关闭并注销，反应器和其余通道不受影响。
pub trait RoleHandler: Send + Sized + 'static {
    /// 角色专属的状态枚举
    type State: Copy + Eq + std::fmt::Debug + Send;
    /// 角色相关的通道数据
    type Data: Send;
    /// 注册时随通道递交的初始化信息
    type Seed: Send;

    /// 角色名，用于日志
    fn role_name(&self) -> &'static str;

    /// 新通道注册：返回初始状态与角色数据
    fn on_register(&mut self, id: u64, seed: Self::Seed) -> (Self::State, Self::Data);

    /// 某状态等待的就绪事件类型
    fn interest(&self, state: Self::State) -> Interest;

    /// 执行一次状态转移
    fn perform_transition(&mut self, ctx: &mut ChannelContext<Self>) -> GridResult<Self::State>;

    /// 进入该状态的通道已移交给其他反应器，应从本反应器移除但不关闭
    fn should_detach(&self, _state: Self::State) -> bool {
        false
    }

    /// 通道断开或故障时的清理钩子，上下文连同连接一起移交并随后销毁
    fn on_disconnect(&mut self, _ctx: ChannelContext<Self>) {}

    /// 每轮事件处理前的派发钩子
    fn before_poll(&mut self, _channels: &mut HashMap<u64, ChannelContext<Self>>) {}

    /// 额外的唤醒源（如作业队列的提交通知），默认永不就绪
    fn wait_for_work<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}

enum Event<R: RoleHandler> {
    Shutdown,
    Register(Registration<R::Seed>),
    RegistrationClosed,
    Work,
    ChannelReady(u64, io::Result<Ready>),
}

/// 反应器：一个服务器角色的选择器循环
///
/// 每个反应器是一个 tokio 任务，独占自己的通道集合。每轮迭代在
/// 停止信号、新通道注册、各通道的就绪事件和角色的工作信号之间
/// 多路复用；对就绪的通道恰好调用一次状态转移，绝不对同一通道
/// 并发或重入。通道间的状态转移因此无需加锁；跨反应器共享的状态
/// （作业队列等）自行同步。
pub struct Reactor<R: RoleHandler> {
    handler: R,
    channels: HashMap<u64, ChannelContext<R>>,
    registration_rx: mpsc::UnboundedReceiver<Registration<R::Seed>>,
    shutdown_rx: broadcast::Receiver<()>,
    next_channel_id: u64,
    max_frame_size: usize,
}

impl<R: RoleHandler> Reactor<R> {
    pub fn new(
        handler: R,
        shutdown_rx: broadcast::Receiver<()>,
        max_frame_size: usize,
    ) -> (Self, mpsc::UnboundedSender<Registration<R::Seed>>) {
        let (registration_tx, registration_rx) = mpsc::unbounded_channel();
        let reactor = Self {
            handler,
            channels: HashMap::new(),
            registration_rx,
            shutdown_rx,
            next_channel_id: 0,
            max_frame_size,
        };
        (reactor, registration_tx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("反应器 [{}] 启动", self.handler.role_name());
        loop {
            self.handler.before_poll(&mut self.channels);

            let ready_futs = self.readiness_futures();
            let readiness = async move {
                if ready_futs.is_empty() {
                    std::future::pending::<(u64, io::Result<Ready>)>().await
                } else {
                    let ((id, result), _, _) = select_all(ready_futs).await;
                    (id, result)
                }
            };

            let event: Event<R> = tokio::select! {
                _ = self.shutdown_rx.recv() => Event::Shutdown,
                registration = self.registration_rx.recv() => match registration {
                    Some(reg) => Event::Register(reg),
                    None => Event::RegistrationClosed,
                },
                _ = self.handler.wait_for_work() => Event::Work,
                (id, result) = readiness => Event::ChannelReady(id, result),
            };

            match event {
                Event::Shutdown => {
                    info!("反应器 [{}] 收到停止信号", self.handler.role_name());
                    break;
                }
                Event::RegistrationClosed => {
                    info!("反应器 [{}] 的注册通道已关闭，退出", self.handler.role_name());
                    break;
                }
                Event::Register(reg) => self.register(reg),
                Event::Work => {
                    // 工作信号本身不携带数据，下一轮 before_poll 完成派发
                }
                Event::ChannelReady(id, result) => self.handle_ready(id, result),
            }
        }
        self.close_all();
    }

    /// 为每个通道按其当前状态的关注事件构造就绪等待
    fn readiness_futures(
        &self,
    ) -> Vec<Pin<Box<dyn Future<Output = (u64, io::Result<Ready>)> + Send>>> {
        self.channels
            .iter()
            .map(|(id, ctx)| {
                let id = *id;
                let stream = Arc::clone(&ctx.stream);
                let interest = self.handler.interest(ctx.state);
                Box::pin(async move { (id, stream.ready(interest).await) })
                    as Pin<Box<dyn Future<Output = (u64, io::Result<Ready>)> + Send>>
            })
            .collect()
    }

    fn register(&mut self, registration: Registration<R::Seed>) {
        let id = self.next_channel_id;
        self.next_channel_id += 1;

        let peer_addr = registration
            .stream
            .peer_addr()
            .unwrap_or_else(|_| "0.0.0.0:0".parse().expect("合法的占位地址"));
        let (state, data) = self.handler.on_register(id, registration.seed);

        debug!(
            "反应器 [{}] 注册通道 #{} ({}), 初始状态 {:?}",
            self.handler.role_name(),
            id,
            peer_addr,
            state
        );

        self.channels.insert(
            id,
            ChannelContext {
                id,
                stream: registration.stream,
                peer_addr,
                state,
                frame: FramedMessage::new(self.max_frame_size),
                data,
            },
        );
    }

    fn handle_ready(&mut self, id: u64, result: io::Result<Ready>) {
        let Some(ctx) = self.channels.get_mut(&id) else {
            return;
        };
        let peer_addr = ctx.peer_addr;

        if let Err(e) = result {
            warn!(
                "通道 #{} [{} {}] 就绪等待失败: {}",
                id,
                self.handler.role_name(),
                peer_addr,
                e
            );
            self.drop_channel(id);
            return;
        }

        match self.handler.perform_transition(ctx) {
            Ok(next) => {
                if next != ctx.state {
                    debug!(
                        "通道 #{} [{}] 状态转移 {:?} -> {:?}",
                        id,
                        self.handler.role_name(),
                        ctx.state,
                        next
                    );
                    ctx.state = next;
                }
                if self.handler.should_detach(next) {
                    self.channels.remove(&id);
                    debug!("通道 #{} 已移交下游反应器", id);
                }
            }
            Err(e) => {
                warn!(
                    "通道 #{} [{} {}] 故障，关闭并注销: {}",
                    id,
                    self.handler.role_name(),
                    peer_addr,
                    e
                );
                self.drop_channel(id);
            }
        }
    }

    fn drop_channel(&mut self, id: u64) {
        if let Some(ctx) = self.channels.remove(&id) {
            self.handler.on_disconnect(ctx);
        }
    }

    fn close_all(&mut self) {
        let count = self.channels.len();
        let drained: Vec<_> = self.channels.drain().map(|(_, ctx)| ctx).collect();
        for ctx in drained {
            self.handler.on_disconnect(ctx);
        }
        info!(
            "反应器 [{}] 已关闭，释放 {} 个通道",
            self.handler.role_name(),
            count
        );
    }
}
