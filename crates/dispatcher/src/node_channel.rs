use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::Interest;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskgrid_core::{GridError, GridResult};
use taskgrid_domain::entities::{NodeInfo, Task};
use taskgrid_domain::messaging::{BundleResult, NodeHandshake, TaskBundle, WireMessage};
use taskgrid_domain::value_objects::PeerRole;
use taskgrid_infrastructure::reactor::{ChannelContext, RoleHandler};
use taskgrid_infrastructure::MetricsCollector;

use crate::bundler::Bundler;
use crate::queue::JobQueue;

/// 任务分发通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// 等待节点的握手帧
    AwaitingHandshake,
    /// 空闲，可接受派发；此状态下任何入站数据都是意外
    Idle,
    /// 正在写出任务束，写完转入等待结果
    SendingBundle,
    /// 等待节点回传束执行结果
    AwaitingResults,
}

/// 派发出去、尚未收到回执的任务束
struct InFlightBundle {
    job_id: Uuid,
    tasks: Vec<Task>,
    sent_at: Instant,
}

/// 任务分发通道的角色数据
pub struct NodeChannelData {
    role: PeerRole,
    node: Option<NodeInfo>,
    bundler: Box<dyn Bundler>,
    in_flight: Option<InFlightBundle>,
}

/// 任务分发反应器的状态机
///
/// 握手之后通道在 空闲 -> 发送束 -> 等待结果 -> 空闲 之间循环。
/// 每轮派发前从作业队列取出一束任务，束大小由该通道的负载均衡策略
/// 给出；结果回执完成后才向策略反馈，故障通道的在途任务重新入队、
/// 不产生反馈。
pub struct NodeChannelHandler {
    queue: Arc<JobQueue>,
    /// 按配置创建的策略原型，每个通道注册时克隆一份独立实例
    bundler_prototype: Box<dyn Bundler>,
    metrics: Arc<MetricsCollector>,
}

impl NodeChannelHandler {
    pub fn new(
        queue: Arc<JobQueue>,
        bundler_prototype: Box<dyn Bundler>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            bundler_prototype,
            metrics,
        }
    }

    /// 处理一条束结果回执
    fn handle_bundle_result(
        &mut self,
        ctx: &mut ChannelContext<Self>,
        payload: &[u8],
    ) -> GridResult<()> {
        let Some(in_flight) = ctx.data.in_flight.take() else {
            return Err(GridError::protocol("未派发任务束却收到结果回执"));
        };
        let elapsed = in_flight.sent_at.elapsed();

        let result = match BundleResult::decode(payload) {
            Ok(result) if result.job_id == in_flight.job_id => result,
            Ok(result) => {
                // 回执与在途束不符：任务放回队列，通道按协议故障处理
                let _ = self.queue.requeue(in_flight.job_id, in_flight.tasks);
                return Err(GridError::Protocol(format!(
                    "结果回执的作业 {} 与在途作业 {} 不符",
                    result.job_id, in_flight.job_id
                )));
            }
            Err(e) => {
                let _ = self.queue.requeue(in_flight.job_id, in_flight.tasks);
                return Err(e);
            }
        };

        match self.queue.complete(result.job_id, &result.results) {
            Ok(true) => {
                self.metrics.record_job_completed();
                info!("作业 {} 已完成", result.job_id);
            }
            Ok(false) => {}
            // 作业可能已被取消，回执异常不影响通道本身
            Err(e) => warn!("完成回执处理异常: {}", e),
        }

        ctx.data.bundler.feedback(result.results.len(), elapsed);
        self.metrics
            .record_bundle_completed(result.results.len(), elapsed.as_secs_f64());
        self.metrics.set_queue_depth(self.queue.depth());
        debug!(
            "通道 #{} 束往返 {:.1}ms, {} 个结果",
            ctx.id,
            elapsed.as_secs_f64() * 1000.0,
            result.results.len()
        );
        Ok(())
    }

    /// 为一个空闲通道尝试派发
    fn try_dispatch(&mut self, ctx: &mut ChannelContext<Self>) {
        let capacity = ctx.data.bundler.bundle_size();
        let Some(bundle) = self.queue.take(capacity) else {
            return;
        };

        let size = bundle.len();
        let encoded = match bundle.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("任务束编码失败，任务重新入队: {}", e);
                let _ = self.queue.requeue(bundle.job_id, bundle.tasks);
                return;
            }
        };
        if let Err(e) = ctx.frame.begin_write(&encoded) {
            warn!("任务束超出帧上限，任务重新入队: {}", e);
            let _ = self.queue.requeue(bundle.job_id, bundle.tasks);
            return;
        }

        debug!(
            "通道 #{} 派发作业 '{}' 的 {} 个任务",
            ctx.id, bundle.job_name, size
        );
        ctx.data.in_flight = Some(InFlightBundle {
            job_id: bundle.job_id,
            tasks: bundle.tasks,
            sent_at: Instant::now(),
        });
        ctx.state = NodeState::SendingBundle;
        self.metrics.record_bundle_dispatched(size);
        self.metrics.set_queue_depth(self.queue.depth());
    }
}

impl RoleHandler for NodeChannelHandler {
    type State = NodeState;
    type Data = NodeChannelData;
    type Seed = PeerRole;

    fn role_name(&self) -> &'static str {
        "node"
    }

    fn on_register(&mut self, id: u64, seed: Self::Seed) -> (Self::State, Self::Data) {
        debug!("节点通道 #{} 注册，角色 [{}]", id, seed);
        self.metrics.node_channel_opened();
        (
            NodeState::AwaitingHandshake,
            NodeChannelData {
                role: seed,
                node: None,
                bundler: self.bundler_prototype.clone_strategy(),
                in_flight: None,
            },
        )
    }

    fn interest(&self, state: Self::State) -> Interest {
        match state {
            NodeState::AwaitingHandshake | NodeState::Idle | NodeState::AwaitingResults => {
                Interest::READABLE
            }
            NodeState::SendingBundle => Interest::WRITABLE,
        }
    }

    fn perform_transition(&mut self, ctx: &mut ChannelContext<Self>) -> GridResult<Self::State> {
        match ctx.state {
            NodeState::AwaitingHandshake => match ctx.frame.continue_read(&ctx.stream)? {
                None => Ok(NodeState::AwaitingHandshake),
                Some(payload) => {
                    let handshake = NodeHandshake::decode(&payload)?;
                    info!(
                        "节点 '{}' ({}) 握手完成，线程数 {}",
                        handshake.node_id, ctx.peer_addr, handshake.thread_count
                    );
                    ctx.data.bundler.set_thread_count(handshake.thread_count);
                    ctx.data.node = Some(NodeInfo {
                        node_id: handshake.node_id,
                        thread_count: handshake.thread_count,
                    });
                    Ok(NodeState::Idle)
                }
            },
            NodeState::Idle => match ctx.frame.continue_read(&ctx.stream)? {
                // 虚假就绪，保持空闲
                None => Ok(NodeState::Idle),
                Some(_) => Err(GridError::protocol("空闲状态收到意外数据帧")),
            },
            NodeState::SendingBundle => {
                if ctx.frame.continue_write(&ctx.stream)? {
                    Ok(NodeState::AwaitingResults)
                } else {
                    Ok(NodeState::SendingBundle)
                }
            }
            NodeState::AwaitingResults => match ctx.frame.continue_read(&ctx.stream)? {
                None => Ok(NodeState::AwaitingResults),
                Some(payload) => {
                    self.handle_bundle_result(ctx, &payload)?;
                    Ok(NodeState::Idle)
                }
            },
        }
    }

    fn on_disconnect(&mut self, mut ctx: ChannelContext<Self>) {
        self.metrics.node_channel_closed();
        self.metrics.record_channel_fault();
        let node_id = ctx
            .data
            .node
            .as_ref()
            .map(|n| n.node_id.clone())
            .unwrap_or_else(|| "未握手".to_string());
        info!(
            "节点通道 #{} ({}, 角色 [{}], 节点 '{}') 已注销",
            ctx.id, ctx.peer_addr, ctx.data.role, node_id
        );

        // 在途任务束重新入队，不向负载均衡策略反馈
        if let Some(in_flight) = ctx.data.in_flight.take() {
            match self.queue.requeue(in_flight.job_id, in_flight.tasks) {
                Ok(()) => {}
                Err(e) => debug!("在途任务重新入队失败（作业可能已取消）: {}", e),
            }
        }
    }

    fn before_poll(&mut self, channels: &mut HashMap<u64, ChannelContext<Self>>) {
        // 每轮事件后给所有空闲且已握手的通道派发
        let mut ids: Vec<u64> = channels
            .iter()
            .filter(|(_, ctx)| ctx.state == NodeState::Idle && ctx.data.node.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(ctx) = channels.get_mut(&id) {
                self.try_dispatch(ctx);
            }
        }
    }

    fn wait_for_work<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        let queue = Arc::clone(&self.queue);
        Box::pin(async move { queue.wait_for_change().await })
    }
}
