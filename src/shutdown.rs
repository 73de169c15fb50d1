use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 所有反应器、发现任务在启动时订阅关闭信号；触发后各任务在各自
/// 循环的下一次迭代内观察到信号并释放资源。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号
    ///
    /// 已经触发过关闭时返回一个立即就绪的接收器。
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复触发是无操作
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经触发过");
            return;
        }
        let subscribers = self.shutdown_tx.receiver_count();
        info!("发送关闭信号给 {} 个订阅者", subscribers);
        // 可能没有接收者，忽略发送错误
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
