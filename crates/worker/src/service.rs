use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use taskgrid_core::{constants, GridError, GridResult};
use taskgrid_domain::messaging::{BundleResult, NodeHandshake, TaskBundle, WireMessage};
use taskgrid_domain::value_objects::PeerRole;

use crate::executors::TaskExecutor;

/// 节点配置
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub driver_host: String,
    pub driver_port: u16,
    pub node_id: String,
    /// 向驱动器报告的执行线程数
    pub thread_count: usize,
    pub max_frame_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let suffix = uuid::Uuid::new_v4().to_string();
        Self {
            driver_host: "127.0.0.1".to_string(),
            driver_port: constants::DEFAULT_NODE_PORT,
            node_id: format!("node-{}-{}", host, &suffix[..8]),
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// 节点服务
///
/// 连接驱动器的任务端口，发送识别帧与握手，然后循环：读取任务束、
/// 逐个执行、回传结果。节点侧的阻塞式 I/O 不影响驱动器——驱动器端
/// 始终是非阻塞的。
pub struct NodeService {
    config: NodeConfig,
    executor: Arc<dyn TaskExecutor>,
}

impl NodeService {
    pub fn new(config: NodeConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<GridResult<()>> {
        tokio::spawn(self.run(shutdown_rx))
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> GridResult<()> {
        let addr = (self.config.driver_host.as_str(), self.config.driver_port);
        let mut stream = TcpStream::connect(addr).await.map_err(|e| {
            GridError::Network(format!(
                "连接驱动器 {}:{} 失败: {}",
                self.config.driver_host, self.config.driver_port, e
            ))
        })?;
        info!(
            "节点 '{}' 已连接驱动器 {}:{}",
            self.config.node_id, self.config.driver_host, self.config.driver_port
        );

        // 第一帧：4 字节角色代码
        write_frame(&mut stream, &PeerRole::TaskNode.encode_frame()).await?;

        // 握手：节点标识与线程数
        let handshake = NodeHandshake {
            node_id: self.config.node_id.clone(),
            thread_count: self.config.thread_count,
        };
        write_frame(&mut stream, &handshake.encode()?).await?;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("节点 '{}' 收到停止信号", self.config.node_id);
                    break;
                }
                frame = read_frame(&mut stream, self.config.max_frame_size) => {
                    let payload = frame?;
                    let bundle = TaskBundle::decode(&payload)?;
                    info!(
                        "节点 '{}' 收到作业 '{}' 的 {} 个任务",
                        self.config.node_id,
                        bundle.job_name,
                        bundle.len()
                    );

                    let mut results = Vec::with_capacity(bundle.len());
                    for task in &bundle.tasks {
                        results.push(self.executor.execute(task).await);
                    }

                    let reply = BundleResult {
                        job_id: bundle.job_id,
                        results,
                    };
                    write_frame(&mut stream, &reply.encode()?).await?;
                    debug!("节点 '{}' 已回传束结果", self.config.node_id);
                }
            }
        }
        Ok(())
    }
}

/// 读取一个完整的消息帧（阻塞式，节点侧专用）
pub async fn read_frame(stream: &mut TcpStream, max_frame_size: usize) -> GridResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| GridError::ChannelDisconnected(format!("读取长度前缀失败: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_size {
        return Err(GridError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| GridError::ChannelDisconnected(format!("读取载荷失败: {}", e)))?;
    Ok(payload)
}

/// 写出一个完整的消息帧（阻塞式，节点侧专用）
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> GridResult<()> {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .map_err(|e| GridError::ChannelDisconnected(format!("写出长度前缀失败: {}", e)))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| GridError::ChannelDisconnected(format!("写出载荷失败: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| GridError::ChannelDisconnected(format!("刷新流失败: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::EchoExecutor;
    use serde_json::json;
    use taskgrid_domain::entities::Task;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// 模拟驱动器：接受连接、校验识别与握手、派发一束任务并收取结果
    #[tokio::test]
    async fn test_node_service_full_cycle_against_fake_driver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let config = NodeConfig {
            driver_host: "127.0.0.1".to_string(),
            driver_port: port,
            node_id: "node-test".to_string(),
            thread_count: 2,
            max_frame_size: 1024 * 1024,
        };
        let service = NodeService::new(config, Arc::new(EchoExecutor));
        let handle = service.spawn(shutdown_rx);

        let (mut stream, _) = listener.accept().await.unwrap();

        // 识别帧
        let ident = read_frame(&mut stream, 1024).await.unwrap();
        assert_eq!(PeerRole::decode_frame(&ident).unwrap(), PeerRole::TaskNode);

        // 握手帧
        let handshake =
            NodeHandshake::decode(&read_frame(&mut stream, 1024).await.unwrap()).unwrap();
        assert_eq!(handshake.node_id, "node-test");
        assert_eq!(handshake.thread_count, 2);

        // 派发一束两个任务
        let job_id = Uuid::new_v4();
        let bundle = TaskBundle::new(
            job_id,
            "it".to_string(),
            vec![
                Task::new(job_id, 0, json!({"n": 0})),
                Task::new(job_id, 1, json!({"n": 1})),
            ],
        );
        write_frame(&mut stream, &bundle.encode().unwrap())
            .await
            .unwrap();

        // 收取结果
        let reply =
            BundleResult::decode(&read_frame(&mut stream, 1024 * 1024).await.unwrap()).unwrap();
        assert_eq!(reply.job_id, job_id);
        assert_eq!(reply.results.len(), 2);
        assert!(reply.results.iter().all(|r| r.success));
        assert_eq!(reply.results[0].output, Some(json!({"n": 0})));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
