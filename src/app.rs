use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use taskgrid_core::{AppConfig, GridResult};
use taskgrid_dispatcher::{BundlerProfile, BundlerRegistry, JobQueue, NodeChannelHandler};
use taskgrid_domain::entities::Job;
use taskgrid_domain::value_objects::ConnectionDescriptor;
use taskgrid_infrastructure::discovery::detect_local_ipv4;
use taskgrid_infrastructure::{
    Acceptor, Broadcaster, ClassChannelHandler, Listener, MetricsCollector,
    PeerConnectionHandler, Reactor, ResourceCache,
};

use crate::shutdown::ShutdownManager;

/// 已发现对端的登记表
///
/// 发现回调的默认实现：记录对端名称与描述符，向对端驱动器发起
/// 出站连接的时机与方式留给上层决定。
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<(String, ConnectionDescriptor)>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> Vec<(String, ConnectionDescriptor)> {
        self.peers.lock().expect("对端登记表锁中毒").clone()
    }
}

impl PeerConnectionHandler for PeerRegistry {
    fn on_new_connection(&self, name: &str, descriptor: &ConnectionDescriptor) {
        info!("登记对端驱动器 [{}]: {}", name, descriptor);
        self.peers
            .lock()
            .expect("对端登记表锁中毒")
            .push((name.to_string(), descriptor.clone()));
    }
}

/// 网格驱动器应用
///
/// 按配置装配作业队列、负载均衡策略、三个反应器与对端发现，
/// 所有组件通过构造参数显式注入依赖。
pub struct Application {
    queue: Arc<JobQueue>,
    resource_cache: Arc<ResourceCache>,
    metrics: Arc<MetricsCollector>,
    peers: Arc<PeerRegistry>,
    shutdown: ShutdownManager,
    local_ports: Vec<u16>,
    handles: Vec<JoinHandle<()>>,
}

impl Application {
    pub async fn start(config: AppConfig) -> Result<Self> {
        info!("初始化网格驱动器");
        config.validate().context("配置校验失败")?;

        let shutdown = ShutdownManager::new();
        let metrics = Arc::new(MetricsCollector::new());
        let queue = Arc::new(JobQueue::new(config.queue.max_bundle_size));
        let resource_cache = Arc::new(ResourceCache::new());

        let registry = BundlerRegistry::new();
        let profile = BundlerProfile::from(&config.bundler);
        let bundler = registry
            .create(
                &config.bundler.algorithm,
                &profile,
                config.queue.max_bundle_size,
            )
            .context("创建负载均衡策略失败")?;
        info!("负载均衡算法: {}", config.bundler.algorithm);

        let mut handles = Vec::new();

        // 类加载反应器
        let class_handler = ClassChannelHandler::new(Arc::clone(&resource_cache));
        let (class_reactor, class_tx) = Reactor::new(
            class_handler,
            shutdown.subscribe(),
            config.network.max_frame_size,
        );
        handles.push(class_reactor.spawn());

        // 任务分发反应器
        let node_handler =
            NodeChannelHandler::new(Arc::clone(&queue), bundler, Arc::clone(&metrics));
        let (node_reactor, node_tx) = Reactor::new(
            node_handler,
            shutdown.subscribe(),
            config.network.max_frame_size,
        );
        handles.push(node_reactor.spawn());

        // 接受器：识别新连接并路由到上面两个反应器
        let acceptor = Acceptor::bind(&config.network, node_tx, class_tx, shutdown.subscribe())
            .await
            .context("启动接受器失败")?;
        let local_ports = acceptor.local_ports();
        handles.push(acceptor.spawn());

        // 对端发现
        let peers = Arc::new(PeerRegistry::new());
        if config.discovery.enabled {
            let host = match detect_local_ipv4() {
                Ok(ip) => ip.to_string(),
                Err(e) => {
                    warn!("探测本机地址失败，发现描述符使用回环地址: {}", e);
                    "127.0.0.1".to_string()
                }
            };
            let descriptor = ConnectionDescriptor::new(
                host.clone(),
                local_ports.clone(),
                config.discovery.subnet_mask_len,
            );
            info!("本驱动器的连接描述符: {}", descriptor);

            let broadcaster = Broadcaster::new(
                descriptor,
                config.discovery.clone(),
                shutdown.subscribe(),
            );
            handles.push(broadcaster.spawn());

            let local_hosts = vec![host, "127.0.0.1".to_string()];
            let listener = Listener::new(
                local_hosts,
                local_ports.clone(),
                config.discovery.clone(),
                Arc::clone(&peers) as Arc<dyn PeerConnectionHandler>,
                shutdown.subscribe(),
            );
            handles.push(listener.spawn());
        }

        info!("网格驱动器已启动，监听端口 {:?}", local_ports);
        Ok(Self {
            queue,
            resource_cache,
            metrics,
            peers,
            shutdown,
            local_ports,
            handles,
        })
    }

    /// 提交作业到队列
    pub fn submit_job(&self, job: Job) -> GridResult<Uuid> {
        let job_id = self.queue.submit(job)?;
        self.metrics.record_job_submitted();
        self.metrics.set_queue_depth(self.queue.depth());
        Ok(job_id)
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        Arc::clone(&self.queue)
    }

    pub fn resource_cache(&self) -> Arc<ResourceCache> {
        Arc::clone(&self.resource_cache)
    }

    pub fn peers(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.peers)
    }

    /// 实际监听的端口，绑定顺序为任务端口、类加载端口
    pub fn local_ports(&self) -> &[u16] {
        &self.local_ports
    }

    pub fn node_port(&self) -> u16 {
        self.local_ports[0]
    }

    pub fn class_port(&self) -> u16 {
        self.local_ports[1]
    }

    /// 停止驱动器：广播关闭信号并等待所有组件退出
    pub async fn stop(mut self) {
        info!("停止网格驱动器");
        self.shutdown.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("网格驱动器已停止");
    }
}
