//! 网格驱动器的指标采集
//!
//! 基于 `metrics` facade 记录作业、派发与通道层面的运行指标，
//! 导出方式由宿主进程安装的 recorder 决定。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// 指标采集器
pub struct MetricsCollector {
    jobs_submitted_total: Counter,
    jobs_completed_total: Counter,
    bundles_dispatched_total: Counter,
    tasks_dispatched_total: Counter,
    tasks_completed_total: Counter,
    channel_faults_total: Counter,

    active_node_channels: Gauge,
    queue_depth: Gauge,

    bundle_round_trip_seconds: Histogram,
    bundle_size: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_submitted_total: counter!("taskgrid_jobs_submitted_total"),
            jobs_completed_total: counter!("taskgrid_jobs_completed_total"),
            bundles_dispatched_total: counter!("taskgrid_bundles_dispatched_total"),
            tasks_dispatched_total: counter!("taskgrid_tasks_dispatched_total"),
            tasks_completed_total: counter!("taskgrid_tasks_completed_total"),
            channel_faults_total: counter!("taskgrid_channel_faults_total"),
            active_node_channels: gauge!("taskgrid_active_node_channels"),
            queue_depth: gauge!("taskgrid_queue_depth"),
            bundle_round_trip_seconds: histogram!("taskgrid_bundle_round_trip_seconds"),
            bundle_size: histogram!("taskgrid_bundle_size"),
        }
    }

    pub fn record_job_submitted(&self) {
        self.jobs_submitted_total.increment(1);
    }

    pub fn record_job_completed(&self) {
        self.jobs_completed_total.increment(1);
    }

    pub fn record_bundle_dispatched(&self, size: usize) {
        self.bundles_dispatched_total.increment(1);
        self.tasks_dispatched_total.increment(size as u64);
        self.bundle_size.record(size as f64);
    }

    pub fn record_bundle_completed(&self, size: usize, round_trip_seconds: f64) {
        self.tasks_completed_total.increment(size as u64);
        self.bundle_round_trip_seconds.record(round_trip_seconds);
    }

    pub fn record_channel_fault(&self) {
        self.channel_faults_total.increment(1);
    }

    pub fn node_channel_opened(&self) {
        self.active_node_channels.increment(1.0);
    }

    pub fn node_channel_closed(&self) {
        self.active_node_channels.decrement(1.0);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
