use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use taskgrid_core::{constants, GridError, GridResult};
use taskgrid_domain::entities::{Job, Task, TaskResult};
use taskgrid_domain::messaging::TaskBundle;

struct QueuedJob {
    job: Job,
    /// 提交序号，同优先级内先进先出的依据
    sequence: u64,
    /// 正在执行该作业任务束的通道数，用于 max_nodes 约束
    active_nodes: usize,
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<Uuid, QueuedJob>,
    next_sequence: u64,
}

/// 作业队列
///
/// 从提交到全部任务完成（或取消）期间持有作业，是所有任务分发通道
/// 并发访问的唯一共享可变结构。所有变更操作彼此原子：内部互斥锁只在
/// 单次变更期间持有，绝不跨越任何 I/O 等待。
///
/// 派发顺序：优先级高者先行；同优先级按提交顺序先进先出，保证无饥饿。
/// 挂起的、待定的（计划开始时间未到）以及已达 max_nodes 约束的作业
/// 不参与派发。
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    max_bundle_size: usize,
}

impl JobQueue {
    pub fn new(max_bundle_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            max_bundle_size: max_bundle_size.max(1),
        }
    }

    /// 单轮派发的任务数上限
    pub fn max_bundle_size(&self) -> usize {
        self.max_bundle_size
    }

    /// 等待队列出现新的可派发工作
    pub async fn wait_for_change(&self) {
        self.notify.notified().await;
    }

    /// 提交作业
    ///
    /// 不含任务的作业被拒绝。
    pub fn submit(&self, job: Job) -> GridResult<Uuid> {
        if job.tasks.is_empty() {
            return Err(GridError::EmptyJob { name: job.name });
        }
        if job.name.len() > constants::MAX_JOB_NAME_LENGTH {
            return Err(GridError::configuration(format!(
                "作业名称过长: {} > {}",
                job.name.len(),
                constants::MAX_JOB_NAME_LENGTH
            )));
        }

        let job_id = job.id;
        let (sequence, depth) = {
            let mut inner = self.inner.lock().expect("作业队列锁中毒");
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            info!(
                "作业已提交: '{}' ({}) 优先级 {} 任务数 {}",
                job.name, job_id, job.priority, job.initial_tasks
            );
            inner.jobs.insert(
                job_id,
                QueuedJob {
                    job,
                    sequence,
                    active_nodes: 0,
                },
            );
            (sequence, inner.jobs.len())
        };
        debug!("队列深度 {} (序号 {})", depth, sequence);
        self.notify.notify_one();
        Ok(job_id)
    }

    /// 取出一束任务用于派发
    ///
    /// `capacity` 为负载均衡算法给出的本轮束大小，取值被限制在
    /// `[1, max_bundle_size]`。一束任务始终来自同一个作业：合格作业中
    /// 优先级最高、提交最早的那个。无合格作业时返回 `None`。
    pub fn take(&self, capacity: usize) -> Option<TaskBundle> {
        let capacity = capacity.clamp(1, self.max_bundle_size);
        let now = Utc::now();

        let mut inner = self.inner.lock().expect("作业队列锁中毒");
        let candidate = inner
            .jobs
            .values_mut()
            .filter(|queued| {
                !queued.job.suspended
                    && !queued.job.is_pending(now)
                    && !queued.job.tasks.is_empty()
                    && (queued.job.max_nodes == 0 || queued.active_nodes < queued.job.max_nodes)
            })
            .min_by_key(|queued| (std::cmp::Reverse(queued.job.priority), queued.sequence))?;

        let count = capacity.min(candidate.job.tasks.len());
        let tasks: Vec<Task> = candidate.job.tasks.drain(..count).collect();
        candidate.active_nodes += 1;

        debug!(
            "派发作业 '{}' 的 {} 个任务 (剩余未派发 {})",
            candidate.job.name,
            count,
            candidate.job.tasks.len()
        );
        Some(TaskBundle::new(
            candidate.job.id,
            candidate.job.name.clone(),
            tasks,
        ))
    }

    /// 记录一束任务的完成回执
    ///
    /// 释放该作业的节点占用并递减剩余计数；剩余计数归零时作业整体
    /// 移出队列，此时返回 `Ok(true)`。未知作业或不属于该作业的结果
    /// 位置会报告给调用方而不是被静默丢弃。
    pub fn complete(&self, job_id: Uuid, results: &[TaskResult]) -> GridResult<bool> {
        let mut inner = self.inner.lock().expect("作业队列锁中毒");
        let queued = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(GridError::JobNotFound { id: job_id })?;

        // 本轮往返已经结束，无论回执内容如何都先释放节点占用
        queued.active_nodes = queued.active_nodes.saturating_sub(1);

        for result in results {
            if result.position >= queued.job.initial_tasks {
                return Err(GridError::UnknownTaskResult {
                    job_id,
                    position: result.position,
                });
            }
        }

        queued.job.remaining_tasks = queued.job.remaining_tasks.saturating_sub(results.len());
        debug!(
            "作业 '{}' 完成 {} 个任务，剩余 {}",
            queued.job.name,
            results.len(),
            queued.job.remaining_tasks
        );

        if queued.job.remaining_tasks == 0 {
            let queued = inner.jobs.remove(&job_id).expect("作业刚刚还在队列中");
            info!("作业 '{}' ({}) 全部任务完成，移出队列", queued.job.name, job_id);
            return Ok(true);
        }
        Ok(false)
    }

    /// 把故障通道上未完成的任务束放回队列
    ///
    /// 任务回到作业队首，保持原有顺序；不触碰剩余计数，也不产生
    /// 负载均衡反馈。
    pub fn requeue(&self, job_id: Uuid, tasks: Vec<Task>) -> GridResult<()> {
        let mut inner = self.inner.lock().expect("作业队列锁中毒");
        let queued = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(GridError::JobNotFound { id: job_id })?;

        queued.active_nodes = queued.active_nodes.saturating_sub(1);
        let count = tasks.len();
        for task in tasks.into_iter().rev() {
            queued.job.tasks.push_front(task);
        }
        info!("作业 '{}' 的 {} 个任务已重新入队", queued.job.name, count);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// 挂起作业，暂停其任务派发
    pub fn suspend(&self, job_id: Uuid) -> GridResult<()> {
        let mut inner = self.inner.lock().expect("作业队列锁中毒");
        let queued = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(GridError::JobNotFound { id: job_id })?;
        queued.job.suspended = true;
        info!("作业 '{}' 已挂起", queued.job.name);
        Ok(())
    }

    /// 恢复挂起的作业
    pub fn resume(&self, job_id: Uuid) -> GridResult<()> {
        {
            let mut inner = self.inner.lock().expect("作业队列锁中毒");
            let queued = inner
                .jobs
                .get_mut(&job_id)
                .ok_or(GridError::JobNotFound { id: job_id })?;
            queued.job.suspended = false;
            info!("作业 '{}' 已恢复", queued.job.name);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// 取消作业并将其移出队列，返回被取消的作业
    pub fn cancel(&self, job_id: Uuid) -> GridResult<Job> {
        let mut inner = self.inner.lock().expect("作业队列锁中毒");
        let queued = inner
            .jobs
            .remove(&job_id)
            .ok_or(GridError::JobNotFound { id: job_id })?;
        info!(
            "作业 '{}' ({}) 已取消，丢弃 {} 个未派发任务",
            queued.job.name,
            job_id,
            queued.job.tasks.len()
        );
        Ok(queued.job)
    }

    /// 队列中的作业数
    pub fn depth(&self) -> usize {
        self.inner.lock().expect("作业队列锁中毒").jobs.len()
    }

    /// 尚未派发的任务总数
    pub fn pending_tasks(&self) -> usize {
        self.inner
            .lock()
            .expect("作业队列锁中毒")
            .jobs
            .values()
            .map(|queued| queued.job.tasks.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_tasks(name: &str, priority: i32, count: usize) -> Job {
        let mut job = Job::new(name).with_priority(priority);
        for i in 0..count {
            job.add_task(json!({"n": i}));
        }
        job
    }

    fn results_for(bundle: &TaskBundle) -> Vec<TaskResult> {
        bundle
            .tasks
            .iter()
            .map(|t| TaskResult::success(t.position, json!("ok"), 1))
            .collect()
    }

    #[test]
    fn test_empty_job_rejected() {
        let queue = JobQueue::new(10);
        let err = queue.submit(Job::new("empty")).unwrap_err();
        assert!(matches!(err, GridError::EmptyJob { .. }));
    }

    #[test]
    fn test_priority_ordering() {
        let queue = JobQueue::new(10);
        let low = queue.submit(job_with_tasks("low", 2, 3)).unwrap();
        let high = queue.submit(job_with_tasks("high", 5, 3)).unwrap();

        // 高优先级作业尚有任务时绝不派发低优先级作业
        let b1 = queue.take(2).unwrap();
        assert_eq!(b1.job_id, high);
        let b2 = queue.take(2).unwrap();
        assert_eq!(b2.job_id, high);
        let b3 = queue.take(2).unwrap();
        assert_eq!(b3.job_id, low);
    }

    #[test]
    fn test_suspended_high_priority_yields_to_lower() {
        let queue = JobQueue::new(10);
        let low = queue.submit(job_with_tasks("low", 2, 1)).unwrap();
        let high = queue.submit(job_with_tasks("high", 5, 1)).unwrap();

        queue.suspend(high).unwrap();
        assert_eq!(queue.take(1).unwrap().job_id, low);

        queue.resume(high).unwrap();
        assert_eq!(queue.take(1).unwrap().job_id, high);
    }

    #[test]
    fn test_pending_job_excluded_until_start_time() {
        let queue = JobQueue::new(10);
        let mut job = Job::new("later").with_priority(9);
        job.add_task(json!({}));
        let job = job.with_start_at(Utc::now() + chrono::Duration::hours(1));
        queue.submit(job).unwrap();

        assert!(queue.take(1).is_none());
    }

    #[test]
    fn test_fifo_within_equal_priority() {
        let queue = JobQueue::new(10);
        let first = queue.submit(job_with_tasks("first", 3, 1)).unwrap();
        let second = queue.submit(job_with_tasks("second", 3, 1)).unwrap();

        assert_eq!(queue.take(1).unwrap().job_id, first);
        assert_eq!(queue.take(1).unwrap().job_id, second);
    }

    #[test]
    fn test_max_nodes_constraint() {
        let queue = JobQueue::new(10);
        let mut job = Job::new("narrow").with_max_nodes(1);
        for i in 0..4 {
            job.add_task(json!({"n": i}));
        }
        let job_id = queue.submit(job).unwrap();

        let bundle = queue.take(2).unwrap();
        // 已达 max_nodes 约束，第二次取束失败
        assert!(queue.take(2).is_none());

        // 完成回执释放节点占用后可以继续
        queue.complete(job_id, &results_for(&bundle)).unwrap();
        assert!(queue.take(2).is_some());
    }

    #[test]
    fn test_bundle_capacity_sequence() {
        let queue = JobQueue::new(10);
        queue.submit(job_with_tasks("five", 5, 5)).unwrap();

        let sizes: Vec<usize> = std::iter::from_fn(|| queue.take(2).map(|b| b.len())).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_capacity_clamped_to_max_bundle_size() {
        let queue = JobQueue::new(3);
        queue.submit(job_with_tasks("big", 0, 10)).unwrap();

        assert_eq!(queue.take(100).unwrap().len(), 3);
        // 容量 0 视为 1
        assert_eq!(queue.take(0).unwrap().len(), 1);
    }

    #[test]
    fn test_job_removed_after_exactly_n_completions() {
        let queue = JobQueue::new(2);
        let job_id = queue.submit(job_with_tasks("five", 5, 5)).unwrap();

        // 无论完成回执以何种批次到达，第 5 个任务完成时作业恰好移除
        let mut finished = false;
        while let Some(bundle) = queue.take(2) {
            finished = queue.complete(job_id, &results_for(&bundle)).unwrap();
        }
        assert!(finished);
        assert!(queue.is_empty());
        assert!(matches!(
            queue.complete(job_id, &[]),
            Err(GridError::JobNotFound { .. })
        ));
    }

    #[test]
    fn test_complete_unknown_job_reported() {
        let queue = JobQueue::new(10);
        let err = queue.complete(Uuid::new_v4(), &[]).unwrap_err();
        assert!(matches!(err, GridError::JobNotFound { .. }));
    }

    #[test]
    fn test_complete_unknown_position_reported() {
        let queue = JobQueue::new(10);
        let job_id = queue.submit(job_with_tasks("two", 0, 2)).unwrap();
        let _ = queue.take(2).unwrap();

        let bogus = vec![TaskResult::success(99, json!("?"), 1)];
        let err = queue.complete(job_id, &bogus).unwrap_err();
        assert!(matches!(
            err,
            GridError::UnknownTaskResult { position: 99, .. }
        ));
    }

    #[test]
    fn test_requeue_restores_order_and_counts() {
        let queue = JobQueue::new(10);
        let job_id = queue.submit(job_with_tasks("five", 0, 5)).unwrap();

        let bundle = queue.take(3).unwrap();
        assert_eq!(queue.pending_tasks(), 2);

        queue.requeue(job_id, bundle.tasks).unwrap();
        assert_eq!(queue.pending_tasks(), 5);

        // 重新入队的任务回到队首，顺序不变
        let again = queue.take(5).unwrap();
        let positions: Vec<usize> = again.tasks.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cancel_removes_job() {
        let queue = JobQueue::new(10);
        let job_id = queue.submit(job_with_tasks("doomed", 0, 3)).unwrap();

        let job = queue.cancel(job_id).unwrap();
        assert_eq!(job.name, "doomed");
        assert!(queue.is_empty());
        assert!(matches!(
            queue.suspend(job_id),
            Err(GridError::JobNotFound { .. })
        ));
    }
}
