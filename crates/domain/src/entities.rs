use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业定义
///
/// 表示一次性提交的一组任务。作业从提交到全部任务完成（或被取消）期间
/// 由作业队列持有；队列按优先级（大者优先）与提交顺序派发其中的任务。
///
/// # 字段说明
///
/// - `id`: 作业唯一标识
/// - `name`: 用户指定的作业名称
/// - `priority`: 优先级，数值越大越先派发
/// - `max_nodes`: 同时参与该作业的节点数上限，0 表示不限制
/// - `suspended`: 挂起标志，挂起的作业不参与派发
/// - `start_at`: 计划开始时间，未到达前作业处于待定状态
/// - `tasks`: 尚未派发的任务，保持提交时的顺序
/// - `initial_tasks`: 提交时的任务总数
/// - `remaining_tasks`: 尚未完成的任务数，单调递减
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub max_nodes: usize,
    pub suspended: bool,
    pub start_at: Option<DateTime<Utc>>,
    pub tasks: VecDeque<Task>,
    pub initial_tasks: usize,
    pub remaining_tasks: usize,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            priority: 0,
            max_nodes: 0,
            suspended: false,
            start_at: None,
            tasks: VecDeque::new(),
            initial_tasks: 0,
            remaining_tasks: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    /// 追加一个任务，位置按当前任务数顺延
    pub fn add_task(&mut self, payload: serde_json::Value) {
        let position = self.initial_tasks;
        self.tasks.push_back(Task::new(self.id, position, payload));
        self.initial_tasks += 1;
        self.remaining_tasks += 1;
    }

    /// 作业是否处于待定状态（计划开始时间未到）
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        match self.start_at {
            Some(start_at) => now < start_at,
            None => false,
        }
    }
}

/// 任务：作业中的一个工作单元
///
/// 任务派发时所有权暂时转移给执行它的节点通道；作业队列始终持有权威的
/// 剩余任务计数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub job_id: Uuid,
    /// 在所属作业内的位置，作业内唯一
    pub position: usize,
    pub payload: serde_json::Value,
    /// 执行完成后由节点填充
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(job_id: Uuid, position: usize, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            position,
            payload,
            result: None,
        }
    }
}

/// 任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub position: usize,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// 节点侧测得的执行耗时（毫秒）
    pub execution_time_ms: u64,
}

impl TaskResult {
    pub fn success(position: usize, output: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            position,
            success: true,
            output: Some(output),
            error_message: None,
            execution_time_ms,
        }
    }

    pub fn failure<S: Into<String>>(position: usize, error: S, execution_time_ms: u64) -> Self {
        Self {
            position,
            success: false,
            output: None,
            error_message: Some(error.into()),
            execution_time_ms,
        }
    }
}

/// 节点信息，来自任务通道的握手帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    /// 节点报告的执行线程数，线程数型负载均衡算法以此为输入
    pub thread_count: usize,
}
