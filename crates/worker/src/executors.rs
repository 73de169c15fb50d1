use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use taskgrid_domain::entities::{Task, TaskResult};

/// 任务执行器
///
/// 节点对任务束中的每个任务调用一次执行器。任务载荷的业务含义由
/// 具体执行器解释，网格本身不关心其内容。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task) -> TaskResult;
}

/// 回声执行器：原样返回任务载荷，主要用于联调与测试
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        let start = Instant::now();
        debug!("echo 执行任务 {}#{}", task.job_id, task.position);
        TaskResult::success(
            task.position,
            task.payload.clone(),
            start.elapsed().as_millis() as u64,
        )
    }
}

/// 休眠执行器：按载荷中的 `sleep_ms` 休眠指定毫秒数
pub struct SleepExecutor;

#[async_trait]
impl TaskExecutor for SleepExecutor {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        let start = Instant::now();
        let Some(sleep_ms) = task.payload.get("sleep_ms").and_then(|v| v.as_u64()) else {
            return TaskResult::failure(
                task.position,
                "载荷缺少 sleep_ms 参数",
                start.elapsed().as_millis() as u64,
            );
        };
        tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
        TaskResult::success(
            task.position,
            serde_json::json!({ "slept_ms": sleep_ms }),
            start.elapsed().as_millis() as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let task = Task::new(Uuid::new_v4(), 3, json!({"value": 42}));
        let result = EchoExecutor.execute(&task).await;

        assert!(result.success);
        assert_eq!(result.position, 3);
        assert_eq!(result.output, Some(json!({"value": 42})));
    }

    #[tokio::test]
    async fn test_sleep_executor_reports_missing_param() {
        let task = Task::new(Uuid::new_v4(), 0, json!({}));
        let result = SleepExecutor.execute(&task).await;

        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn test_sleep_executor_sleeps() {
        let task = Task::new(Uuid::new_v4(), 0, json!({"sleep_ms": 10}));
        let result = SleepExecutor.execute(&task).await;

        assert!(result.success);
        assert_eq!(result.output, Some(json!({"slept_ms": 10})));
        assert!(result.execution_time_ms >= 10);
    }
}
