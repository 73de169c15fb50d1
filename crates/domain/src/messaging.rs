use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskgrid_core::GridResult;

use crate::entities::{Task, TaskResult};

/// 帧载荷消息的编解码
///
/// 除识别帧（裸 4 字节角色代码）外，所有帧载荷都是 JSON 编码的消息体。
pub trait WireMessage: Serialize + DeserializeOwned {
    fn encode(&self) -> GridResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(payload: &[u8]) -> GridResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// 节点握手：任务通道建立后节点发送的第一条消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHandshake {
    pub node_id: String,
    pub thread_count: usize,
}

impl WireMessage for NodeHandshake {}

/// 任务束：一轮派发给单个节点的一批任务，全部属于同一作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBundle {
    pub job_id: Uuid,
    pub job_name: String,
    pub tasks: Vec<Task>,
}

impl WireMessage for TaskBundle {}

impl TaskBundle {
    pub fn new(job_id: Uuid, job_name: String, tasks: Vec<Task>) -> Self {
        Self {
            job_id,
            job_name,
            tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// 束执行结果：节点执行完一个任务束后的回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleResult {
    pub job_id: Uuid,
    pub results: Vec<TaskResult>,
}

impl WireMessage for BundleResult {}

/// 类加载资源请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub name: String,
}

impl WireMessage for ResourceRequest {}

/// 类加载资源响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub name: String,
    pub found: bool,
    pub data: Option<Vec<u8>>,
}

impl WireMessage for ResourceResponse {}

impl ResourceResponse {
    pub fn found(name: String, data: Vec<u8>) -> Self {
        Self {
            name,
            found: true,
            data: Some(data),
        }
    }

    pub fn not_found(name: String) -> Self {
        Self {
            name,
            found: false,
            data: None,
        }
    }
}

/// 类加载资源供给：提供方主动推送的资源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOffer {
    pub name: String,
    pub data: Vec<u8>,
}

impl WireMessage for ResourceOffer {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_encode_decode() {
        let job_id = Uuid::new_v4();
        let bundle = TaskBundle::new(
            job_id,
            "demo".to_string(),
            vec![
                Task::new(job_id, 0, json!({"n": 1})),
                Task::new(job_id, 1, json!({"n": 2})),
            ],
        );

        let encoded = bundle.encode().unwrap();
        let decoded = TaskBundle::decode(&encoded).unwrap();
        assert_eq!(decoded.job_id, job_id);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.tasks[1].position, 1);
    }

    #[test]
    fn test_malformed_payload_is_serialization_error() {
        let err = TaskBundle::decode(b"not json").unwrap_err();
        assert!(matches!(err, taskgrid_core::GridError::Serialization(_)));
    }

    #[test]
    fn test_resource_response_factories() {
        let hit = ResourceResponse::found("com.example.Foo".to_string(), vec![0xCA, 0xFE]);
        assert!(hit.found);
        assert_eq!(hit.data.as_deref(), Some(&[0xCA, 0xFE][..]));

        let miss = ResourceResponse::not_found("com.example.Bar".to_string());
        assert!(!miss.found);
        assert!(miss.data.is_none());
    }
}
