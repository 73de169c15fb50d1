use serde::{Deserialize, Serialize};

use taskgrid_core::{GridError, GridResult};

/// 对端角色
///
/// 新连接被接受后发送的第一帧携带 4 字节角色代码，驱动器据此把连接
/// 交给对应角色的反应器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerRole {
    /// 任务节点，拉取并执行任务束
    TaskNode,
    /// 类加载请求方
    ClassRequester,
    /// 类加载提供方
    ClassProvider,
    /// 对等驱动器（兄弟协调器）
    PeerDriver,
}

impl PeerRole {
    /// 线上角色代码
    pub fn code(&self) -> u32 {
        match self {
            PeerRole::TaskNode => 1,
            PeerRole::ClassRequester => 2,
            PeerRole::ClassProvider => 3,
            PeerRole::PeerDriver => 4,
        }
    }

    /// 按角色代码解析，无法识别的代码对该连接是致命错误
    pub fn from_code(code: u32) -> GridResult<Self> {
        match code {
            1 => Ok(PeerRole::TaskNode),
            2 => Ok(PeerRole::ClassRequester),
            3 => Ok(PeerRole::ClassProvider),
            4 => Ok(PeerRole::PeerDriver),
            other => Err(GridError::UnknownPeerRole(other)),
        }
    }

    /// 识别帧的完整载荷：4 字节大端角色代码
    pub fn encode_frame(&self) -> [u8; 4] {
        self.code().to_be_bytes()
    }

    /// 从识别帧载荷解析角色
    pub fn decode_frame(payload: &[u8]) -> GridResult<Self> {
        if payload.len() != 4 {
            return Err(GridError::Protocol(format!(
                "识别帧长度应为 4 字节，实际 {} 字节",
                payload.len()
            )));
        }
        let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Self::from_code(code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::TaskNode => "task_node",
            PeerRole::ClassRequester => "class_requester",
            PeerRole::ClassProvider => "class_provider",
            PeerRole::PeerDriver => "peer_driver",
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 连接描述符：对端发现在网络上交换的驱动器端点信息
///
/// 按值比较用于去重和自连接检测。端口列表在构造时排序，
/// 保证比较与哈希不受顺序影响。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub ports: Vec<u16>,
    pub subnet_mask_len: u8,
}

impl ConnectionDescriptor {
    pub fn new<S: Into<String>>(host: S, mut ports: Vec<u16>, subnet_mask_len: u8) -> Self {
        ports.sort_unstable();
        Self {
            host: host.into(),
            ports,
            subnet_mask_len,
        }
    }

    /// 判断描述符是否指向本驱动器自身
    ///
    /// 比较已解析的本机 IPv4 地址与监听端口集合；IPv6 与 NAT 环境下
    /// 的行为是已知限制。
    pub fn is_self(&self, local_hosts: &[String], local_ports: &[u16]) -> bool {
        if !local_hosts.iter().any(|h| h == &self.host) {
            return false;
        }
        let mut sorted_local = local_ports.to_vec();
        sorted_local.sort_unstable();
        sorted_local == self.ports
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:?}/{}", self.host, self.ports, self.subnet_mask_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_code_round_trip() {
        for role in [
            PeerRole::TaskNode,
            PeerRole::ClassRequester,
            PeerRole::ClassProvider,
            PeerRole::PeerDriver,
        ] {
            let frame = role.encode_frame();
            assert_eq!(PeerRole::decode_frame(&frame).unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_role_code_rejected() {
        let err = PeerRole::from_code(0x7f).unwrap_err();
        assert!(matches!(err, GridError::UnknownPeerRole(0x7f)));

        // 帧长度错误同样是协议错误
        assert!(PeerRole::decode_frame(&[0, 1]).is_err());
    }

    #[test]
    fn test_descriptor_equality_ignores_port_order() {
        let a = ConnectionDescriptor::new("192.168.1.10", vec![11111, 11112], 24);
        let b = ConnectionDescriptor::new("192.168.1.10", vec![11112, 11111], 24);
        assert_eq!(a, b);
    }

    #[test]
    fn test_descriptor_self_detection() {
        let desc = ConnectionDescriptor::new("192.168.1.10", vec![11111, 11112], 24);
        let local_hosts = vec!["192.168.1.10".to_string(), "127.0.0.1".to_string()];

        assert!(desc.is_self(&local_hosts, &[11112, 11111]));
        // 端口不同则不是自身
        assert!(!desc.is_self(&local_hosts, &[11111, 11113]));
        // 地址不在本机地址列表中
        assert!(!desc.is_self(&["10.0.0.1".to_string()], &[11111, 11112]));
    }
}
