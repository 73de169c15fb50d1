use std::sync::Arc;

use tokio::io::Interest;
use tracing::{debug, warn};

use taskgrid_core::{GridError, GridResult};
use taskgrid_domain::messaging::{ResourceOffer, ResourceRequest, ResourceResponse, WireMessage};
use taskgrid_domain::value_objects::PeerRole;

use crate::reactor::{ChannelContext, RoleHandler};
use crate::resource_cache::ResourceCache;

/// 类加载通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// 请求方：等待下一条资源请求
    AwaitingRequest,
    /// 请求方：正在写出响应，写完回到等待请求
    SendingResponse,
    /// 提供方：空闲等待资源供给帧
    IdleProvider,
}

/// 类加载通道的角色数据
#[derive(Debug)]
pub struct ClassChannelData {
    role: PeerRole,
}

/// 类加载反应器的状态机
///
/// 请求方在 `AwaitingRequest` 与 `SendingResponse` 之间往复；
/// 提供方停留在 `IdleProvider`，其推送的资源进入共享缓存。
pub struct ClassChannelHandler {
    cache: Arc<ResourceCache>,
}

impl ClassChannelHandler {
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache }
    }
}

impl RoleHandler for ClassChannelHandler {
    type State = ClassState;
    type Data = ClassChannelData;
    type Seed = PeerRole;

    fn role_name(&self) -> &'static str {
        "class"
    }

    fn on_register(&mut self, _id: u64, seed: Self::Seed) -> (Self::State, Self::Data) {
        let state = match seed {
            PeerRole::ClassProvider => ClassState::IdleProvider,
            _ => ClassState::AwaitingRequest,
        };
        (state, ClassChannelData { role: seed })
    }

    fn interest(&self, state: Self::State) -> Interest {
        match state {
            ClassState::AwaitingRequest | ClassState::IdleProvider => Interest::READABLE,
            ClassState::SendingResponse => Interest::WRITABLE,
        }
    }

    fn perform_transition(&mut self, ctx: &mut ChannelContext<Self>) -> GridResult<Self::State> {
        match ctx.state {
            ClassState::AwaitingRequest => {
                match ctx.frame.continue_read(&ctx.stream)? {
                    None => Ok(ClassState::AwaitingRequest),
                    Some(payload) => {
                        let request = ResourceRequest::decode(&payload)?;
                        let response = match self.cache.get(&request.name) {
                            Some(data) => {
                                debug!("资源命中: {} ({} 字节)", request.name, data.len());
                                ResourceResponse::found(request.name, data)
                            }
                            None => {
                                debug!("资源未找到: {}", request.name);
                                ResourceResponse::not_found(request.name)
                            }
                        };
                        ctx.frame.begin_write(&response.encode()?)?;
                        Ok(ClassState::SendingResponse)
                    }
                }
            }
            ClassState::SendingResponse => {
                if ctx.frame.continue_write(&ctx.stream)? {
                    Ok(ClassState::AwaitingRequest)
                } else {
                    // 发送缓冲暂满，保持状态等待下一次可写
                    Ok(ClassState::SendingResponse)
                }
            }
            ClassState::IdleProvider => {
                match ctx.frame.continue_read(&ctx.stream)? {
                    None => Ok(ClassState::IdleProvider),
                    Some(payload) => {
                        let offer = ResourceOffer::decode(&payload).map_err(|e| {
                            GridError::Protocol(format!("提供方供给帧格式错误: {}", e))
                        })?;
                        debug!("收录资源: {} ({} 字节)", offer.name, offer.data.len());
                        self.cache.insert(offer.name, offer.data);
                        Ok(ClassState::IdleProvider)
                    }
                }
            }
        }
    }

    fn on_disconnect(&mut self, ctx: ChannelContext<Self>) {
        warn!(
            "类加载通道断开: #{} ({}) 角色 [{}]",
            ctx.id, ctx.peer_addr, ctx.data.role
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FramedMessage;
    use crate::reactor::Registration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
        stream.flush().await.unwrap();
    }

    fn make_ctx(
        handler: &mut ClassChannelHandler,
        stream: TcpStream,
        role: PeerRole,
    ) -> ChannelContext<ClassChannelHandler> {
        let registration = Registration::new(stream, role);
        let peer_addr = registration.stream.peer_addr().unwrap();
        let (state, data) = handler.on_register(0, registration.seed);
        ChannelContext {
            id: 0,
            stream: registration.stream,
            peer_addr,
            state,
            frame: FramedMessage::new(1024 * 1024),
            data,
        }
    }

    #[tokio::test]
    async fn test_provider_offer_lands_in_cache() {
        let cache = Arc::new(ResourceCache::new());
        let mut handler = ClassChannelHandler::new(Arc::clone(&cache));
        let (mut client, server) = socket_pair().await;
        let mut ctx = make_ctx(&mut handler, server, PeerRole::ClassProvider);
        assert_eq!(ctx.state, ClassState::IdleProvider);

        let offer = ResourceOffer {
            name: "com.example.Foo".to_string(),
            data: vec![0xCA, 0xFE],
        };
        write_frame(&mut client, &offer.encode().unwrap()).await;

        loop {
            ctx.stream.ready(Interest::READABLE).await.unwrap();
            let next = handler.perform_transition(&mut ctx).unwrap();
            ctx.state = next;
            if cache.get("com.example.Foo").is_some() {
                break;
            }
        }
        assert_eq!(cache.get("com.example.Foo"), Some(vec![0xCA, 0xFE]));
    }

    #[tokio::test]
    async fn test_requester_round_trip() {
        let cache = Arc::new(ResourceCache::new());
        cache.insert("com.example.Foo".to_string(), vec![1, 2, 3]);
        let mut handler = ClassChannelHandler::new(Arc::clone(&cache));
        let (mut client, server) = socket_pair().await;
        let mut ctx = make_ctx(&mut handler, server, PeerRole::ClassRequester);
        assert_eq!(ctx.state, ClassState::AwaitingRequest);

        let request = ResourceRequest {
            name: "com.example.Foo".to_string(),
        };
        write_frame(&mut client, &request.encode().unwrap()).await;

        // 驱动状态机直到响应写出完毕、回到等待请求状态
        loop {
            let interest = handler.interest(ctx.state);
            ctx.stream.ready(interest).await.unwrap();
            let next = handler.perform_transition(&mut ctx).unwrap();
            let wrote = ctx.state == ClassState::SendingResponse
                && next == ClassState::AwaitingRequest;
            ctx.state = next;
            if wrote {
                break;
            }
        }

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        client.read_exact(&mut payload).await.unwrap();
        let response = ResourceResponse::decode(&payload).unwrap();
        assert!(response.found);
        assert_eq!(response.data, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_malformed_request_is_fatal_for_channel() {
        let cache = Arc::new(ResourceCache::new());
        let mut handler = ClassChannelHandler::new(cache);
        let (mut client, server) = socket_pair().await;
        let mut ctx = make_ctx(&mut handler, server, PeerRole::ClassRequester);

        write_frame(&mut client, b"not json").await;

        ctx.stream.ready(Interest::READABLE).await.unwrap();
        let err = handler.perform_transition(&mut ctx).unwrap_err();
        assert!(matches!(err, GridError::Serialization(_)));
    }
}
