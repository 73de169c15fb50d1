use std::io;

use tokio::net::TcpStream;

use taskgrid_core::{GridError, GridResult};

/// 帧读取状态
#[derive(Debug)]
enum ReadState {
    /// 无进行中的读取
    Idle,
    /// 正在累积 4 字节大端长度前缀
    Length { buf: [u8; 4], filled: usize },
    /// 正在累积载荷
    Payload { buf: Vec<u8>, filled: usize },
}

/// 帧写出状态
#[derive(Debug)]
enum WriteState {
    Idle,
    /// 缓冲区含长度前缀与载荷，`written` 为已写出的字节数
    Writing { buf: Vec<u8>, written: usize },
}

/// 带长度前缀的消息帧通道
///
/// 线上格式：4 字节大端长度前缀 + 等长的不透明载荷。读写都是增量式的
/// 非阻塞操作，可以跨任意多次就绪事件分段推进同一个逻辑消息；
/// 一帧要么完整完成，要么以通道故障告终，不存在静默丢失数据的路径。
#[derive(Debug)]
pub struct FramedMessage {
    max_frame_size: usize,
    read: ReadState,
    write: WriteState,
}

impl FramedMessage {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            read: ReadState::Idle,
            write: WriteState::Idle,
        }
    }

    /// 开始读取一个新帧，丢弃任何未完成的读取状态
    pub fn begin_read(&mut self) {
        self.read = ReadState::Length {
            buf: [0u8; 4],
            filled: 0,
        };
    }

    pub fn read_in_progress(&self) -> bool {
        !matches!(self.read, ReadState::Idle)
    }

    /// 推进进行中的读取
    ///
    /// 返回 `Ok(Some(payload))` 表示一帧完成；`Ok(None)` 表示本轮可读
    /// 数据耗尽、帧尚未完整；流中途关闭或复位则返回断连错误，
    /// 未完成的半帧被丢弃。尚未调用 `begin_read` 时自动开始新帧。
    pub fn continue_read(&mut self, stream: &TcpStream) -> GridResult<Option<Vec<u8>>> {
        if !self.read_in_progress() {
            self.begin_read();
        }

        loop {
            match &mut self.read {
                ReadState::Idle => unreachable!("continue_read 总是先进入读取状态"),
                ReadState::Length { buf, filled } => {
                    match stream.try_read(&mut buf[*filled..]) {
                        Ok(0) => {
                            self.read = ReadState::Idle;
                            return Err(GridError::disconnected("读取长度前缀时连接关闭"));
                        }
                        Ok(n) => {
                            *filled += n;
                            if *filled < 4 {
                                continue;
                            }
                            let len = u32::from_be_bytes(*buf) as usize;
                            if len > self.max_frame_size {
                                self.read = ReadState::Idle;
                                return Err(GridError::FrameTooLarge {
                                    size: len,
                                    max: self.max_frame_size,
                                });
                            }
                            if len == 0 {
                                self.read = ReadState::Idle;
                                return Ok(Some(Vec::new()));
                            }
                            self.read = ReadState::Payload {
                                buf: vec![0u8; len],
                                filled: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) => {
                            self.read = ReadState::Idle;
                            return Err(map_transport_error(e, "读取长度前缀"));
                        }
                    }
                }
                ReadState::Payload { buf, filled } => {
                    match stream.try_read(&mut buf[*filled..]) {
                        Ok(0) => {
                            self.read = ReadState::Idle;
                            return Err(GridError::disconnected("读取载荷时连接关闭"));
                        }
                        Ok(n) => {
                            *filled += n;
                            if *filled == buf.len() {
                                let payload = std::mem::take(buf);
                                self.read = ReadState::Idle;
                                return Ok(Some(payload));
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) => {
                            self.read = ReadState::Idle;
                            return Err(map_transport_error(e, "读取载荷"));
                        }
                    }
                }
            }
        }
    }

    /// 开始写出一帧，自动加上长度前缀
    pub fn begin_write(&mut self, payload: &[u8]) -> GridResult<()> {
        if payload.len() > self.max_frame_size {
            return Err(GridError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        self.write = WriteState::Writing { buf, written: 0 };
        Ok(())
    }

    pub fn write_in_progress(&self) -> bool {
        !matches!(self.write, WriteState::Idle)
    }

    /// 推进进行中的写出
    ///
    /// 返回 `Ok(true)` 表示整帧已写出；`Ok(false)` 表示发送缓冲暂满。
    pub fn continue_write(&mut self, stream: &TcpStream) -> GridResult<bool> {
        loop {
            match &mut self.write {
                WriteState::Idle => return Ok(true),
                WriteState::Writing { buf, written } => {
                    match stream.try_write(&buf[*written..]) {
                        Ok(0) => {
                            self.write = WriteState::Idle;
                            return Err(GridError::disconnected("写出消息帧时连接关闭"));
                        }
                        Ok(n) => {
                            *written += n;
                            if *written == buf.len() {
                                self.write = WriteState::Idle;
                                return Ok(true);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) => {
                            self.write = WriteState::Idle;
                            return Err(map_transport_error(e, "写出消息帧"));
                        }
                    }
                }
            }
        }
    }
}

/// 把传输层 IO 错误归类为通道级故障
fn map_transport_error(err: io::Error, context: &str) -> GridError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => {
            GridError::ChannelDisconnected(format!("{}: {}", context, err))
        }
        _ => GridError::Io(err),
    }
}
