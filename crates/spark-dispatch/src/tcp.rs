//! 以换行分隔 JSON 承载 RPC 的 TCP 传输。
//!
//! # 教案式说明
//!
//! ## 意图 (Why)
//! - 为流式前端提供一个无需额外协议栈的线上承载：每行一个 JSON 消息，
//!   便于用 `nc` 等工具直接调试。
//!
//! ## 契约 (What)
//! - 客户端消息：`{"type":"call","id":1,"procedure":"…","args":[…]}` 与
//!   `{"type":"cancel","id":1}`；
//! - 服务端消息：`{"type":"result","id":1,"progress":false,"args":[…]}` 与
//!   `{"type":"error","id":1,"error":"…","message":"…"}`；
//! - 同一调用的帧按发出顺序写出；不同调用的帧可以交错；
//! - 无法解析的行以 `id = 0` 的错误消息回应，连接保持打开；
//! - 连接关闭时取消该连接上全部仍在进行的可取消调用。
//!
//! ## 逻辑 (How)
//! - 每条连接一个读循环与一个写任务，二者以 mpsc 通道衔接；
//! - 每次调用另起一个转发任务，把 [`RpcFrame`] 加上调用 id 后写入连接的通道。
//!
//! ## 注意事项 (Trade-offs)
//! - 同一连接上重复使用仍在进行的调用 id 时，新调用覆盖旧句柄，旧调用无法再被取消。

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spark_contract::{CancellationToken, ServiceError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::retry::FibonacciBackoff;
use crate::rpc::{CallHandle, RpcFrame, RpcRegistry};

/// 无法归属到任何调用的错误消息使用的 id。
pub const UNKNOWN_CALL_ID: u64 = 0;
/// 无法解析的入站行对应的错误码。
pub const INVALID_MESSAGE: &str = "rpc.invalid_message";

/// 客户端发往服务端的消息。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Call {
        id: u64,
        procedure: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Cancel {
        id: u64,
    },
}

/// 服务端发往客户端的消息。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Result {
        id: u64,
        progress: bool,
        args: Vec<Value>,
    },
    Error {
        id: u64,
        error: String,
        message: String,
    },
}

impl ServerMessage {
    /// 为回复帧加上调用 id。
    pub fn from_frame(id: u64, frame: RpcFrame) -> Self {
        match frame {
            RpcFrame::Result { progress, args } => Self::Result { id, progress, args },
            RpcFrame::Error { error, message } => Self::Error { id, error, message },
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    fn failure(id: u64, err: &ServiceError) -> Self {
        Self::from_frame(id, RpcFrame::failure(err))
    }
}

/// 传输层错误。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("绑定 RPC 监听地址 {addr} 失败: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("接受 RPC 连接失败: {0}")]
    Accept(#[source] io::Error),
    #[error("RPC 监听在 {attempts} 次重试后仍未恢复")]
    RetriesExhausted { attempts: u32 },
}

/// RPC 的 TCP 监听器。
#[derive(Debug)]
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<RpcRegistry>,
    channel_capacity: usize,
}

impl RpcServer {
    /// 绑定到指定地址。
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<RpcRegistry>,
        channel_capacity: usize,
    ) -> Result<Self, TransportError> {
        let bind_error = |source| TransportError::Bind { addr, source };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        Ok(Self {
            listener,
            local_addr,
            registry,
            channel_capacity: channel_capacity.max(1),
        })
    }

    /// 返回实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 接受连接直到 `shutdown` 被触发；每条连接在独立任务上处理。
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), TransportError> {
        info!(addr = %self.local_addr, "rpc listener started");
        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(addr = %self.local_addr, "rpc listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = accepted.map_err(TransportError::Accept)?;
            let registry = Arc::clone(&self.registry);
            let capacity = self.channel_capacity;
            tokio::spawn(
                async move {
                    if let Err(err) = handle_connection(stream, registry, capacity).await {
                        warn!(error = %err, "rpc connection closed with error");
                    }
                }
                .instrument(info_span!("rpc.connection", peer = %peer)),
            );
        }
    }
}

/// 绑定并服务；绑定或接受失败后按退避序列重试，直到关闭或重试用尽。
pub async fn serve_with_retry(
    addr: SocketAddr,
    registry: Arc<RpcRegistry>,
    channel_capacity: usize,
    mut backoff: FibonacciBackoff,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    loop {
        let failure = match RpcServer::bind(addr, Arc::clone(&registry), channel_capacity).await {
            Ok(server) => {
                backoff.reset();
                match server.serve(shutdown.clone()).await {
                    Ok(()) => return Ok(()),
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };
        let Some(delay) = backoff.next() else {
            return Err(TransportError::RetriesExhausted {
                attempts: backoff.attempts(),
            });
        };
        warn!(error = %failure, delay_ms = delay.as_millis() as u64, "rpc listener failed, retrying");
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<RpcRegistry>,
    capacity: usize,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerMessage>(capacity);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            write_half.write_all(&line).await?;
        }
        write_half.shutdown().await
    });

    let mut calls: HashMap<u64, CallHandle> = HashMap::new();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        calls.retain(|_, call| !call.is_finished());
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(ClientMessage::Call {
                id,
                procedure,
                args,
            }) => {
                let (frames, frames_rx) = mpsc::channel(capacity);
                match registry.call(&procedure, args, frames) {
                    Ok(call) => {
                        tokio::spawn(forward(id, frames_rx, outbound.clone()));
                        calls.insert(id, call);
                    }
                    Err(err) => {
                        warn!(id, procedure = %procedure, error = %err, "call refused");
                        if outbound.send(ServerMessage::failure(id, &err)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(ClientMessage::Cancel { id }) => match calls.get(&id) {
                Some(call) => {
                    let cancelled = call.cancel();
                    debug!(id, cancelled, "cancel requested");
                }
                None => debug!(id, "cancel for unknown or finished call"),
            },
            Err(err) => {
                let err = ServiceError::serialization(format!("Invalid message: {err}"));
                let message = ServerMessage::Error {
                    id: UNKNOWN_CALL_ID,
                    error: INVALID_MESSAGE.to_owned(),
                    message: err.public_message().into_owned(),
                };
                if outbound.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    for call in calls.values() {
        call.cancel();
    }
    drop(outbound);
    match writer.await {
        Ok(result) => result,
        Err(join) => Err(io::Error::other(join)),
    }
}

/// 把单次调用的帧按顺序转发到连接的写通道。
async fn forward(
    id: u64,
    mut frames: mpsc::Receiver<RpcFrame>,
    outbound: mpsc::Sender<ServerMessage>,
) {
    while let Some(frame) = frames.recv().await {
        if outbound
            .send(ServerMessage::from_frame(id, frame))
            .await
            .is_err()
        {
            break;
        }
    }
}
