//! 单个命令在单个版本下的调用器。
//!
//! # 教案式说明
//! - **意图 (Why)**：注册期一次性确定响应策略与取消能力，调用期不再检查返回类型形状；
//! - **契约 (What)**：
//!   - 每次调用创建独立的服务作用域，调用进入终态前释放，且只释放一次；
//!   - 支持取消的命令为每次调用创建新的取消令牌，并经由 [`CallHandle`] 交给调用方；
//!   - 参数装配或处理器执行中的任何失败（包括 panic）都转换为一个错误帧，不向外传播；
//!   - 流式命令的每个元素是一个进度帧，正常结束追加一个空的终止帧；
//!     取消生效后不再发送任何帧，已发出的帧不会撤回。
//! - **风险 (Trade-offs)**：流结束与取消几乎同时发生时，以先被观察到的一方为准，
//!   因此终止帧可能与取消请求擦肩而过。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use http::StatusCode;
use serde_json::Value;
use spark_contract::{
    CancellationToken, Command, CommandHandler, Invocation, Metadata, NativeValue, Parameter,
    ResponseStrategy, Serializer, ServiceContext, ServiceError, ServiceProvider, ServiceScope,
    TypeInfo, UserDomain,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use super::RpcFrame;
use super::state::{CallState, CallStatus};

/// 调用结束的方式；失败以 `Err` 表示。
enum Flow {
    Completed,
    Cancelled,
}

/// 已配置的命令调用器。
pub struct RpcOperation {
    metadata: Arc<Metadata>,
    command: Command,
    strategy: ResponseStrategy,
    supports_cancellation: bool,
}

impl RpcOperation {
    /// 为元数据中的命令选定响应策略。
    pub fn configure(metadata: Arc<Metadata>, command: &Command) -> Result<Self, ServiceError> {
        let strategy = command.strategy().ok_or_else(|| {
            ServiceError::build(format!("command {} has no handler", command.fullname))
        })?;
        Ok(Self {
            supports_cancellation: command.supports_cancellation(),
            command: command.clone(),
            strategy,
            metadata,
        })
    }

    pub fn procedure(&self) -> &str {
        &self.command.fullname
    }

    pub fn version(&self) -> u32 {
        self.metadata.cur_version
    }

    pub fn strategy(&self) -> ResponseStrategy {
        self.strategy
    }

    pub fn supports_cancellation(&self) -> bool {
        self.supports_cancellation
    }

    /// 发起一次调用，回复帧按发出顺序写入 `sink`。
    ///
    /// 必须在 Tokio 运行时内调用；调用在独立任务上执行，本方法立即返回句柄。
    pub fn invoke(
        self: &Arc<Self>,
        provider: &dyn ServiceProvider,
        tokens: Vec<Value>,
        sink: mpsc::Sender<RpcFrame>,
    ) -> CallHandle {
        let scope = provider.create_scope();
        let cancellation = self.supports_cancellation.then(CancellationToken::new);
        let status = Arc::new(CallStatus::new());
        let span = info_span!(
            "rpc.call",
            procedure = %self.command.fullname,
            version = self.metadata.cur_version,
            strategy = ?self.strategy,
        );
        let task = tokio::spawn(
            Arc::clone(self)
                .run(scope, cancellation.clone(), tokens, sink, Arc::clone(&status))
                .instrument(span),
        );
        CallHandle {
            procedure: self.command.fullname.clone(),
            cancellation,
            status,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        scope: Arc<dyn ServiceScope>,
        cancellation: Option<CancellationToken>,
        tokens: Vec<Value>,
        sink: mpsc::Sender<RpcFrame>,
        status: Arc<CallStatus>,
    ) -> CallState {
        status.advance(CallState::Invoking);
        let outcome = AssertUnwindSafe(self.execute(scope, cancellation.as_ref(), &tokens, &sink))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::unexpected(format!(
                    "handler {} panicked",
                    self.command.fullname
                )))
            });

        let terminal = match outcome {
            Ok(Flow::Completed) => CallState::Completed,
            Ok(Flow::Cancelled) => CallState::Cancelled,
            Err(err) => {
                if err.is_internal() {
                    error!(code = err.code(), error = %err, "Error executing method {}", self.command.fullname);
                } else {
                    warn!(code = err.code(), error = %err, "call rejected");
                }
                if sink.send(RpcFrame::failure(&err)).await.is_err() {
                    debug!("caller went away before the error frame");
                }
                CallState::Failed
            }
        };
        status.advance(terminal);
        debug!(state = ?terminal, "call finished");
        terminal
    }

    async fn execute(
        &self,
        scope: Arc<dyn ServiceScope>,
        cancellation: Option<&CancellationToken>,
        tokens: &[Value],
        sink: &mpsc::Sender<RpcFrame>,
    ) -> Result<Flow, ServiceError> {
        let command = &self.command;
        let serializer = Serializer::new(&self.metadata);
        let args = serializer.deserialize_positional_arguments(
            tokens,
            &command.parameters,
            cancellation,
            no_transport_context,
        )?;
        let handler = command.handler.as_ref().ok_or_else(|| {
            ServiceError::unexpected(format!("command {} has no handler", command.fullname))
        })?;
        let invocation = Invocation {
            context: ServiceContext::new(Arc::clone(&self.metadata), UserDomain::default()),
            service: command.service_native.clone(),
            scope,
            args,
            cancellation: cancellation.cloned().unwrap_or_default(),
        };

        if let CommandHandler::Stream(open) = handler {
            let items = open(invocation)?;
            return self.pump(items, cancellation, &serializer, sink).await;
        }
        let args = match handler.invoke_unary(invocation).await? {
            Some(value) if !command.return_type.is_void() => {
                vec![serializer.serialize(&value, &command.return_type)?]
            }
            _ => Vec::new(),
        };
        let frame = RpcFrame::Result {
            progress: false,
            args,
        };
        if sink.send(frame).await.is_err() {
            debug!("caller went away before the result frame");
        }
        Ok(Flow::Completed)
    }

    /// 把流元素逐个转为进度帧，直到流结束、失败、取消或调用方离开。
    async fn pump(
        &self,
        mut items: BoxStream<'static, Result<NativeValue, ServiceError>>,
        cancellation: Option<&CancellationToken>,
        serializer: &Serializer<'_>,
        sink: &mpsc::Sender<RpcFrame>,
    ) -> Result<Flow, ServiceError> {
        let item_type = TypeInfo {
            is_observable: false,
            is_primitive: !self.command.return_type.is_array
                && !self.metadata.entities.contains(&self.command.return_type.name),
            ..self.command.return_type.clone()
        };
        let never = CancellationToken::new();
        let token = cancellation.unwrap_or(&never);
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(Flow::Cancelled),
                next = items.next() => next,
            };
            match next {
                Some(Ok(item)) => {
                    let frame = RpcFrame::progress(serializer.serialize(&item, &item_type)?);
                    if sink.send(frame).await.is_err() {
                        return Ok(Flow::Cancelled);
                    }
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        if sink.send(RpcFrame::empty()).await.is_err() {
            debug!("caller went away before the final frame");
        }
        Ok(Flow::Completed)
    }
}

fn no_transport_context(parameter: &Parameter) -> Result<Arc<dyn Any + Send + Sync>, ServiceError> {
    Err(ServiceError::service(
        StatusCode::NOT_IMPLEMENTED,
        format!(
            "Unsupported platform specific parameter: {}",
            parameter.type_info.name
        ),
    ))
}

/// 一次调用的句柄。
///
/// # 教案式说明
/// - **契约 (What)**：丢弃句柄不会中止调用；只有支持取消的命令才有取消能力，
///   对其余命令调用 [`CallHandle::cancel`] 返回 `false`。
#[derive(Debug)]
pub struct CallHandle {
    procedure: String,
    cancellation: Option<CancellationToken>,
    status: Arc<CallStatus>,
    task: JoinHandle<CallState>,
}

impl CallHandle {
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// 返回给调用方的取消能力。
    pub fn cancel_capability(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// 请求取消；首次生效返回 `true`。
    pub fn cancel(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::cancel)
    }

    pub fn state(&self) -> CallState {
        self.status.load()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 等待调用进入终态。
    pub async fn join(self) -> CallState {
        self.task.await.unwrap_or(CallState::Failed)
    }
}
