//! 命令处理器与调用上下文。
//!
//! # 教案式说明
//! - **意图 (Why)**：以封闭的形态枚举 [`CommandHandler`] 取代运行期生成的调用垫片，
//!   注册时即可确定响应策略；以显式的 [`Invocation`] 取代线程局部的服务上下文。
//! - **契约 (What)**：
//!   - 五种形态分别对应同步无返回、同步有返回、异步无返回、异步有返回与流式；
//!   - 每次调用拥有独立的 [`ServiceScope`]，随 [`Invocation`] 一同被处理器持有，
//!     调用到达终态后恰好释放一次；
//!   - [`CancellationToken`] 在调用方与处理器之间共享，协作式生效。
//! - **风险 (Trade-offs)**：处理器通过 `Any` 向下转型解析服务实例，类型不符只能在运行期发现，
//!   因此解析失败会以 [`ServiceError::Unexpected`] 报告。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, ServiceError};
use crate::model::Metadata;
use crate::value::{ContractValue, NativeValue};

/// 协作式取消令牌。
///
/// # 教案式说明
/// - **契约 (What)**：克隆体共享同一原子位；`cancel` 首次触发返回 `true`，重复调用返回
///   `false`；`cancelled().await` 在取消后完成。
/// - **逻辑 (How)**：原子位负责快速查询，`Notify` 负责唤醒异步等待者。
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 标记取消并唤醒所有等待者。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 等待取消发生。
    pub async fn cancelled(&self) {
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        loop {
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

/// 租户标识。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UserDomain(String);

impl UserDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    /// 由请求主机名推导租户。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：本机访问时采用 `userdomain` 查询参数（缺省为空），否则把主机名中的
    ///   `.` 替换为 `_`；端口部分不参与推导。
    pub fn from_host(host: &str, query_domain: Option<&str>) -> Self {
        let hostname = host.split(':').next().unwrap_or_default();
        if hostname.eq_ignore_ascii_case("localhost") || hostname == "127.0.0.1" {
            return Self(query_domain.unwrap_or_default().to_owned());
        }
        Self(hostname.replace('.', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 每次调用显式传递的服务上下文。
#[derive(Clone, Debug)]
pub struct ServiceContext {
    pub metadata: Arc<Metadata>,
    pub version: u32,
    pub user_domain: UserDomain,
}

impl ServiceContext {
    pub fn new(metadata: Arc<Metadata>, user_domain: UserDomain) -> Self {
        Self {
            version: metadata.cur_version,
            metadata,
            user_domain,
        }
    }
}

/// 单次调用的服务解析作用域。
pub trait ServiceScope: Send + Sync {
    /// 按本地服务名解析实例。
    fn resolve(&self, service: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// 为每次调用创建隔离作用域的服务提供者。
pub trait ServiceProvider: Send + Sync + 'static {
    fn create_scope(&self) -> Arc<dyn ServiceScope>;
}

type InstanceFactory = Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Singleton(Arc<dyn Any + Send + Sync>),
    Scoped(InstanceFactory),
}

/// 以服务名注册单例或作用域实例的默认提供者。
///
/// 作用域实例在同一作用域内首次解析时创建并缓存，作用域释放时一并释放。
#[derive(Clone, Default)]
pub struct ScopedServiceProvider {
    registrations: HashMap<String, Registration>,
}

impl ScopedServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton<T: Any + Send + Sync>(
        mut self,
        service: impl Into<String>,
        instance: Arc<T>,
    ) -> Self {
        self.registrations
            .insert(service.into(), Registration::Singleton(instance));
        self
    }

    pub fn scoped<T, F>(mut self, service: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let factory: InstanceFactory =
            Arc::new(move || -> Arc<dyn Any + Send + Sync> { Arc::new(factory()) });
        self.registrations
            .insert(service.into(), Registration::Scoped(factory));
        self
    }
}

impl fmt::Debug for ScopedServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedServiceProvider")
            .field("services", &self.registrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceProvider for ScopedServiceProvider {
    fn create_scope(&self) -> Arc<dyn ServiceScope> {
        Arc::new(ProviderScope {
            registrations: self.registrations.clone(),
            instances: Mutex::new(HashMap::new()),
        })
    }
}

struct ProviderScope {
    registrations: HashMap<String, Registration>,
    instances: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceScope for ProviderScope {
    fn resolve(&self, service: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        match self.registrations.get(service)? {
            Registration::Singleton(instance) => Some(Arc::clone(instance)),
            Registration::Scoped(factory) => {
                let mut instances = self.instances.lock();
                let instance = instances
                    .entry(service.to_owned())
                    .or_insert_with(|| factory());
                Some(Arc::clone(instance))
            }
        }
    }
}

/// 单个已装配的参数。
#[derive(Clone)]
pub enum Argument {
    /// 线上参数；`None` 表示调用方省略了可选参数且未声明默认值。
    Value(Option<NativeValue>),
    /// 本次调用的取消令牌。
    Cancellation(CancellationToken),
    /// 传输层提供的原始上下文。
    Platform(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Argument::Cancellation(token) => f.debug_tuple("Cancellation").field(token).finish(),
            Argument::Platform(_) => f.write_str("Platform(..)"),
        }
    }
}

/// 按参数声明顺序排列的实参表。
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    entries: Vec<(String, Argument)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, argument: Argument) {
        self.entries.push((name.into(), argument));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, index: usize) -> Option<&Argument> {
        self.entries.get(index).map(|(_, argument)| argument)
    }

    fn find(&self, name: &str) -> Option<&Argument> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, argument)| argument)
    }

    /// 读取线上参数并转换为强类型；省略的参数按 `Null` 转换。
    pub fn get<T: ContractValue>(&self, name: &str) -> Result<T> {
        match self.find(name) {
            Some(Argument::Value(value)) => {
                T::from_native(value.clone().unwrap_or(NativeValue::Null)).map_err(|err| {
                    ServiceError::serialization(format!("Argument {name}: {err}"))
                })
            }
            Some(_) => Err(ServiceError::unexpected(format!(
                "argument `{name}` is not a wire value"
            ))),
            None => Err(ServiceError::unexpected(format!(
                "argument `{name}` is not declared"
            ))),
        }
    }

    /// 读取取消令牌参数（若声明）。
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.entries.iter().find_map(|(_, argument)| match argument {
            Argument::Cancellation(token) => Some(token),
            _ => None,
        })
    }

    /// 读取平台相关参数并向下转型。
    pub fn platform<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries.iter().find_map(|(_, argument)| match argument {
            Argument::Platform(raw) => Arc::clone(raw).downcast::<T>().ok(),
            _ => None,
        })
    }
}

/// 单次调用交给处理器的全部输入。
#[derive(Clone)]
pub struct Invocation {
    pub context: ServiceContext,
    pub service: String,
    pub scope: Arc<dyn ServiceScope>,
    pub args: Arguments,
    pub cancellation: CancellationToken,
}

impl Invocation {
    /// 从本次调用的作用域解析命令所属服务的实例。
    pub fn instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let raw = self.scope.resolve(&self.service).ok_or_else(|| {
            ServiceError::unexpected(format!("service `{}` is not registered", self.service))
        })?;
        raw.downcast::<T>().map_err(|_| {
            ServiceError::unexpected(format!(
                "service `{}` does not resolve to the requested type",
                self.service
            ))
        })
    }

    pub fn arg<T: ContractValue>(&self, name: &str) -> Result<T> {
        self.args.get(name)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("service", &self.service)
            .field("version", &self.context.version)
            .field("args", &self.args)
            .finish()
    }
}

pub type SyncVoidFn = Arc<dyn Fn(Invocation) -> Result<()> + Send + Sync>;
pub type SyncValueFn = Arc<dyn Fn(Invocation) -> Result<NativeValue> + Send + Sync>;
pub type AsyncVoidFn = Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type AsyncValueFn =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<NativeValue>> + Send + Sync>;
pub type StreamFn = Arc<
    dyn Fn(Invocation) -> Result<BoxStream<'static, Result<NativeValue>>> + Send + Sync,
>;

/// 注册期选定的响应策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseStrategy {
    SyncVoid,
    SyncValue,
    AsyncVoid,
    AsyncValue,
    Streaming,
}

/// 命令处理器的封闭形态集合。
#[derive(Clone)]
pub enum CommandHandler {
    SyncVoid(SyncVoidFn),
    SyncValue(SyncValueFn),
    AsyncVoid(AsyncVoidFn),
    AsyncValue(AsyncValueFn),
    Stream(StreamFn),
}

impl CommandHandler {
    pub fn sync_void<F>(f: F) -> Self
    where
        F: Fn(Invocation) -> Result<()> + Send + Sync + 'static,
    {
        Self::SyncVoid(Arc::new(f))
    }

    pub fn sync<T, F>(f: F) -> Self
    where
        T: ContractValue,
        F: Fn(Invocation) -> Result<T> + Send + Sync + 'static,
    {
        Self::SyncValue(Arc::new(move |invocation| f(invocation).map(T::into_native)))
    }

    pub fn future_void<F, Fut>(f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::AsyncVoid(Arc::new(move |invocation| Box::pin(f(invocation))))
    }

    pub fn future<T, F, Fut>(f: F) -> Self
    where
        T: ContractValue + 'static,
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::AsyncValue(Arc::new(move |invocation| {
            let fut = f(invocation);
            Box::pin(async move { fut.await.map(T::into_native) })
        }))
    }

    pub fn stream<T, F, S>(f: F) -> Self
    where
        T: ContractValue + 'static,
        F: Fn(Invocation) -> Result<S> + Send + Sync + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self::Stream(Arc::new(move |invocation| {
            let stream = f(invocation)?;
            Ok(stream.map(|item| item.map(T::into_native)).boxed())
        }))
    }

    pub fn strategy(&self) -> ResponseStrategy {
        match self {
            CommandHandler::SyncVoid(_) => ResponseStrategy::SyncVoid,
            CommandHandler::SyncValue(_) => ResponseStrategy::SyncValue,
            CommandHandler::AsyncVoid(_) => ResponseStrategy::AsyncVoid,
            CommandHandler::AsyncValue(_) => ResponseStrategy::AsyncValue,
            CommandHandler::Stream(_) => ResponseStrategy::Streaming,
        }
    }

    /// 以单值语义调用非流式处理器；无返回值的形态产出 `None`。
    ///
    /// 流式处理器不支持单值调用，返回 [`ServiceError::Service`]（501）。
    pub async fn invoke_unary(&self, invocation: Invocation) -> Result<Option<NativeValue>> {
        match self {
            CommandHandler::SyncVoid(f) => f(invocation).map(|()| None),
            CommandHandler::SyncValue(f) => f(invocation).map(Some),
            CommandHandler::AsyncVoid(f) => f(invocation).await.map(|()| None),
            CommandHandler::AsyncValue(f) => f(invocation).await.map(Some),
            CommandHandler::Stream(_) => Err(ServiceError::service(
                http::StatusCode::NOT_IMPLEMENTED,
                "Not implemented for HTTP",
            )),
        }
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandHandler::{:?}", self.strategy())
    }
}
