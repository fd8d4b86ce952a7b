//! RPC 注册表：版本 × 服务 × 命令的调用表。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use http::StatusCode;
use serde_json::Value;
use spark_contract::{MetadataCollection, ServiceError, ServiceProvider};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use super::RpcFrame;
use super::operation::{CallHandle, RpcOperation};

/// 注册表生命周期错误。
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("RPC 注册服务已在运行，禁止重复启动")]
    AlreadyRunning,
    #[error("尚未配置任何 RPC 操作，请先调用 configure")]
    NotConfigured,
    #[error(transparent)]
    Contract(#[from] ServiceError),
}

type OperationTable = HashMap<String, Arc<RpcOperation>>;

/// 流式前端的注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：同时服务 `[min, max]` 内的全部版本，旧客户端无需升级即可继续调用；
/// - **契约 (What)**：
///   - [`RpcRegistry::configure`] 为每个版本的每个命令构建调用器，并以整表替换的方式发布；
///   - [`RpcRegistry::run`] 只能成功一次，重复调用返回 [`RegistryError::AlreadyRunning`]；
///   - 流程名查找大小写不敏感；
/// - **逻辑 (How)**：调用表存放在 `ArcSwap` 中，查找无锁，重新配置不阻塞进行中的调用。
pub struct RpcRegistry {
    collection: Arc<MetadataCollection>,
    provider: Arc<dyn ServiceProvider>,
    operations: ArcSwap<OperationTable>,
    running: AtomicBool,
}

impl fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRegistry")
            .field("prefix", &self.collection.prefix())
            .field("operations", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl RpcRegistry {
    pub fn new(collection: Arc<MetadataCollection>, provider: Arc<dyn ServiceProvider>) -> Self {
        Self {
            collection,
            provider,
            operations: ArcSwap::from_pointee(OperationTable::new()),
            running: AtomicBool::new(false),
        }
    }

    /// 构建并发布全部版本的调用器，返回调用器个数。
    pub fn configure(&self) -> Result<usize, RegistryError> {
        let mut table = OperationTable::new();
        for metadata in self.collection.build_all()? {
            for command in metadata.procedures() {
                let operation = RpcOperation::configure(Arc::clone(&metadata), command)?;
                table.insert(operation.procedure().to_owned(), Arc::new(operation));
            }
        }
        let count = table.len();
        self.operations.store(Arc::new(table));
        info!(operations = count, "Discovered {count} operations");
        Ok(count)
    }

    /// 开始接受调用。
    pub fn run(&self) -> Result<usize, RegistryError> {
        let count = self.operations.load().len();
        if count == 0 {
            return Err(RegistryError::NotConfigured);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RegistryError::AlreadyRunning);
        }
        info!(operations = count, "Registered {count} operations");
        Ok(count)
    }

    /// 停止接受新调用，进行中的调用不受影响。
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.operations.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operation(&self, procedure: &str) -> Option<Arc<RpcOperation>> {
        self.operations
            .load()
            .get(&procedure.to_ascii_lowercase())
            .cloned()
    }

    /// 全部流程名，升序。
    pub fn procedures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// 按流程名发起调用。
    pub fn call(
        &self,
        procedure: &str,
        tokens: Vec<Value>,
        sink: mpsc::Sender<RpcFrame>,
    ) -> Result<CallHandle, ServiceError> {
        if !self.is_running() {
            return Err(ServiceError::service(
                StatusCode::SERVICE_UNAVAILABLE,
                "RPC service is not running",
            ));
        }
        let operation = self.operation(procedure).ok_or_else(|| {
            ServiceError::service(
                StatusCode::NOT_FOUND,
                format!("No such procedure: {procedure}"),
            )
        })?;
        Ok(operation.invoke(self.provider.as_ref(), tokens, sink))
    }
}
