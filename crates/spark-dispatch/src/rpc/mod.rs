//! # rpc 模块说明
//!
//! ## 角色定位（Why）
//! - 流式前端：每个命令在注册期选定响应策略，调用期按策略产出单个结果帧，
//!   或“若干进度帧 + 一个终止帧”；
//! - 支持取消的命令向调用方返回取消能力，取消以协作方式生效。
//!
//! ## 设计要求（What）
//! - [`RpcRegistry`]：以 `{prefix}.v{version}.{service}.{command}` 为键的调用表，可原子替换；
//! - [`RpcOperation`]：单个命令在单个版本下的调用器；
//! - [`CallHandle`]：一次调用的句柄，暴露状态、取消能力与终态等待；
//! - [`RpcFrame`]：与传输无关的回复帧，由传输层编码为线上消息。

mod operation;
mod registry;
mod state;

use serde_json::Value;
use spark_contract::ServiceError;

pub use self::operation::{CallHandle, RpcOperation};
pub use self::registry::{RegistryError, RpcRegistry};
pub use self::state::CallState;

/// 一次调用产出的回复帧。
///
/// # 教案式说明
/// - **契约 (What)**：`Result { progress: true }` 为进度帧，不结束调用；
///   `Result { progress: false }` 与 `Error` 为终止帧，每次调用恰好一个
///   （调用方离开或取消生效时可能没有）。
#[derive(Clone, Debug, PartialEq)]
pub enum RpcFrame {
    Result { progress: bool, args: Vec<Value> },
    Error { error: String, message: String },
}

impl RpcFrame {
    /// 不携带值的终止帧。
    pub fn empty() -> Self {
        Self::Result {
            progress: false,
            args: Vec::new(),
        }
    }

    /// 携带单个值的终止帧。
    pub fn value(value: Value) -> Self {
        Self::Result {
            progress: false,
            args: vec![value],
        }
    }

    /// 携带单个流元素的进度帧。
    pub fn progress(item: Value) -> Self {
        Self::Result {
            progress: true,
            args: vec![item],
        }
    }

    /// 以稳定错误码与公开文案构造错误帧。
    pub fn failure(err: &ServiceError) -> Self {
        Self::Error {
            error: err.code().to_owned(),
            message: err.public_message().into_owned(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Result { progress: true, .. })
    }
}
