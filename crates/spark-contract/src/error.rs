//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 契约引擎只有一个错误域：版本越界、契约构建失败、载荷编解码失败、处理器显式失败
//!   以及其余一切未预期异常；
//! - 两个传输前端均在边界处把 [`ServiceError`] 转换为线上失败表示，因此错误需要自带
//!   稳定错误码、HTTP 状态与对调用方可见的文案。
//!
//! ## 设计要求（What）
//! - 错误码遵循 `<domain>.<semantic>` 命名，例如 `contract.serialization`；
//! - `Unexpected` 的细节只写日志，不进入对外文案。

use std::borrow::Cow;
use std::fmt::Display;

use http::StatusCode;
use thiserror::Error;

/// 契约引擎统一的结果别名。
pub type Result<T, E = ServiceError> = core::result::Result<T, E>;

/// 对调用方隐藏内部细节时使用的统一文案。
pub const UNEXPECTED_MESSAGE: &str = "Unexpected server error";

/// 契约引擎错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把四类失败语义收敛在同一枚举中，传输前端只需一次 `match` 即可完成
///   状态码映射与日志分级。
/// - **契约 (What)**：
///   - `Versioning` / `Serialization` 对应 400；
///   - `Build` 属于启动期致命错误，若在请求路径出现则按 500 处理；
///   - `Service` 携带处理器指定的状态码与公开文案，原样透传；
///   - `Unexpected` 一律映射为 500 与 [`UNEXPECTED_MESSAGE`]。
/// - **设计权衡 (Trade-offs)**：消息以 `String` 保存，换取构造处的可读性。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// 请求的版本不在 `[min, max]` 之内。
    #[error("{message}")]
    Versioning { message: String },

    /// 构建元数据时引用了外部模块或当前版本不可见的类型。
    #[error("{message}")]
    Build { message: String },

    /// 载荷格式错误、枚举值未知、缺少必填属性或类型未知。
    #[error("{message}")]
    Serialization { message: String },

    /// 处理器主动抛出的失败，状态码与文案均由处理器决定。
    #[error("{message}")]
    Service { status: StatusCode, message: String },

    /// 无法归类的内部异常。
    ///
    /// - **契约 (What)**：`detail` 仅用于服务端日志；
    /// - **风险 (Trade-offs)**：过度使用会降低客户端可诊断性，应优先选择更具体的变体。
    #[error("unexpected failure: {detail}")]
    Unexpected { detail: String },
}

impl ServiceError {
    /// 构造版本越界错误。
    pub fn versioning(message: impl Into<String>) -> Self {
        Self::Versioning {
            message: message.into(),
        }
    }

    /// 构造契约构建错误。
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// 构造编解码错误。
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// 构造携带显式状态码的处理器错误。
    pub fn service(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    /// 把任意可显示的底层错误包装为 `Unexpected`。
    pub fn unexpected(detail: impl Display) -> Self {
        Self::Unexpected {
            detail: detail.to_string(),
        }
    }

    /// 返回稳定错误码，供日志与 RPC 错误帧使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Versioning { .. } => "contract.versioning",
            Self::Build { .. } => "contract.build",
            Self::Serialization { .. } => "contract.serialization",
            Self::Service { .. } => "contract.service",
            Self::Unexpected { .. } => "contract.unexpected",
        }
    }

    /// 映射为 HTTP 状态码。
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Versioning { .. } | Self::Serialization { .. } => StatusCode::BAD_REQUEST,
            Self::Service { status, .. } => *status,
            Self::Build { .. } | Self::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回可以安全暴露给调用方的文案。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：`Unexpected` 与 `Build` 只返回 [`UNEXPECTED_MESSAGE`]，
    ///   其余变体返回各自携带的消息。
    pub fn public_message(&self) -> Cow<'_, str> {
        match self {
            Self::Versioning { message }
            | Self::Serialization { message }
            | Self::Service { message, .. } => Cow::Borrowed(message.as_str()),
            Self::Build { .. } | Self::Unexpected { .. } => Cow::Borrowed(UNEXPECTED_MESSAGE),
        }
    }

    /// 是否属于需要以 `error!` 级别记录的内部故障。
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Build { .. } | Self::Unexpected { .. })
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
