//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 宿主进程以一份 TOML 文档描述契约区间、HTTP 端点、RPC 端点与日志过滤；
//! - 配置在启动期一次性加载并校验，运行期只读。
//!
//! ## 设计要求（What）
//! - 除 `contract.prefix` 外的每个字段都有缺省值，最小配置只需给出前缀；
//! - 未知字段一律拒绝，防止拼写错误被静默忽略；
//! - 校验失败以 [`ConfigError::Invalid`] 报告，并指明出错的字段。

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_contract::ContractSettings;
use thiserror::Error;

use crate::retry::FibonacciBackoff;

/// 缺省的版本请求头。
pub const DEFAULT_VERSION_HEADER: &str = "ServiceVersion";
/// 缺省的元数据端点路径。
pub const DEFAULT_METADATA_PATH: &str = "/metadata";

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置失败: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("配置字段 {field} 非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 调度宿主的完整配置。
///
/// # 教案式说明
/// - **契约 (What)**：四个段落分别对应 `[contract]`、`[http]`、`[rpc]` 与 `[telemetry]`；
///   后三个段落可整体省略；
/// - **风险 (Trade-offs)**：`contract` 复用 `spark-contract` 的 [`ContractSettings`]，
///   字段名因此由契约层决定。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    pub contract: ContractSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub rpc: RpcSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// `[http]` 段落。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    pub bind: SocketAddr,
    /// 携带请求版本号的请求头名称。
    pub version_header: String,
    pub metadata_path: String,
    /// 单个请求体的上限，超出时返回 413。
    pub max_body_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            version_header: DEFAULT_VERSION_HEADER.to_owned(),
            metadata_path: DEFAULT_METADATA_PATH.to_owned(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// `[rpc]` 段落。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcSettings {
    pub bind: SocketAddr,
    /// 每次调用与每条连接的帧缓冲容量。
    pub channel_capacity: usize,
    pub retry_first_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// 重绑监听的次数上限，缺省不设上限。
    pub max_retries: Option<u32>,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8090)),
            channel_capacity: 64,
            retry_first_delay_ms: 100,
            retry_max_delay_ms: 10_000,
            max_retries: None,
        }
    }
}

impl RpcSettings {
    /// 依配置构造监听重绑使用的退避序列。
    pub fn backoff(&self) -> FibonacciBackoff {
        let backoff = FibonacciBackoff::new(
            Duration::from_millis(self.retry_first_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        );
        match self.max_retries {
            Some(max) => backoff.with_max_retries(max),
            None => backoff,
        }
    }
}

/// `[telemetry]` 段落。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySettings {
    /// `EnvFilter` 表达式；环境变量 `SPARK_LOG` 优先。
    pub filter: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

impl DispatchConfig {
    /// 以给定契约设置与其余缺省值构造配置。
    pub fn new(contract: ContractSettings) -> Self {
        Self {
            contract,
            http: HttpSettings::default(),
            rpc: RpcSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }

    /// 读取并校验配置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验跨字段约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let contract = &self.contract;
        if contract.prefix.trim().is_empty() {
            return Err(ConfigError::invalid("contract.prefix", "前缀不能为空"));
        }
        if contract.min_version == 0 {
            return Err(ConfigError::invalid("contract.min_version", "版本号从 1 开始"));
        }
        if contract.min_version > contract.max_version {
            return Err(ConfigError::invalid(
                "contract.min_version",
                format!(
                    "下限 {} 大于上限 {}",
                    contract.min_version, contract.max_version
                ),
            ));
        }
        if self.rpc.channel_capacity == 0 {
            return Err(ConfigError::invalid("rpc.channel_capacity", "容量必须大于 0"));
        }
        if self.http.version_header.trim().is_empty() {
            return Err(ConfigError::invalid("http.version_header", "请求头名称不能为空"));
        }
        if !self.http.metadata_path.starts_with('/') {
            return Err(ConfigError::invalid("http.metadata_path", "路径必须以 / 开头"));
        }
        if http::HeaderName::from_bytes(self.http.version_header.as_bytes()).is_err() {
            return Err(ConfigError::invalid(
                "http.version_header",
                format!("{} 不是合法的请求头名称", self.http.version_header),
            ));
        }
        Ok(())
    }
}
