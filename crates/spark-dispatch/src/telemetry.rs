//! 进程级日志安装。
//!
//! # 教案式说明
//! - **意图 (Why)**：库代码只经由 `tracing` 门面发事件，由宿主在启动时安装一次
//!   `fmt` 输出与 `EnvFilter` 过滤；
//! - **契约 (What)**：
//!   - 过滤表达式优先取环境变量 [`FILTER_ENV`]，缺失或非法时回退到调用方给定的表达式；
//!   - 同一进程重复安装返回 [`TelemetryError::AlreadyInstalled`]；
//!   - 外部已设置全局 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]，不覆盖。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 覆盖日志过滤表达式的环境变量。
pub const FILTER_ENV: &str = "SPARK_LOG";

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装阶段可能出现的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry 已完成安装，禁止重复调用 install")]
    AlreadyInstalled,
    #[error("全局 tracing Subscriber 已存在，telemetry 无法覆盖")]
    SubscriberAlreadySet,
    #[error("日志过滤表达式非法: {0}")]
    InvalidFilter(#[from] ParseError),
    #[error("设置 tracing 全局 Subscriber 失败: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `registry + EnvFilter + fmt` 组合的全局 Subscriber。
pub fn install(default_filter: &str) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(default_filter)?)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter(default_filter: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_env(FILTER_ENV) {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter),
    }
}
