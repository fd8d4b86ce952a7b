#![doc = r#"
# spark-dispatch

## 设计动机（Why）
- **定位**：把 `spark-contract` 产出的版本化元数据接到两种传输前端上：无状态的 HTTP
  命令中间件与支持进度帧和取消的流式 RPC 调用器。
- **架构角色**：两种前端共享命令解析、参数装配与错误映射，只在线上表示上分道扬镳；
  宿主进程（如 `spark-identity-host`）负责装配配置、日志与监听端口。

## 核心契约（What）
- [`http`]：`/metadata` 端点、`/{service}/{command}` 命令中间件与查询串构建器；
- [`rpc`]：按版本 × 服务 × 命令注册的调用表、响应策略与调用状态机；
- [`tcp`]：以换行分隔 JSON 承载 RPC 的 TCP 传输；
- [`config`]：TOML 配置文档与校验；
- [`telemetry`]：一次性安装 `tracing` 全局 Subscriber；
- [`retry`]：监听重绑使用的斐波那契退避。

## 实现策略（How）
- 任何处理器失败都在传输边界被捕获并转换为线上失败表示，绝不向上传播；
- 日志统一经由 `tracing`，本 crate 只有 [`telemetry::install`] 会安装 Subscriber。
"#]

pub mod config;
pub mod http;
pub mod retry;
pub mod rpc;
pub mod tcp;
pub mod telemetry;

pub use config::{ConfigError, DispatchConfig, HttpSettings, RpcSettings, TelemetrySettings};
pub use crate::http::{DispatchState, HttpCallContext, UrlBuilder};
pub use retry::FibonacciBackoff;
pub use rpc::{CallHandle, CallState, RegistryError, RpcFrame, RpcOperation, RpcRegistry};
pub use tcp::{ClientMessage, RpcServer, ServerMessage, TransportError};
pub use telemetry::TelemetryError;
