//! `identity-host`：在同一进程内同时提供 HTTP 命令端点与流式 RPC 监听。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin identity-host -- crates/spark-identity-host/identity-host.toml
//! curl -H 'ServiceVersion: 1' http://127.0.0.1:8080/userservice/getusers
//! printf '{"type":"call","id":1,"procedure":"identity.v2.userservice.countdown","args":[3]}\n' \
//!     | nc 127.0.0.1 8090
//! ```
//!
//! # 设计要点（Why）
//! - 启动期一次性构建全部版本的元数据，任何契约错误在监听前暴露；
//! - RPC 监听失败时按斐波那契退避重绑，HTTP 监听失败直接退出；
//! - Ctrl-C 触发同一个关闭令牌，两个前端一起停止。

mod contract;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use spark_contract::{CancellationToken, MetadataCollection, ServiceProvider};
use spark_dispatch::http::with_dispatch;
use spark_dispatch::{DispatchConfig, DispatchState, RpcRegistry, tcp, telemetry};
use tokio::net::TcpListener;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "identity-host.toml";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("identity-host 启动失败: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = env::args()
        .skip(1)
        .find(|arg| arg.trim_start_matches('-') != "quick")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = DispatchConfig::load(&path)
        .with_context(|| format!("加载配置 {} 失败", path.display()))?;
    telemetry::install(&config.telemetry.filter).context("安装日志失败")?;

    let collection = Arc::new(
        MetadataCollection::new(contract::declarations(), config.contract.clone())
            .context("契约声明非法")?,
    );
    let provider: Arc<dyn ServiceProvider> = Arc::new(contract::provider());

    let registry = Arc::new(RpcRegistry::new(Arc::clone(&collection), Arc::clone(&provider)));
    registry.configure().context("构建 RPC 调用表失败")?;
    registry.run().context("启动 RPC 注册表失败")?;

    let shutdown = CancellationToken::new();
    let rpc = tokio::spawn(tcp::serve_with_retry(
        config.rpc.bind,
        Arc::clone(&registry),
        config.rpc.channel_capacity,
        config.rpc.backoff(),
        shutdown.clone(),
    ));

    let state = DispatchState::new(collection, provider, config.http.clone());
    let app = with_dispatch(Router::new(), state);
    let listener = TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("绑定 HTTP 地址 {} 失败", config.http.bind))?;
    info!(
        http = %config.http.bind,
        rpc = %config.rpc.bind,
        min_version = config.contract.min_version,
        max_version = config.contract.max_version,
        "identity host listening"
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => error!(error = %err, "ctrl-c handler unavailable, shutting down"),
        }
        signal.cancel();
    });

    let http_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await
        .context("HTTP 服务异常退出")?;

    shutdown.cancel();
    registry.stop();
    rpc.await
        .context("RPC 监听任务异常终止")?
        .context("RPC 监听失败")?;
    info!("identity host stopped");
    Ok(())
}
