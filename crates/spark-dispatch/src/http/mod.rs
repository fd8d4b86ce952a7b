//! # http 模块说明
//!
//! ## 角色定位（Why）
//! - 无状态前端：一次请求对应一次命令调用，不保留任何调用状态；
//! - 以两个 axum 中间件的形式挂在宿主路由之前，未命中的请求原样交给下游，
//!   宿主可以在同一端口继续提供自己的路由。
//!
//! ## 设计要求（What）
//! - [`metadata::metadata_endpoint`]：`GET {metadata_path}` 返回所请求版本的元数据文档；
//! - [`command::command_endpoint`]：`GET|POST /{service}/{command}` 调用命令；
//! - 所有失败都在此处转换为“状态码 + 纯文本公开文案”，内部故障只写日志。

pub mod command;
pub mod metadata;
pub mod query;
pub mod url_builder;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, Method, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use spark_contract::{Metadata, MetadataCollection, ServiceError, ServiceProvider, UserDomain};
use tracing::{error, warn};

use crate::config::HttpSettings;

pub use self::command::command_endpoint;
pub use self::metadata::metadata_endpoint;
pub use self::url_builder::UrlBuilder;

/// 两个中间件共享的只读状态。
///
/// # 教案式说明
/// - **契约 (What)**：克隆只增加引用计数；元数据集合与服务提供者在全部请求间共享；
/// - **逻辑 (How)**：版本号取自配置的请求头，缺省为契约上限。
#[derive(Clone)]
pub struct DispatchState {
    inner: Arc<StateInner>,
}

struct StateInner {
    collection: Arc<MetadataCollection>,
    provider: Arc<dyn ServiceProvider>,
    settings: HttpSettings,
}

impl DispatchState {
    pub fn new(
        collection: Arc<MetadataCollection>,
        provider: Arc<dyn ServiceProvider>,
        settings: HttpSettings,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                collection,
                provider,
                settings,
            }),
        }
    }

    pub fn collection(&self) -> &MetadataCollection {
        &self.inner.collection
    }

    pub fn provider(&self) -> &dyn ServiceProvider {
        self.inner.provider.as_ref()
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.inner.settings
    }

    /// 从请求头读取版本号；缺省时取契约上限。
    pub fn requested_version(&self, headers: &HeaderMap) -> Result<u32, ServiceError> {
        let header = self.inner.settings.version_header.as_str();
        let Some(raw) = headers.get(header) else {
            return Ok(self.inner.collection.max_version());
        };
        raw.to_str()
            .ok()
            .and_then(|text| text.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                ServiceError::versioning(format!(
                    "Invalid {header} header: {}",
                    String::from_utf8_lossy(raw.as_bytes())
                ))
            })
    }

    /// 取得请求所指版本的元数据，越界版本以 `Versioning` 错误报告。
    pub fn metadata_for(&self, headers: &HeaderMap) -> Result<Arc<Metadata>, ServiceError> {
        let version = self.requested_version(headers)?;
        self.inner.collection.get(version)
    }

    /// 服务名是否在任一受支持版本中出现。
    pub(crate) fn knows_service(&self, service: &str) -> bool {
        let collection = &self.inner.collection;
        collection
            .settings()
            .versions()
            .filter_map(|version| collection.get(version).ok())
            .any(|metadata| metadata.services.contains(service))
    }
}

/// 传给 `HttpContext` 平台参数的请求快照。
#[derive(Clone, Debug)]
pub struct HttpCallContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub user_domain: UserDomain,
    pub version: u32,
}

/// 把元数据端点与命令中间件挂到宿主路由之前。
///
/// 元数据端点位于最外层，命令中间件次之，二者都未命中时交给 `router` 自身的路由。
pub fn with_dispatch(router: Router, state: DispatchState) -> Router {
    router
        .layer(middleware::from_fn_with_state(state.clone(), command_endpoint))
        .layer(middleware::from_fn_with_state(state, metadata_endpoint))
}

/// 由请求主机与 `userdomain` 查询参数推导租户。
pub(crate) fn user_domain(headers: &HeaderMap, uri: &Uri) -> UserDomain {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or_default();
    let query_domain = uri.query().and_then(|raw| {
        query::parse_pairs(raw)
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("userdomain"))
            .and_then(|(_, value)| value)
    });
    UserDomain::from_host(host, query_domain.as_deref())
}

/// 把错误写成“状态码 + 公开文案”，并按错误性质分级记录。
pub(crate) fn error_response(err: &ServiceError) -> Response {
    let status = err.status();
    if err.is_internal() {
        error!(code = err.code(), status = status.as_u16(), error = %err, "command failed");
    } else {
        warn!(code = err.code(), status = status.as_u16(), error = %err, "command rejected");
    }
    (status, err.public_message().into_owned()).into_response()
}
