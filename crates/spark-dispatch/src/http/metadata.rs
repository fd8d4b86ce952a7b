//! `GET /metadata`：按请求版本返回线上元数据文档。

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{DispatchState, error_response};

/// 元数据端点中间件。
///
/// # 教案式说明
/// - **契约 (What)**：仅拦截路径与配置完全相同（大小写不敏感）的 `GET` 请求；
///   版本越界返回 400 并说明合法边界；其余请求原样交给下游。
pub async fn metadata_endpoint(
    State(state): State<DispatchState>,
    request: Request,
    next: Next,
) -> Response {
    let is_metadata = request.method() == Method::GET
        && request
            .uri()
            .path()
            .eq_ignore_ascii_case(&state.settings().metadata_path);
    if !is_metadata {
        return next.run(request).await;
    }

    let document = state
        .metadata_for(request.headers())
        .and_then(|metadata| {
            debug!(version = metadata.cur_version, "serving metadata document");
            metadata.to_json()
        });
    match document {
        Ok(json) => (
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            json,
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}
