//! `GET|POST /{service}/{command}`：无状态命令调用。
//!
//! # 教案式说明
//! - **意图 (Why)**：让浏览器与脚本无需 RPC 客户端即可调用契约命令；
//! - **契约 (What)**：
//!   - 路径不足两段、版本中不存在该服务时交给下游；命令不存在返回 404；
//!   - 流式命令返回 501；`GET` 只允许查询命令，否则 400；
//!   - `POST` 接受表单编码（与查询串同样的解析）或 JSON 对象，空白 JSON 体视为 `{}`，
//!     其余内容类型返回 415；其余方法返回 405；
//!   - 产出值时返回 200 与 JSON 体，无返回值时返回空的 200；
//!   - 处理过程中任何 panic 均折算为 500，不影响服务任务。
//! - **风险 (Trade-offs)**：版本越界时只有服务名在任一版本中出现才返回 400，
//!   否则视为与本中间件无关的请求交给下游。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::{Map, Value};
use spark_contract::{
    Arguments, CancellationToken, Command, Invocation, Metadata, Parameter, Serializer,
    ServiceContext, ServiceError,
};
use tracing::{Instrument, Span, debug, field, info_span};

use super::{DispatchState, HttpCallContext, error_response, query, user_domain};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// 命令中间件。
pub async fn command_endpoint(
    State(state): State<DispatchState>,
    request: Request,
    next: Next,
) -> Response {
    let Some((service, command)) = split_path(request.uri().path()) else {
        return next.run(request).await;
    };
    let metadata = match state.metadata_for(request.headers()) {
        Ok(metadata) if metadata.services.contains(&service) => metadata,
        Ok(_) => return next.run(request).await,
        Err(err) if state.knows_service(&service) => return error_response(&err),
        Err(_) => return next.run(request).await,
    };

    let span = info_span!(
        "http.command",
        service = %service,
        command = %command,
        version = metadata.cur_version,
        procedure = field::Empty,
    );
    async move {
        // 参数装配、作用域创建、处理器与结果序列化共用一道 panic 防线。
        let outcome = AssertUnwindSafe(invoke(&state, metadata, &service, &command, request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::unexpected(format!(
                    "command {service}/{command} panicked"
                )))
            });
        match outcome {
            Ok(response) => response,
            Err(err) => error_response(&err),
        }
    }
    .instrument(span)
    .await
}

/// 取路径的前两段作为服务名与命令名。
fn split_path(path: &str) -> Option<(String, String)> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let service = segments.next()?;
    let command = segments.next()?;
    Some((service.to_owned(), command.to_owned()))
}

async fn invoke(
    state: &DispatchState,
    metadata: Arc<Metadata>,
    service: &str,
    command: &str,
    request: Request,
) -> Result<Response, ServiceError> {
    let command = metadata
        .find_command(service, command)
        .ok_or_else(|| ServiceError::service(StatusCode::NOT_FOUND, "Not Found"))?;
    Span::current().record("procedure", command.fullname.as_str());
    if command.return_type.is_observable {
        return Err(ServiceError::service(
            StatusCode::NOT_IMPLEMENTED,
            "Not implemented for HTTP",
        ));
    }

    let (parts, body) = request.into_parts();
    let call_context = Arc::new(HttpCallContext {
        method: parts.method.clone(),
        uri: parts.uri.clone(),
        headers: parts.headers.clone(),
        user_domain: user_domain(&parts.headers, &parts.uri),
        version: metadata.cur_version,
    });
    let cancellation = CancellationToken::new();
    let args = read_arguments(state, &metadata, command, &parts, body, &call_context, &cancellation)
        .await?;

    let handler = command.handler.as_ref().ok_or_else(|| {
        ServiceError::unexpected(format!("command {} has no handler", command.fullname))
    })?;
    let invocation = Invocation {
        context: ServiceContext::new(Arc::clone(&metadata), call_context.user_domain.clone()),
        service: command.service_native.clone(),
        scope: state.provider().create_scope(),
        args,
        cancellation,
    };
    debug!(strategy = ?handler.strategy(), "invoking handler");
    let outcome = handler.invoke_unary(invocation).await?;

    match outcome {
        Some(value) if !command.return_type.is_void() => {
            let token = Serializer::new(&metadata).serialize(&value, &command.return_type)?;
            let body = serde_json::to_vec(&token)?;
            Ok((
                [(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                body,
            )
                .into_response())
        }
        _ => Ok(StatusCode::OK.into_response()),
    }
}

async fn read_arguments(
    state: &DispatchState,
    metadata: &Metadata,
    command: &Command,
    parts: &Parts,
    body: Body,
    call_context: &Arc<HttpCallContext>,
    cancellation: &CancellationToken,
) -> Result<Arguments, ServiceError> {
    let platform = |parameter: &Parameter| -> Result<Arc<dyn Any + Send + Sync>, ServiceError> {
        if parameter.type_info.is_transport {
            Ok(Arc::clone(call_context) as Arc<dyn Any + Send + Sync>)
        } else {
            Err(ServiceError::service(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Unsupported platform specific parameter: {}",
                    parameter.type_info.name
                ),
            ))
        }
    };

    if parts.method == Method::GET {
        if !command.is_query {
            return Err(ServiceError::service(
                StatusCode::BAD_REQUEST,
                "GET only allowed on [Query]-methods.",
            ));
        }
        let pairs = query::parse_pairs(parts.uri.query().unwrap_or_default());
        return query::arguments_from_pairs(
            metadata,
            &pairs,
            &command.parameters,
            cancellation,
            platform,
        );
    }
    if parts.method != Method::POST {
        return Err(ServiceError::service(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        ));
    }

    let media_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if media_type != FORM_CONTENT_TYPE && media_type != JSON_CONTENT_TYPE {
        return Err(ServiceError::service(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Allowed Content-Types: application/x-www-form-urlencoded, application/json",
        ));
    }
    let bytes = to_bytes(body, state.settings().max_body_bytes)
        .await
        .map_err(|_| ServiceError::service(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"))?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| ServiceError::serialization("Request body is not valid UTF-8"))?;

    if media_type == FORM_CONTENT_TYPE {
        let pairs = query::parse_pairs(text);
        return query::arguments_from_pairs(
            metadata,
            &pairs,
            &command.parameters,
            cancellation,
            platform,
        );
    }
    let object = if text.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(object) => object,
            _ => {
                return Err(ServiceError::serialization(
                    "Request body must be a JSON object",
                ));
            }
        }
    };
    Serializer::new(metadata).deserialize_object_arguments(
        &object,
        &command.parameters,
        Some(cancellation),
        platform,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_need_two_segments() {
        assert_eq!(split_path("/"), None);
        assert_eq!(split_path("/userservice"), None);
        assert_eq!(
            split_path("/userservice/getusers/extra"),
            Some(("userservice".to_owned(), "getusers".to_owned()))
        );
        assert_eq!(
            split_path("//a//b"),
            Some(("a".to_owned(), "b".to_owned()))
        );
    }
}
