//! HTTP 命令中间件与元数据端点：状态码、参数装配、版本协商与错误脱敏。

mod support;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use http_body_util::BodyExt;
use serde_json::Value;
use spark_contract::{NativeValue, ServiceProvider, ServiceScope};
use spark_dispatch::http::with_dispatch;
use spark_dispatch::{DispatchState, HttpSettings, UrlBuilder};
use support::UserStore;
use tower::ServiceExt;
use tracing_test::traced_test;

fn app(store: Arc<UserStore>) -> Router {
    let (provider, _released) = support::provider(store);
    let state = DispatchState::new(support::collection(), provider, HttpSettings::default());
    let router = Router::new().route("/health", get(|| async { "ok" }));
    with_dispatch(router, state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("响应体应可读取")
        .to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("请求应可构造")
}

fn versioned_get(uri: &str, version: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("ServiceVersion", version)
        .body(Body::empty())
        .expect("请求应可构造")
}

fn post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_owned()))
        .expect("请求应可构造")
}

/// ## 测试一：查询命令以 JSON 返回结果
///
/// - 意图：验证 `GET /{service}/{command}` 的主路径，服务名与命令名大小写不敏感；
/// - 契约：200，响应体为按契约序列化的实体数组，属性名为 camelCase。
#[tokio::test]
async fn query_command_returns_json() {
    let app = app(support::seeded_store());
    let (status, body) = send(&app, versioned_get("/UserService/GetUsers", "2")).await;
    assert_eq!(status, StatusCode::OK, "响应体: {body}");

    let users: Value = serde_json::from_str(&body).expect("响应体应为 JSON");
    let users = users.as_array().expect("GetUsers 返回数组");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["email"], "ada@example.com");
    assert_eq!(users[1]["name"], "Grace");
}

/// ## 测试二：缺少必填参数时处理器不会被调用
///
/// - 意图：参数装配失败必须在进入处理器之前终止请求；
/// - 逻辑：空 JSON 对象与空白请求体都视为 `{}`；
/// - 契约：400，文案点名缺失的参数，存储保持为空。
#[tokio::test]
async fn missing_arguments_never_reach_the_handler() {
    let store = Arc::new(UserStore::default());
    let app = app(Arc::clone(&store));

    let (status, body) = send(&app, post("/userservice/adduser", "application/json", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing required property email");

    let (status, body) = send(
        &app,
        post("/userservice/adduser", "application/json; charset=utf-8", "  "),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing required property email");
    assert_eq!(store.len(), 0, "失败的调用不得产生副作用");

    let (status, body) = send(&app, post("/userservice/adduser", "application/json", "[1]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Request body must be a JSON object");
}

/// ## 测试三：JSON 与表单两种 POST 体
///
/// - 意图：表单编码与查询串共享解析器，可选参数缺省时取声明的默认值；
/// - 契约：无返回值的命令返回空的 200。
#[tokio::test]
async fn post_bodies_invoke_commands() {
    let store = Arc::new(UserStore::default());
    let app = app(Arc::clone(&store));

    let (status, body) = send(
        &app,
        post(
            "/userservice/adduser",
            "application/json",
            r#"{"email":"ada@example.com","name":"Ada"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty(), "无返回值的命令响应体应为空");

    let (status, _) = send(
        &app,
        post(
            "/userservice/adduser",
            "application/x-www-form-urlencoded",
            "email=grace%40example.com",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let users = store.list();
    assert_eq!(users.len(), 2);
    assert_eq!(users[1].email, "grace@example.com");
    assert_eq!(users[1].name, "", "缺省的 name 应取默认值空串");

    let (status, body) = send(
        &app,
        post(
            "/userservice/adduser",
            "application/json",
            r#"{"email":"ADA@example.com"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "处理器指定的状态码应原样透传");
    assert_eq!(body, "User already exists: ADA@example.com");
}

/// ## 测试四：方法、内容类型与命令形态的拒绝路径
#[tokio::test]
async fn rejections_carry_precise_statuses() {
    let app = app(support::seeded_store());

    let (status, body) = send(&app, get_request("/userservice/adduser?email=x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "GET only allowed on [Query]-methods.");

    let put = Request::builder()
        .method("PUT")
        .uri("/userservice/adduser")
        .body(Body::empty())
        .expect("请求应可构造");
    let (status, body) = send(&app, put).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "Method Not Allowed");

    let (status, body) = send(&app, post("/userservice/adduser", "text/plain", "email=x")).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        body,
        "Allowed Content-Types: application/x-www-form-urlencoded, application/json"
    );

    let (status, body) = send(&app, post("/userservice/countdown", "application/json", "{}")).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "流式命令不经由 HTTP 提供");
    assert_eq!(body, "Not implemented for HTTP");

    let (status, body) = send(&app, get_request("/userservice/nosuchcommand")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Not Found");
}

/// ## 测试五：与契约无关的请求交给宿主路由
///
/// - 意图：中间件只认领契约中出现过的服务，其余路径原样下传；
/// - 契约：单段路径、未知服务都由宿主路由处理。
#[tokio::test]
async fn unrelated_requests_pass_through() {
    let app = app(support::seeded_store());

    let (status, body) = send(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, body) = send(&app, get_request("/static/app.js")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "未知服务应落到宿主的 404");
    assert!(body.is_empty(), "宿主的 404 不应携带中间件文案: {body}");
}

/// ## 测试六：版本请求头
///
/// - 意图：客户端以 `ServiceVersion` 头钉住版本，越界或无法解析都应明确拒绝；
/// - 契约：v1 中不存在的 `SetGender` 返回 404，v2 中存在；
///   版本越界时只有服务名在某个版本出现才返回 400。
#[tokio::test]
async fn version_header_selects_the_contract() {
    let app = app(support::seeded_store());

    let (status, body) = send(&app, versioned_get("/userservice/getusers", "3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Version 3 not yet supported. Maximum version: 2");

    let (status, body) = send(&app, versioned_get("/userservice/getusers", "0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Version 0 not supported anymore. Minimum version: 1");

    let (status, body) = send(&app, versioned_get("/userservice/getusers", "latest")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid ServiceVersion header: latest");

    let (status, _) = send(&app, versioned_get("/static/app.js", "3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "未知服务即使版本越界也应下传");

    let set_gender = |version: &str| {
        Request::builder()
            .method("POST")
            .uri("/userservice/setgender")
            .header("ServiceVersion", version)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"gender":2}"#))
            .expect("请求应可构造")
    };
    let (status, _) = send(&app, set_gender("1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "v1 中 SetGender 不存在");
    let (status, body) = send(&app, set_gender("2")).await;
    assert_eq!(status, StatusCode::OK, "响应体: {body}");
}

/// ## 测试七：元数据端点
///
/// - 意图：客户端据此生成代理，必须与请求的版本一致；
/// - 契约：路径大小写不敏感，缺省返回最新版本；非 `GET` 请求下传。
#[tokio::test]
async fn metadata_endpoint_serves_the_requested_version() {
    let app = app(support::seeded_store());

    let (status, body) = send(&app, versioned_get("/METADATA", "1")).await;
    assert_eq!(status, StatusCode::OK);
    let document: Value = serde_json::from_str(&body).expect("元数据应为 JSON");
    assert_eq!(document["curVersion"], 1);

    let (status, body) = send(&app, get_request("/metadata")).await;
    assert_eq!(status, StatusCode::OK);
    let document: Value = serde_json::from_str(&body).expect("元数据应为 JSON");
    assert_eq!(document["curVersion"], 2);

    let (status, _) = send(&app, post("/metadata", "application/json", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "POST /metadata 应交给宿主路由");
}

/// ## 测试八：URL 构建器与查询解析器严格对应
///
/// - 意图：客户端拼出的查询串必须被服务端原样还原，包括 `&` 与空格；
/// - 契约：枚举以整数传递，文本形式的枚举返回 400。
#[tokio::test]
async fn url_builder_round_trips_through_the_middleware() {
    let app = app(support::seeded_store());

    let base = url::Url::parse("http://localhost/").expect("基地址合法");
    let mut builder = UrlBuilder::new(base, "/userservice/echo");
    builder
        .push("text", "a&b c")
        .and_then(|b| b.push("count", 5))
        .and_then(|b| b.push_native("gender", &NativeValue::Enum(2)))
        .expect("原始值都应可格式化");
    let uri = format!("/userservice/echo{}", builder.query());

    let (status, body) = send(&app, get_request(&uri)).await;
    assert_eq!(status, StatusCode::OK, "响应体: {body}");
    assert_eq!(body, r#""a&b c|5|2""#);

    let (status, body) = send(&app, get_request("/userservice/echo?text=x&count=1&gender=Female")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        "Enum-arguments should be represented by their numeric value: gender"
    );

    let (status, body) = send(&app, get_request("/userservice/echo?text=x&count=many&gender=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "非法原始值应返回 400: {body}");

    let (status, body) = send(&app, get_request("/userservice/echo")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing required properties text, count, gender");
}

/// ## 测试九：平台参数携带请求上下文
///
/// - 意图：处理器可以读取原始请求的租户信息；
/// - 契约：非本机主机名中的 `.` 替换为 `_`；本机访问取 `userdomain` 查询参数。
#[tokio::test]
async fn transport_parameter_exposes_the_request() {
    let app = app(support::seeded_store());

    let remote = Request::builder()
        .method("GET")
        .uri("/userservice/whoami")
        .header(header::HOST, "acme.example.com:8080")
        .body(Body::empty())
        .expect("请求应可构造");
    let (status, body) = send(&app, remote).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#""acme_example_com|acme_example_com""#);

    let local = Request::builder()
        .method("GET")
        .uri("/userservice/whoami?UserDomain=tenant-7")
        .header(header::HOST, "localhost:8080")
        .body(Body::empty())
        .expect("请求应可构造");
    let (status, body) = send(&app, local).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#""tenant-7|tenant-7""#);
}

/// ## 测试十：内部错误对外脱敏、对内留痕
///
/// - 意图：调用方只能看到通用文案，细节必须进入服务端日志；
/// - 逻辑：处理器返回 `Unexpected` 与处理器 panic 两条路径；
/// - 契约：均为 500 与 `Unexpected server error`。
#[tokio::test]
#[traced_test]
async fn unexpected_failures_are_masked_and_logged() {
    let app = app(support::seeded_store());

    let (status, body) = send(&app, get_request("/userservice/fail")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Unexpected server error");
    assert!(!body.contains("db exploded"), "内部细节不得外泄");
    assert!(logs_contain("db exploded"), "内部细节应进入日志");

    let (status, body) = send(&app, get_request("/userservice/explode")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Unexpected server error");
    assert!(logs_contain("panicked"));
}

/// 创建作用域即 panic 的提供者，用于覆盖处理器之外的 panic 路径。
struct FaultyProvider;

impl ServiceProvider for FaultyProvider {
    fn create_scope(&self) -> Arc<dyn ServiceScope> {
        panic!("scope factory exploded")
    }
}

/// ## 测试十一：处理器之外的 panic 同样被拦截
///
/// - 意图：参数装配与作用域创建发生在处理器之前，其中的 panic 也不能击穿中间件；
/// - 逻辑：提供者在创建作用域时 panic，随后同一路由继续处理健康检查；
/// - 契约：命令返回 500 与通用文案，日志记录 panic，后续请求不受影响。
#[tokio::test]
#[traced_test]
async fn panics_before_the_handler_are_contained() {
    let provider: Arc<dyn ServiceProvider> = Arc::new(FaultyProvider);
    let state = DispatchState::new(support::collection(), provider, HttpSettings::default());
    let router = Router::new().route("/health", get(|| async { "ok" }));
    let app = with_dispatch(router, state);

    let (status, body) = send(&app, versioned_get("/userservice/getusers", "1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Unexpected server error");
    assert!(logs_contain("command userservice/getusers panicked"));

    let (status, body) = send(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}
