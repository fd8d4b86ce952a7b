//! 调度层测试夹具：精简的身份域契约与可观测的作用域探针。
//!
//! # 教案式说明
//! - **意图 (Why)**：HTTP、RPC 与 TCP 三组测试共享同一份契约，覆盖五种响应策略、
//!   取消参数、平台参数、枚举参数与处理器失败；
//! - **契约 (What)**：版本区间 `[1, 2]`，`SetGender` 在 v2 加入；
//!   `ProbeService` 以作用域实例注册，实例释放时累加计数器。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::Stream;
use futures::stream::{self, StreamExt};
use http::StatusCode;
use parking_lot::Mutex;
use spark_contract::{
    CommandDecl, ContractDeclarations, ContractSettings, ContractValue, EntityDecl, EntityValue,
    EnumDecl, Invocation, MetadataCollection, NativeValue, ParamDecl, PrimitiveType, PropertyDecl,
    Result, ScopedServiceProvider, ServiceDecl, ServiceError, ServiceProvider, TypeDecl,
};
use spark_dispatch::HttpCallContext;

pub const MODULE: &str = "identity";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub email: String,
    pub name: String,
    pub active: bool,
}

impl User {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.to_owned(),
            name: name.to_owned(),
            active: true,
        }
    }
}

impl ContractValue for User {
    fn into_native(self) -> NativeValue {
        EntityValue::new("User")
            .with("Email", self.email)
            .with("Name", self.name)
            .with("Active", self.active)
            .into_native()
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        let mut entity = EntityValue::from_native(value)?;
        Ok(Self {
            email: entity.take_or_default("Email")?,
            name: entity.take_or_default("Name")?,
            active: entity.take_or_default("Active")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: Mutex<Vec<User>>,
}

impl UserStore {
    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }

    pub fn list(&self) -> Vec<User> {
        self.users.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    fn find(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn add(&self, user: User) -> Result<()> {
        let mut users = self.users.lock();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(ServiceError::service(
                StatusCode::CONFLICT,
                format!("User already exists: {}", user.email),
            ));
        }
        users.push(user);
        Ok(())
    }
}

#[derive(Debug)]
pub struct UserServiceImpl {
    pub store: Arc<UserStore>,
}

/// 作用域探针：实例释放时累加 `released`。
#[derive(Debug)]
pub struct Probe {
    released: Arc<AtomicUsize>,
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

async fn get_users(invocation: Invocation) -> Result<Vec<User>> {
    Ok(invocation.instance::<UserServiceImpl>()?.store.list())
}

fn add_user(invocation: Invocation) -> Result<()> {
    let service = invocation.instance::<UserServiceImpl>()?;
    let email: String = invocation.arg("email")?;
    let name: String = invocation.arg("name")?;
    service.store.add(User::new(&email, &name))
}

fn get_user(invocation: Invocation) -> Result<Option<User>> {
    let service = invocation.instance::<UserServiceImpl>()?;
    let email: String = invocation.arg("email")?;
    Ok(service.store.find(&email))
}

fn count_down(invocation: Invocation) -> Result<impl Stream<Item = Result<i32>> + Send + 'static> {
    let from: i32 = invocation.arg("from")?;
    Ok(stream::iter((1..=from).rev().map(Ok)))
}

/// 每 10 毫秒产出一个递增整数，永不结束。
fn ticker(_invocation: Invocation) -> Result<impl Stream<Item = Result<i32>> + Send + 'static> {
    Ok(stream::unfold(0, |n| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok(n), n + 1))
    }))
}

fn whoami(invocation: Invocation) -> Result<String> {
    let context = invocation
        .args
        .platform::<HttpCallContext>()
        .ok_or_else(|| ServiceError::unexpected("missing http context"))?;
    Ok(format!("{}|{}", context.user_domain, invocation.context.user_domain))
}

fn echo(invocation: Invocation) -> Result<String> {
    let text: String = invocation.arg("text")?;
    let count: i32 = invocation.arg("count")?;
    let gender: i32 = invocation.arg("gender")?;
    Ok(format!("{text}|{count}|{gender}"))
}

fn fail(_invocation: Invocation) -> Result<String> {
    Err(ServiceError::unexpected("db exploded"))
}

fn explode(_invocation: Invocation) -> Result<String> {
    panic!("handler bug")
}

fn set_gender(invocation: Invocation) -> Result<()> {
    let _gender: NativeValue = invocation.arg("gender")?;
    Ok(())
}

fn touch(invocation: Invocation) -> Result<i32> {
    let _probe = invocation.instance::<Probe>()?;
    Ok(1)
}

fn probe_ticks(invocation: Invocation) -> Result<impl Stream<Item = Result<i32>> + Send + 'static> {
    let probe = invocation.instance::<Probe>()?;
    Ok(ticker(invocation)?.map(move |item| {
        let _held = &probe;
        item
    }))
}

pub fn declarations() -> ContractDeclarations {
    ContractDeclarations::new()
        .enumeration(
            EnumDecl::new("Gender", MODULE)
                .member("Unknown", 0)
                .member("Male", 1)
                .member("Female", 2),
        )
        .entity(
            EntityDecl::new("User", MODULE)
                .property(PropertyDecl::new("Email", TypeDecl::string()).required().key())
                .property(PropertyDecl::new("Name", TypeDecl::string()).optional())
                .property(PropertyDecl::new("Active", TypeDecl::boolean())),
        )
        .service(
            ServiceDecl::new("IUserService", MODULE)
                .command(
                    CommandDecl::future(
                        "GetUsersAsync",
                        TypeDecl::array(TypeDecl::entity("User")),
                        get_users,
                    )
                    .query(),
                )
                .command(
                    CommandDecl::sync_void("AddUser", add_user)
                        .param(ParamDecl::new("email", TypeDecl::string()))
                        .param(ParamDecl::new("name", TypeDecl::string()).with_default("")),
                )
                .command(
                    CommandDecl::sync(
                        "GetUser",
                        TypeDecl::nullable(TypeDecl::entity("User")),
                        get_user,
                    )
                    .query()
                    .param(ParamDecl::new("email", TypeDecl::string())),
                )
                .command(
                    CommandDecl::stream("CountDown", TypeDecl::int32(), count_down)
                        .param(ParamDecl::new("from", TypeDecl::int32()))
                        .param(ParamDecl::new("token", TypeDecl::Cancellation)),
                )
                .command(
                    CommandDecl::stream("Ticker", TypeDecl::int32(), ticker)
                        .param(ParamDecl::new("token", TypeDecl::Cancellation)),
                )
                .command(
                    CommandDecl::sync("Whoami", TypeDecl::string(), whoami)
                        .query()
                        .param(ParamDecl::new("context", TypeDecl::Transport)),
                )
                .command(
                    CommandDecl::sync("Echo", TypeDecl::string(), echo)
                        .query()
                        .param(ParamDecl::new("text", TypeDecl::string()))
                        .param(ParamDecl::new("count", TypeDecl::int32()))
                        .param(
                            ParamDecl::new(
                                "when",
                                TypeDecl::nullable(TypeDecl::primitive(PrimitiveType::DateTime)),
                            )
                            .with_default(NativeValue::Null),
                        )
                        .param(ParamDecl::new("gender", TypeDecl::enumeration("Gender"))),
                )
                .command(CommandDecl::sync("Fail", TypeDecl::string(), fail).query())
                .command(CommandDecl::sync("Explode", TypeDecl::string(), explode).query())
                .command(
                    CommandDecl::sync_void("SetGender", set_gender)
                        .added(2)
                        .param(ParamDecl::new("gender", TypeDecl::enumeration("Gender"))),
                ),
        )
        .service(
            ServiceDecl::new("IProbeService", MODULE)
                .command(CommandDecl::sync("Touch", TypeDecl::int32(), touch).query())
                .command(
                    CommandDecl::stream("Ticks", TypeDecl::int32(), probe_ticks)
                        .param(ParamDecl::new("token", TypeDecl::Cancellation)),
                ),
        )
}

pub fn settings() -> ContractSettings {
    ContractSettings::new("identity", 1, 2)
}

pub fn collection() -> Arc<MetadataCollection> {
    Arc::new(MetadataCollection::new(declarations(), settings()).expect("夹具契约应可构建"))
}

/// 服务提供者与探针释放计数器。
pub fn provider(store: Arc<UserStore>) -> (Arc<dyn ServiceProvider>, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let provider = ScopedServiceProvider::new()
        .singleton("IUserService", Arc::new(UserServiceImpl { store }))
        .scoped("IProbeService", move || Probe {
            released: Arc::clone(&counter),
        });
    (Arc::new(provider), released)
}

pub fn seeded_store() -> Arc<UserStore> {
    Arc::new(UserStore::with_users(vec![
        User::new("ada@example.com", "Ada"),
        User::new("grace@example.com", "Grace"),
    ]))
}
