//! 身份域契约：进程内用户目录。
//!
//! # 教案式说明
//! - **意图 (Why)**：演示同一份声明如何同时驱动 HTTP 与 RPC 两个前端，以及
//!   版本注解如何让 v1 客户端在 v2 上线后继续工作；
//! - **契约 (What)**：
//!   - v1：`getUsers`、`getUser`、`addUser`、`whoami`、`countDown`；
//!   - v2：新增 `setGender`、`User.gender` 与只读的 `RoleService`，
//!     `User.displayName` 在 v2 之前名为 `name`。

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::Stream;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use spark_contract::{
    CommandDecl, ContractDeclarations, ContractValue, EntityDecl, EntityValue, EnumDecl,
    EnumValueDecl, Invocation, NativeValue, ParamDecl, PropertyDecl, Result, ScopedServiceProvider,
    ServiceDecl, ServiceError, TypeDecl,
};
use spark_dispatch::HttpCallContext;
use tracing::info;

const MODULE: &str = "identity";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub email: String,
    pub display_name: String,
    pub gender: i32,
}

impl ContractValue for User {
    fn into_native(self) -> NativeValue {
        EntityValue::new("User")
            .with("Email", self.email)
            .with("DisplayName", self.display_name)
            .with("Gender", NativeValue::Enum(self.gender))
            .into_native()
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        let mut entity = EntityValue::from_native(value)?;
        Ok(Self {
            email: entity.take_or_default("Email")?,
            display_name: entity.take_or_default("DisplayName")?,
            gender: entity.take_or_default("Gender")?,
        })
    }
}

/// 以邮箱为键的内存目录。
#[derive(Debug, Default)]
pub struct Directory {
    users: RwLock<Vec<User>>,
}

impl Directory {
    fn list(&self) -> Vec<User> {
        self.users.read().clone()
    }

    fn find(&self, email: &str) -> Option<User> {
        self.users
            .read()
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn add(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(ServiceError::service(
                StatusCode::CONFLICT,
                format!("User already exists: {}", user.email),
            ));
        }
        info!(email = %user.email, "user added");
        users.push(user);
        Ok(())
    }

    fn set_gender(&self, email: &str, gender: i32) -> Result<()> {
        let mut users = self.users.write();
        let user = users
            .iter_mut()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .ok_or_else(|| {
                ServiceError::service(StatusCode::NOT_FOUND, format!("Unknown user: {email}"))
            })?;
        user.gender = gender;
        Ok(())
    }
}

/// 内置角色，只读。
#[derive(Debug)]
pub struct RoleCatalog {
    roles: Vec<(&'static str, &'static str)>,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self {
            roles: vec![
                ("admin", "Full access to the directory"),
                ("reader", "Read-only access"),
            ],
        }
    }
}

fn directory(invocation: &Invocation) -> Result<Arc<Directory>> {
    invocation.instance::<Directory>()
}

async fn get_users(invocation: Invocation) -> Result<Vec<User>> {
    Ok(directory(&invocation)?.list())
}

fn get_user(invocation: Invocation) -> Result<Option<User>> {
    let email: String = invocation.arg("email")?;
    Ok(directory(&invocation)?.find(&email))
}

fn add_user(invocation: Invocation) -> Result<()> {
    let user = User {
        email: invocation.arg("email")?,
        display_name: invocation.arg("displayName")?,
        gender: 0,
    };
    directory(&invocation)?.add(user)
}

fn set_gender(invocation: Invocation) -> Result<()> {
    let email: String = invocation.arg("email")?;
    let gender: i32 = invocation.arg("gender")?;
    directory(&invocation)?.set_gender(&email, gender)
}

fn get_roles(invocation: Invocation) -> Result<Vec<EntityValue>> {
    let catalog = invocation.instance::<RoleCatalog>()?;
    Ok(catalog
        .roles
        .iter()
        .map(|(name, description)| {
            EntityValue::new("Role")
                .with("Name", *name)
                .with("Description", *description)
        })
        .collect())
}

/// HTTP 调用时回显租户与版本；RPC 前端不提供请求上下文。
fn whoami(invocation: Invocation) -> Result<String> {
    let context = invocation
        .args
        .platform::<HttpCallContext>()
        .ok_or_else(|| ServiceError::unexpected("whoami invoked without an HTTP context"))?;
    Ok(format!("{}@v{}", context.user_domain, context.version))
}

/// 每秒产出一个剩余秒数。
fn count_down(invocation: Invocation) -> Result<impl Stream<Item = Result<i32>> + Send + 'static> {
    let from: i32 = invocation.arg("from")?;
    Ok(stream::iter((1..=from).rev()).then(|remaining| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<_, ServiceError>(remaining)
    }))
}

pub fn declarations() -> ContractDeclarations {
    ContractDeclarations::new()
        .enumeration(
            EnumDecl::new("Gender", MODULE)
                .member("Unknown", 0)
                .member("Male", 1)
                .member("Female", 2)
                .value(EnumValueDecl::new("Other", 3).added(2)),
        )
        .entity(
            EntityDecl::new("User", MODULE)
                .property(
                    PropertyDecl::new("Email", TypeDecl::string())
                        .required()
                        .key()
                        .max_length(256),
                )
                .property(
                    PropertyDecl::new("DisplayName", TypeDecl::string())
                        .optional()
                        .renamed(2, "Name"),
                )
                .property(
                    PropertyDecl::new("Gender", TypeDecl::enumeration("Gender"))
                        .optional()
                        .added(2),
                ),
        )
        .entity(
            EntityDecl::new("Role", MODULE)
                .added(2)
                .property(PropertyDecl::new("Name", TypeDecl::string()).required().key())
                .property(PropertyDecl::new("Description", TypeDecl::string()).optional()),
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
                    CommandDecl::sync(
                        "GetUser",
                        TypeDecl::nullable(TypeDecl::entity("User")),
                        get_user,
                    )
                    .query()
                    .param(ParamDecl::new("email", TypeDecl::string())),
                )
                .command(
                    CommandDecl::sync_void("AddUser", add_user)
                        .param(ParamDecl::new("email", TypeDecl::string()))
                        .param(ParamDecl::new("displayName", TypeDecl::string()).with_default("")),
                )
                .command(
                    CommandDecl::sync_void("SetGender", set_gender)
                        .added(2)
                        .param(ParamDecl::new("email", TypeDecl::string()))
                        .param(ParamDecl::new("gender", TypeDecl::enumeration("Gender"))),
                )
                .command(
                    CommandDecl::sync("Whoami", TypeDecl::string(), whoami)
                        .query()
                        .param(ParamDecl::new("context", TypeDecl::Transport)),
                )
                .command(
                    CommandDecl::stream("CountDown", TypeDecl::int32(), count_down)
                        .param(ParamDecl::new("from", TypeDecl::int32()))
                        .param(ParamDecl::new("token", TypeDecl::Cancellation)),
                ),
        )
        .service(
            ServiceDecl::new("IRoleService", MODULE).added(2).command(
                CommandDecl::sync(
                    "GetRoles",
                    TypeDecl::array(TypeDecl::entity("Role")),
                    get_roles,
                )
                .query(),
            ),
        )
}

/// 目录以单例注册，两个前端共享同一份数据。
pub fn provider() -> ScopedServiceProvider {
    ScopedServiceProvider::new()
        .singleton("IUserService", Arc::new(Directory::default()))
        .singleton("IRoleService", Arc::new(RoleCatalog::default()))
}
