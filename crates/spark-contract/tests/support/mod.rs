//! 身份域契约夹具：用户服务、角色服务与 `Person`/`Employee` 继承链。
//!
//! # 教案式说明
//! - **意图 (Why)**：各集成测试共享一份覆盖版本注解、继承、枚举、流式与平台参数的契约，
//!   避免在每个测试文件中重复声明；
//! - **契约 (What)**：版本区间为 `[1, 2]`；
//!   - v2 新增：`User.score`、`Gender.Other`、`RoleService`、`Role`、`setGender`；
//!   - v2 移除：`Person.fax`、`legacyPing`；
//!   - v2 改名：`Person.alias` → `Person.nickname`。

#![allow(dead_code)]

use std::sync::Arc;

use futures::Stream;
use futures::stream;
use http::StatusCode;
use parking_lot::Mutex;
use spark_contract::{
    CommandDecl, ContractDeclarations, ContractSettings, ContractValue, EntityDecl, EntityValue,
    EnumDecl, EnumValueDecl, Invocation, NativeValue, ParamDecl, PrimitiveType, PropertyDecl,
    Result, ScopedServiceProvider, ServiceDecl, ServiceError, TypeDecl,
};

pub const MODULE: &str = "identity";
pub const PREFIX: &str = "identity";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gender {
    Unknown,
    Male,
    Female,
    Other,
}

spark_contract::contract_enum!(Gender {
    Unknown = 0,
    Male = 1,
    Female = 2,
    Other = 3,
});

#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub email: String,
    pub name: String,
    pub active: bool,
    pub score: i32,
}

impl User {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.to_owned(),
            name: name.to_owned(),
            active: true,
            score: 0,
        }
    }
}

impl ContractValue for User {
    fn into_native(self) -> NativeValue {
        EntityValue::new("User")
            .with("Email", self.email)
            .with("Name", self.name)
            .with("Active", self.active)
            .with("Score", self.score)
            .into_native()
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        let mut entity = EntityValue::from_native(value)?;
        Ok(Self {
            email: entity.take_or_default("Email")?,
            name: entity.take_or_default("Name")?,
            active: entity.take_or_default("Active")?,
            score: entity.take_or_default("Score")?,
        })
    }
}

/// 进程内用户存储。
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

    pub fn find(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn add(&self, user: User) -> Result<()> {
        let mut users = self.users.lock();
        if users
            .iter()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(ServiceError::service(
                StatusCode::CONFLICT,
                format!("User already exists: {}", user.email),
            ));
        }
        users.push(user);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }
}

/// `IUserService` 的实现。
#[derive(Debug)]
pub struct UserServiceImpl {
    pub store: Arc<UserStore>,
}

async fn get_users(invocation: Invocation) -> Result<Vec<User>> {
    let service = invocation.instance::<UserServiceImpl>()?;
    Ok(service.store.list())
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

fn whoami(invocation: Invocation) -> Result<String> {
    Ok(invocation.context.user_domain.to_string())
}

fn legacy_ping(_invocation: Invocation) -> Result<String> {
    Ok("pong".to_owned())
}

fn set_gender(invocation: Invocation) -> Result<()> {
    let _gender: Gender = invocation.arg("gender")?;
    Ok(())
}

async fn find_people(_invocation: Invocation) -> Result<Vec<EntityValue>> {
    Ok(vec![sample_person(), sample_employee()])
}

fn get_roles(_invocation: Invocation) -> Result<Vec<EntityValue>> {
    Ok(vec![
        EntityValue::new("Role")
            .with("Name", "admin")
            .with("Members", vec![sample_person()]),
    ])
}

pub fn sample_person() -> EntityValue {
    EntityValue::new("Person")
        .with("Id", uuid::Uuid::nil())
        .with("Name", "Ada")
        .with("Nickname", "countess")
        .with("Gender", Gender::Female)
}

pub fn sample_employee() -> EntityValue {
    EntityValue::new("Employee")
        .with("Id", uuid::Uuid::from_u128(7))
        .with("Name", "Grace")
        .with("Department", "Navy")
        .with("Salary", rust_decimal::Decimal::new(12_345, 2))
}

pub fn user_service() -> ServiceDecl {
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
            CommandDecl::sync("Whoami", TypeDecl::string(), whoami)
                .query()
                .param(ParamDecl::new("context", TypeDecl::Transport)),
        )
        .command(
            CommandDecl::sync("LegacyPing", TypeDecl::string(), legacy_ping)
                .query()
                .removed(2),
        )
        .command(
            CommandDecl::sync_void("SetGender", set_gender)
                .added(2)
                .param(ParamDecl::new("email", TypeDecl::string()))
                .param(ParamDecl::new("gender", TypeDecl::enumeration("Gender"))),
        )
        .command(
            CommandDecl::future(
                "FindPeopleAsync",
                TypeDecl::array(TypeDecl::entity("Person")),
                find_people,
            )
            .query(),
        )
}

pub fn role_service() -> ServiceDecl {
    ServiceDecl::new("IRoleService", MODULE)
        .added(2)
        .command(
            CommandDecl::sync(
                "GetRoles",
                TypeDecl::array(TypeDecl::entity("Role")),
                get_roles,
            )
            .query(),
        )
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
                .property(PropertyDecl::new("Name", TypeDecl::string()).optional())
                .property(PropertyDecl::new("Active", TypeDecl::boolean()))
                .property(PropertyDecl::new("Score", TypeDecl::int32()).added(2))
                .property(PropertyDecl::new("PasswordHash", TypeDecl::string()).ignored()),
        )
        .entity(
            EntityDecl::new("Person", MODULE)
                .property(PropertyDecl::new("Id", TypeDecl::primitive(PrimitiveType::Guid)).key())
                .property(PropertyDecl::new("Name", TypeDecl::string()).required())
                .property(
                    PropertyDecl::new("Nickname", TypeDecl::string())
                        .optional()
                        .renamed(2, "Alias"),
                )
                .property(PropertyDecl::new("Gender", TypeDecl::enumeration("Gender")).optional())
                .property(
                    PropertyDecl::new(
                        "BirthDate",
                        TypeDecl::nullable(TypeDecl::primitive(PrimitiveType::DateTime)),
                    )
                    .optional(),
                )
                .property(PropertyDecl::new("Fax", TypeDecl::string()).removed(2)),
        )
        .entity(
            EntityDecl::new("Employee", MODULE)
                .extends("Person")
                .property(
                    PropertyDecl::new("Salary", TypeDecl::primitive(PrimitiveType::Decimal))
                        .optional(),
                )
                .property(PropertyDecl::new("Department", TypeDecl::string()).required()),
        )
        .entity(
            EntityDecl::new("Role", MODULE)
                .added(2)
                .property(PropertyDecl::new("Name", TypeDecl::string()).required().key())
                .property(PropertyDecl::new(
                    "Members",
                    TypeDecl::array(TypeDecl::entity("Person")),
                )),
        )
        .service(user_service())
        .service(role_service())
}

pub fn settings() -> ContractSettings {
    ContractSettings::new(PREFIX, 1, 2)
}

pub fn provider(store: Arc<UserStore>) -> ScopedServiceProvider {
    ScopedServiceProvider::new().singleton("IUserService", Arc::new(UserServiceImpl { store }))
}
