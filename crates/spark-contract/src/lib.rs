#![doc = r#"
# spark-contract

## 设计动机（Why）
- **定位**：把一组以描述表声明的服务操作推导为可自描述、向后兼容的线上契约（元数据），
  并依据该契约在 JSON 与本地值之间往返编解码。
- **架构角色**：为 `spark-dispatch` 的 HTTP 中间件与流式 RPC 调用器提供只读共享的
  元数据与序列化能力；本 crate 不感知任何传输细节。
- **设计理念**：用显式描述表取代运行时反射，所有版本化规则在构建期一次性求值，
  构建结果不可变，可被任意调用并发读取。

## 核心契约（What）
- [`declaration`]：服务、命令、实体、枚举的声明表；
- [`versioning`] / [`naming`]：版本注解求值与对外名称规则；
- [`builder`]：针对单一版本构建 [`model::Metadata`]；
- [`collection`]：按版本惰性构建并缓存元数据，拒绝越界版本；
- [`serializer`]：元数据驱动的 JSON 编解码与参数列表装配；
- [`handler`]：命令处理器的封闭形态枚举、调用上下文与作用域解析；
- [`document`]：元数据的线上 JSON 文档读写。

## 实现策略（How）
- 错误统一收敛为 [`ServiceError`]，携带稳定错误码与 HTTP 状态映射；
- 日志统一经由 `tracing` 门面输出，本 crate 不安装任何 Subscriber。
"#]

pub mod builder;
pub mod collection;
pub mod config;
pub mod declaration;
pub mod document;
pub mod error;
pub mod handler;
pub mod model;
pub mod naming;
pub mod serializer;
pub mod text;
pub mod value;
pub mod versioning;

pub use builder::MetadataBuilder;
pub use collection::MetadataCollection;
pub use config::ContractSettings;
pub use declaration::{
    CommandDecl, ContractDeclarations, EntityDecl, EnumDecl, EnumValueDecl, ParamDecl,
    PropertyDecl, ServiceDecl, TypeDecl, TypeRegistry,
};
pub use error::{Result, ServiceError};
pub use handler::{
    Argument, Arguments, CancellationToken, CommandHandler, Invocation, ResponseStrategy,
    ScopedServiceProvider, ServiceContext, ServiceProvider, ServiceScope, UserDomain,
};
pub use model::{
    Command, Entity, EnumMeta, EnumValue, Metadata, NameMap, Parameter, PrimitiveType, Property,
    Service, TypeInfo,
};
pub use serializer::{Serializer, TYPE_DISCRIMINATOR};
pub use value::{ContractValue, EntityValue, NativeValue};
pub use versioning::{Resolution, VersionAnnotation, VersionChange};
