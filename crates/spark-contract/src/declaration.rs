//! 声明表：服务、命令、参数、实体、属性与枚举的显式描述。
//!
//! # 教案式说明
//! - **意图 (Why)**：以进程启动时构造一次的描述表取代对运行时类型的反射，元数据构建器
//!   只遍历这些描述；
//! - **契约 (What)**：
//!   - 每个服务、实体与枚举都声明其所属模块，构建器据此拒绝引用外部模块的类型；
//!   - 类型之间以“本地名称”相互引用，由 [`TypeRegistry`] 统一登记；
//!   - 处理器形态决定命令的返回包装：`future*` 构造器会自动包上异步层，`stream` 构造器
//!     包上流式层；
//! - **风险 (Trade-offs)**：名称引用在构建期才会被校验，拼写错误表现为构建错误而非编译错误。

use std::collections::HashMap;
use std::future::Future;

use futures::Stream;

use crate::error::Result;
use crate::handler::{CommandHandler, Invocation};
use crate::model::PrimitiveType;
use crate::value::{ContractValue, NativeValue};
use crate::versioning::VersionAnnotation;

/// 声明层面的类型表达式。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeDecl {
    Void,
    Primitive(PrimitiveType),
    Enum(String),
    Entity(String),
    Array(Box<TypeDecl>),
    Nullable(Box<TypeDecl>),
    Stream(Box<TypeDecl>),
    Future(Box<TypeDecl>),
    Cancellation,
    Transport,
}

impl TypeDecl {
    pub fn primitive(primitive: PrimitiveType) -> Self {
        TypeDecl::Primitive(primitive)
    }

    pub fn string() -> Self {
        TypeDecl::Primitive(PrimitiveType::String)
    }

    pub fn boolean() -> Self {
        TypeDecl::Primitive(PrimitiveType::Boolean)
    }

    pub fn int32() -> Self {
        TypeDecl::Primitive(PrimitiveType::Int32)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        TypeDecl::Entity(name.into())
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        TypeDecl::Enum(name.into())
    }

    pub fn array(inner: TypeDecl) -> Self {
        TypeDecl::Array(Box::new(inner))
    }

    pub fn nullable(inner: TypeDecl) -> Self {
        TypeDecl::Nullable(Box::new(inner))
    }

    pub fn is_future(&self) -> bool {
        matches!(self, TypeDecl::Future(_))
    }
}

macro_rules! versioned {
    ($ty:ty) => {
        impl $ty {
            /// 覆盖默认的对外名称。
            pub fn external_name(mut self, name: impl Into<String>) -> Self {
                self.external_name = Some(name.into());
                self
            }

            pub fn added(mut self, version: u32) -> Self {
                self.annotations.push(VersionAnnotation::added(version));
                self
            }

            pub fn removed(mut self, version: u32) -> Self {
                self.annotations.push(VersionAnnotation::removed(version));
                self
            }

            pub fn renamed(mut self, version: u32, old_name: impl Into<String>) -> Self {
                self.annotations
                    .push(VersionAnnotation::renamed(version, old_name));
                self
            }

            pub fn type_changed(mut self, version: u32, old_type: impl Into<String>) -> Self {
                self.annotations
                    .push(VersionAnnotation::type_changed(version, old_type));
                self
            }
        }
    };
}

/// 命令参数声明。
#[derive(Clone, Debug, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeDecl,
    pub optional: bool,
    pub default: Option<NativeValue>,
}

impl ParamDecl {
    pub fn new(name: impl Into<String>, ty: TypeDecl) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// 声明缺省值，隐含可选。
    pub fn with_default(mut self, value: impl ContractValue) -> Self {
        self.optional = true;
        self.default = Some(value.into_native());
        self
    }
}

/// 命令声明。
#[derive(Clone, Debug)]
pub struct CommandDecl {
    pub name: String,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
    pub is_query: bool,
    pub params: Vec<ParamDecl>,
    pub returns: TypeDecl,
    pub handler: CommandHandler,
}

versioned!(CommandDecl);

impl CommandDecl {
    /// 以显式返回类型与处理器构造命令。
    pub fn new(name: impl Into<String>, returns: TypeDecl, handler: CommandHandler) -> Self {
        Self {
            name: name.into(),
            external_name: None,
            annotations: Vec::new(),
            is_query: false,
            params: Vec::new(),
            returns,
            handler,
        }
    }

    pub fn sync_void<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(name, TypeDecl::Void, CommandHandler::sync_void(f))
    }

    pub fn sync<T, F>(name: impl Into<String>, returns: TypeDecl, f: F) -> Self
    where
        T: ContractValue,
        F: Fn(Invocation) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(name, returns, CommandHandler::sync(f))
    }

    pub fn future_void<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(
            name,
            TypeDecl::Future(Box::new(TypeDecl::Void)),
            CommandHandler::future_void(f),
        )
    }

    pub fn future<T, F, Fut>(name: impl Into<String>, returns: TypeDecl, f: F) -> Self
    where
        T: ContractValue + 'static,
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new(
            name,
            TypeDecl::Future(Box::new(returns)),
            CommandHandler::future(f),
        )
    }

    pub fn stream<T, F, S>(name: impl Into<String>, item: TypeDecl, f: F) -> Self
    where
        T: ContractValue + 'static,
        F: Fn(Invocation) -> Result<S> + Send + Sync + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self::new(
            name,
            TypeDecl::Stream(Box::new(item)),
            CommandHandler::stream(f),
        )
    }

    /// 标记为无副作用的查询命令，允许经由 GET 调用。
    pub fn query(mut self) -> Self {
        self.is_query = true;
        self
    }

    pub fn param(mut self, param: ParamDecl) -> Self {
        self.params.push(param);
        self
    }
}

/// 服务声明。
#[derive(Clone, Debug)]
pub struct ServiceDecl {
    pub name: String,
    pub module: String,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
    pub commands: Vec<CommandDecl>,
}

versioned!(ServiceDecl);

impl ServiceDecl {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            external_name: None,
            annotations: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, command: CommandDecl) -> Self {
        self.commands.push(command);
        self
    }
}

/// 实体属性声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: TypeDecl,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
    pub required: bool,
    pub optional: bool,
    pub key: bool,
    pub ignored: bool,
    pub max_length: Option<u32>,
}

versioned!(PropertyDecl);

impl PropertyDecl {
    pub fn new(name: impl Into<String>, ty: TypeDecl) -> Self {
        Self {
            name: name.into(),
            ty,
            external_name: None,
            annotations: Vec::new(),
            required: false,
            optional: false,
            key: false,
            ignored: false,
            max_length: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// 等于零值时从输出中省略。
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// 仅供内部使用，不进入契约。
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// 实体声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityDecl {
    pub name: String,
    pub module: String,
    pub parent: Option<String>,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
    pub properties: Vec<PropertyDecl>,
    pub is_abstract: bool,
}

versioned!(EntityDecl);

impl EntityDecl {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            parent: None,
            external_name: None,
            annotations: Vec::new(),
            properties: Vec::new(),
            is_abstract: false,
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

/// 枚举成员声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumValueDecl {
    pub name: String,
    pub value: i32,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
}

versioned!(EnumValueDecl);

impl EnumValueDecl {
    pub fn new(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: name.into(),
            value,
            external_name: None,
            annotations: Vec::new(),
        }
    }
}

/// 枚举声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDecl {
    pub name: String,
    pub module: String,
    pub external_name: Option<String>,
    pub annotations: Vec<VersionAnnotation>,
    pub values: Vec<EnumValueDecl>,
}

versioned!(EnumDecl);

impl EnumDecl {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            external_name: None,
            annotations: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, value: EnumValueDecl) -> Self {
        self.values.push(value);
        self
    }

    /// 追加一个不带版本注解的成员。
    pub fn member(self, name: impl Into<String>, value: i32) -> Self {
        self.value(EnumValueDecl::new(name, value))
    }
}

/// 已登记的实体与枚举声明，按本地名称索引，保持登记顺序。
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    entities: Vec<EntityDecl>,
    enums: Vec<EnumDecl>,
    entity_index: HashMap<String, usize>,
    enum_index: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn entity(&self, name: &str) -> Option<&EntityDecl> {
        self.entity_index.get(name).map(|&slot| &self.entities[slot])
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDecl> {
        self.enum_index.get(name).map(|&slot| &self.enums[slot])
    }

    pub fn entities(&self) -> &[EntityDecl] {
        &self.entities
    }

    fn register_entity(&mut self, decl: EntityDecl) {
        match self.entity_index.get(&decl.name) {
            Some(&slot) => self.entities[slot] = decl,
            None => {
                self.entity_index.insert(decl.name.clone(), self.entities.len());
                self.entities.push(decl);
            }
        }
    }

    fn register_enum(&mut self, decl: EnumDecl) {
        match self.enum_index.get(&decl.name) {
            Some(&slot) => self.enums[slot] = decl,
            None => {
                self.enum_index.insert(decl.name.clone(), self.enums.len());
                self.enums.push(decl);
            }
        }
    }

    /// 判断 `candidate` 是否等于 `ancestor` 或沿父链派生自它。
    pub fn derives_from(&self, candidate: &str, ancestor: &str) -> bool {
        let mut cursor = self.entity(candidate);
        let mut hops = 0usize;
        while let Some(decl) = cursor {
            if decl.name == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.entities.len() {
                return false;
            }
            cursor = decl.parent.as_deref().and_then(|parent| self.entity(parent));
        }
        false
    }
}

/// 完整的契约声明：服务表加类型登记表。
#[derive(Clone, Debug, Default)]
pub struct ContractDeclarations {
    services: Vec<ServiceDecl>,
    types: TypeRegistry,
}

impl ContractDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: ServiceDecl) -> Self {
        self.services.push(service);
        self
    }

    pub fn entity(mut self, entity: EntityDecl) -> Self {
        self.types.register_entity(entity);
        self
    }

    pub fn enumeration(mut self, decl: EnumDecl) -> Self {
        self.types.register_enum(decl);
        self
    }

    pub fn services(&self) -> &[ServiceDecl] {
        &self.services
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
}
