//! 契约模型：类型、属性、实体、枚举、参数、命令、服务与根元数据文档。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一版本的元数据在构建后即被冻结，供序列化器与两个传输前端只读共享；
//! - **契约 (What)**：所有按名称索引的集合都使用 [`NameMap`]，查找大小写不敏感，
//!   遍历顺序保持声明顺序；
//! - **风险 (Trade-offs)**：名称键在插入时统一转为小写，非 ASCII 名称的大小写折叠依赖
//!   `str::to_lowercase` 的 Unicode 规则。

use std::collections::HashMap;
use std::fmt;

use crate::handler::{CommandHandler, ResponseStrategy};
use crate::value::NativeValue;

/// 大小写不敏感、保持插入顺序的名称映射。
#[derive(Clone)]
pub struct NameMap<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> NameMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// 插入或替换条目；替换时保留原有位置并返回旧值。
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        let key = name.to_lowercase();
        match self.index.get(&key) {
            Some(&slot) => {
                let previous = std::mem::replace(&mut self.entries[slot], (name, value));
                Some(previous.1)
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.index
            .get(&name.to_lowercase())
            .map(|&slot| &self.entries[slot].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        let slot = *self.index.get(&name.to_lowercase())?;
        Some(&mut self.entries[slot].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl<V> Default for NameMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for NameMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl<V: PartialEq> PartialEq for NameMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<V: Eq> Eq for NameMap<V> {}

impl<V> FromIterator<(String, V)> for NameMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

/// 线上契约已知的原始类型。
///
/// 名称与线上文档中的 `type.name` 一一对应。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Void,
    Boolean,
    Byte,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Guid,
    DateTime,
    DateTimeOffset,
    TimeSpan,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 13] = [
        PrimitiveType::Void,
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::Single,
        PrimitiveType::Double,
        PrimitiveType::Decimal,
        PrimitiveType::String,
        PrimitiveType::Guid,
        PrimitiveType::DateTime,
        PrimitiveType::DateTimeOffset,
        PrimitiveType::TimeSpan,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "Void",
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Byte => "Byte",
            PrimitiveType::Int32 => "Int32",
            PrimitiveType::Int64 => "Int64",
            PrimitiveType::Single => "Single",
            PrimitiveType::Double => "Double",
            PrimitiveType::Decimal => "Decimal",
            PrimitiveType::String => "String",
            PrimitiveType::Guid => "Guid",
            PrimitiveType::DateTime => "DateTime",
            PrimitiveType::DateTimeOffset => "DateTimeOffset",
            PrimitiveType::TimeSpan => "TimeSpan",
        }
    }

    /// 按线上名称解析，区分大小写。
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 取消能力类型在契约中的名称。
pub const CANCELLATION_TYPE_NAME: &str = "CancellationToken";
/// 原始传输上下文类型在契约中的名称。
pub const TRANSPORT_TYPE_NAME: &str = "HttpContext";

/// 类型描述。
///
/// # 教案式说明
/// - **契约 (What)**：`name` 指向原始类型、枚举或实体之一（或 `Void`）；
///   `is_primitive` 表示“非数组、非流且非实体”的单值形态；
///   `is_cancellation_token` 与 `is_transport` 标记不出现在公开参数面上的特殊类型。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub is_array: bool,
    pub is_nullable: bool,
    pub is_observable: bool,
    pub is_primitive: bool,
    pub is_cancellation_token: bool,
    pub is_transport: bool,
    pub max_length: Option<u32>,
}

impl TypeInfo {
    /// 以单值形态描述给定名称。
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_primitive: true,
            ..Self::default()
        }
    }

    pub fn void() -> Self {
        Self::named(PrimitiveType::Void.name())
    }

    pub fn array_of(name: impl Into<String>) -> Self {
        Self {
            is_array: true,
            is_primitive: false,
            ..Self::named(name)
        }
    }

    /// 数组元素的类型描述。
    pub fn element(&self) -> TypeInfo {
        TypeInfo {
            is_array: false,
            is_observable: false,
            is_primitive: true,
            ..self.clone()
        }
    }

    pub fn is_void(&self) -> bool {
        !self.is_array && self.name == PrimitiveType::Void.name()
    }

    /// 对应的原始类型（若有）。
    pub fn primitive(&self) -> Option<PrimitiveType> {
        PrimitiveType::from_name(&self.name)
    }
}

/// 枚举成员。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i32,
}

/// 枚举描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMeta {
    pub name: String,
    pub values: NameMap<EnumValue>,
}

impl EnumMeta {
    pub fn contains_value(&self, value: i32) -> bool {
        self.values.values().any(|v| v.value == value)
    }

    /// 以 `A = 0, B = 1` 形式列出全部合法成员。
    pub fn describe_values(&self) -> String {
        self.values
            .values()
            .map(|v| format!("{} = {}", v.name, v.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 实体属性。
///
/// `native_name` 是本地 [`crate::EntityValue`] 中的字段键，`name` 是当前版本的线上名称。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub native_name: String,
    pub type_info: TypeInfo,
    pub is_required: bool,
    pub is_optional: bool,
    pub max_length: Option<u32>,
    pub is_key: bool,
}

/// 实体描述，`parent` 为父实体的线上名称。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    pub native_name: String,
    pub parent: Option<String>,
    pub properties: NameMap<Property>,
}

/// 命令参数。
///
/// # 教案式说明
/// - **契约 (What)**：`is_platform_specific` 的参数由传输层解析，不出现在公开契约中；
///   `default` 在调用方缺省该参数时代入，只存在于服务端。
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_info: TypeInfo,
    pub is_optional: bool,
    pub is_platform_specific: bool,
    pub default: Option<NativeValue>,
}

impl Parameter {
    /// 是否属于调用方需要在线上提供的参数。
    pub fn is_public(&self) -> bool {
        !self.is_platform_specific && !self.type_info.is_cancellation_token
    }
}

/// 命令描述。
///
/// `handler` 仅存在于服务端构建的元数据；从线上文档读回的元数据不携带处理器。
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub fullname: String,
    pub service: String,
    pub service_native: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeInfo,
    pub is_query: bool,
    pub is_http_raw: bool,
    pub handler: Option<CommandHandler>,
}

impl Command {
    /// 返回流式结果，或拥有取消能力参数的命令支持取消。
    pub fn supports_cancellation(&self) -> bool {
        self.return_type.is_observable
            || self
                .parameters
                .iter()
                .any(|p| p.type_info.is_cancellation_token)
    }

    /// 注册期选定的响应策略。
    pub fn strategy(&self) -> Option<ResponseStrategy> {
        self.handler.as_ref().map(CommandHandler::strategy)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("fullname", &self.fullname)
            .field("service", &self.service)
            .field("parameters", &self.parameters)
            .field("return_type", &self.return_type)
            .field("is_query", &self.is_query)
            .field("is_http_raw", &self.is_http_raw)
            .field("strategy", &self.strategy())
            .finish()
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fullname == other.fullname
            && self.service == other.service
            && self.parameters == other.parameters
            && self.return_type == other.return_type
            && self.is_query == other.is_query
            && self.is_http_raw == other.is_http_raw
    }
}

/// 服务描述。
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub name: String,
    pub native_name: String,
    pub commands: NameMap<Command>,
}

/// 单一版本的根元数据文档。
///
/// # 教案式说明
/// - **意图 (Why)**：作为序列化器与调度器的唯一事实来源；
/// - **契约 (What)**：任意命令可达的 [`TypeInfo`] 要么是已知原始类型，要么存在于
///   `enums` / `entities` 之中，要么为 `Void`；
/// - **逻辑 (How)**：额外维护“本地实体名 → 线上实体名”的索引，序列化时据此推导
///   多态判别字段。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub cur_version: u32,
    pub min_version: u32,
    pub max_version: u32,
    pub enums: NameMap<EnumMeta>,
    pub entities: NameMap<Entity>,
    pub services: NameMap<Service>,
    native_entities: HashMap<String, String>,
}

impl Metadata {
    pub fn new(cur_version: u32, min_version: u32, max_version: u32) -> Self {
        Self {
            cur_version,
            min_version,
            max_version,
            ..Self::default()
        }
    }

    /// 写入实体并登记其本地名称。
    pub fn insert_entity(&mut self, entity: Entity) {
        self.native_entities
            .insert(entity.native_name.clone(), entity.name.clone());
        self.entities.insert(entity.name.clone(), entity);
    }

    /// 按本地实体名查找当前版本的实体描述。
    pub fn entity_by_native(&self, native_name: &str) -> Option<&Entity> {
        self.native_entities
            .get(native_name)
            .and_then(|name| self.entities.get(name))
    }

    /// 按服务名与命令名（均大小写不敏感）解析命令。
    pub fn find_command(&self, service: &str, command: &str) -> Option<&Command> {
        self.services.get(service)?.commands.get(command)
    }

    /// 判断 `entity` 是否等于 `ancestor` 或沿父链派生自它。
    pub fn is_assignable(&self, ancestor: &str, entity: &str) -> bool {
        let mut cursor = self.entities.get(entity);
        while let Some(current) = cursor {
            if current.name.eq_ignore_ascii_case(ancestor) {
                return true;
            }
            cursor = current.parent.as_deref().and_then(|p| self.entities.get(p));
        }
        false
    }

    /// 自子类向上收集整条继承链上的属性，祖先属性排在前面。
    pub fn collect_properties<'a>(&'a self, entity: &'a Entity) -> Vec<&'a Property> {
        let mut chain = vec![entity];
        let mut cursor = entity.parent.as_deref().and_then(|p| self.entities.get(p));
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = parent.parent.as_deref().and_then(|p| self.entities.get(p));
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|e| e.properties.values())
            .collect()
    }

    /// 全部对外可见的流程名（`fullname`）。
    pub fn procedures(&self) -> impl Iterator<Item = &Command> {
        self.services.values().flat_map(|s| s.commands.values())
    }
}
