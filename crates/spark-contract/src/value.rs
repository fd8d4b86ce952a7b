//! 本地值模型：序列化器在 JSON 与处理器之间交换的动态值。
//!
//! # 教案式说明
//! - **意图 (Why)**：处理器以强类型编写，而契约是运行期数据；[`NativeValue`] 是两者之间
//!   的中间表示，[`ContractValue`] 负责强类型与中间表示的互转；
//! - **契约 (What)**：实体值以本地类型名标记运行时类型，序列化器据此决定是否写出多态
//!   判别字段；
//! - **风险 (Trade-offs)**：实体字段以 `BTreeMap` 存储，字段顺序与声明顺序无关，线上输出
//!   顺序由元数据决定。

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// 动态本地值。
#[derive(Clone, Debug, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Byte(u8),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeSpan(TimeDelta),
    Enum(i32),
    Array(Vec<NativeValue>),
    Entity(EntityValue),
}

impl NativeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// 值类型的零值：`DateTime` 的零值为 `0001-01-01T00:00:00`。
    pub fn zero_datetime() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(1, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    }

    /// 判断当前值是否等于其类型的零值。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：值类型与各自零值比较；字符串、数组与实体属于引用形态，
    ///   只有 `Null` 视为零值。
    pub fn is_zero(&self) -> bool {
        match self {
            NativeValue::Null => true,
            NativeValue::Bool(v) => !*v,
            NativeValue::Byte(v) => *v == 0,
            NativeValue::Int32(v) | NativeValue::Enum(v) => *v == 0,
            NativeValue::Int64(v) => *v == 0,
            NativeValue::Single(v) => *v == 0.0,
            NativeValue::Double(v) => *v == 0.0,
            NativeValue::Decimal(v) => v.is_zero(),
            NativeValue::Guid(v) => v.is_nil(),
            NativeValue::DateTime(v) => *v == Self::zero_datetime(),
            NativeValue::DateTimeOffset(v) => {
                v.offset().local_minus_utc() == 0 && v.naive_utc() == Self::zero_datetime()
            }
            NativeValue::TimeSpan(v) => *v == TimeDelta::zero(),
            NativeValue::String(_) | NativeValue::Array(_) | NativeValue::Entity(_) => false,
        }
    }

    /// 用于错误消息的形态名称。
    pub fn kind(&self) -> &'static str {
        match self {
            NativeValue::Null => "Null",
            NativeValue::Bool(_) => "Boolean",
            NativeValue::Byte(_) => "Byte",
            NativeValue::Int32(_) => "Int32",
            NativeValue::Int64(_) => "Int64",
            NativeValue::Single(_) => "Single",
            NativeValue::Double(_) => "Double",
            NativeValue::Decimal(_) => "Decimal",
            NativeValue::String(_) => "String",
            NativeValue::Guid(_) => "Guid",
            NativeValue::DateTime(_) => "DateTime",
            NativeValue::DateTimeOffset(_) => "DateTimeOffset",
            NativeValue::TimeSpan(_) => "TimeSpan",
            NativeValue::Enum(_) => "Enum",
            NativeValue::Array(_) => "Array",
            NativeValue::Entity(_) => "Entity",
        }
    }
}

/// 实体实例：本地类型名加字段表。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityValue {
    pub type_name: String,
    pub fields: BTreeMap<String, NativeValue>,
}

impl EntityValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// 以构建器风格写入字段。
    pub fn with(mut self, field: impl Into<String>, value: impl ContractValue) -> Self {
        self.fields.insert(field.into(), value.into_native());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: NativeValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&NativeValue> {
        self.fields.get(field)
    }

    /// 取出字段并转换为强类型；缺失字段按 `Null` 处理。
    pub fn take<T: ContractValue>(&mut self, field: &str) -> Result<T> {
        let value = self.fields.remove(field).unwrap_or(NativeValue::Null);
        T::from_native(value).map_err(|err| match err {
            ServiceError::Serialization { message } => ServiceError::serialization(format!(
                "{message} (field {field} on {})",
                self.type_name
            )),
            other => other,
        })
    }

    /// 取出字段，缺失或为 `Null` 时返回类型默认值。
    pub fn take_or_default<T: ContractValue + Default>(&mut self, field: &str) -> Result<T> {
        match self.fields.remove(field) {
            None | Some(NativeValue::Null) => Ok(T::default()),
            Some(value) => T::from_native(value),
        }
    }
}

/// 强类型与 [`NativeValue`] 的互转契约。
///
/// # 教案式说明
/// - **契约 (What)**：`from_native(into_native(x)) == x`；类型不符时返回
///   [`ServiceError::Serialization`]。
pub trait ContractValue: Sized {
    fn into_native(self) -> NativeValue;
    fn from_native(value: NativeValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, actual: &NativeValue) -> Result<T> {
    Err(ServiceError::serialization(format!(
        "Type mismatch: expected {expected}, found {}",
        actual.kind()
    )))
}

macro_rules! contract_primitive {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl ContractValue for $ty {
            fn into_native(self) -> NativeValue {
                NativeValue::$variant(self)
            }

            fn from_native(value: NativeValue) -> Result<Self> {
                match value {
                    NativeValue::$variant(inner) => Ok(inner),
                    other => mismatch($expected, &other),
                }
            }
        }
    };
}

contract_primitive!(bool, Bool, "Boolean");
contract_primitive!(u8, Byte, "Byte");
contract_primitive!(i64, Int64, "Int64");
contract_primitive!(f32, Single, "Single");
contract_primitive!(f64, Double, "Double");
contract_primitive!(Decimal, Decimal, "Decimal");
contract_primitive!(String, String, "String");
contract_primitive!(Uuid, Guid, "Guid");
contract_primitive!(NaiveDateTime, DateTime, "DateTime");
contract_primitive!(DateTime<FixedOffset>, DateTimeOffset, "DateTimeOffset");
contract_primitive!(TimeDelta, TimeSpan, "TimeSpan");
contract_primitive!(EntityValue, Entity, "Entity");

impl ContractValue for i32 {
    fn into_native(self) -> NativeValue {
        NativeValue::Int32(self)
    }

    // 枚举在本地以整数承载，允许直接读取为 i32。
    fn from_native(value: NativeValue) -> Result<Self> {
        match value {
            NativeValue::Int32(inner) | NativeValue::Enum(inner) => Ok(inner),
            other => mismatch("Int32", &other),
        }
    }
}

impl ContractValue for () {
    fn into_native(self) -> NativeValue {
        NativeValue::Null
    }

    fn from_native(_value: NativeValue) -> Result<Self> {
        Ok(())
    }
}

impl ContractValue for NativeValue {
    fn into_native(self) -> NativeValue {
        self
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        Ok(value)
    }
}

impl<T: ContractValue> ContractValue for Option<T> {
    fn into_native(self) -> NativeValue {
        self.map_or(NativeValue::Null, ContractValue::into_native)
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        match value {
            NativeValue::Null => Ok(None),
            other => T::from_native(other).map(Some),
        }
    }
}

impl<T: ContractValue> ContractValue for Vec<T> {
    fn into_native(self) -> NativeValue {
        NativeValue::Array(self.into_iter().map(ContractValue::into_native).collect())
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        match value {
            NativeValue::Array(items) => items.into_iter().map(T::from_native).collect(),
            other => mismatch("Array", &other),
        }
    }
}

impl ContractValue for &str {
    fn into_native(self) -> NativeValue {
        NativeValue::String(self.to_owned())
    }

    fn from_native(value: NativeValue) -> Result<Self> {
        mismatch("borrowed String", &value)
    }
}

/// 为本地 `#[repr(i32)]` 风格枚举实现 [`ContractValue`]。
///
/// ```ignore
/// contract_enum!(Gender { Male = 0, Female = 1 });
/// ```
#[macro_export]
macro_rules! contract_enum {
    ($ty:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $crate::value::ContractValue for $ty {
            fn into_native(self) -> $crate::value::NativeValue {
                $crate::value::NativeValue::Enum(match self {
                    $($ty::$variant => $value,)+
                })
            }

            fn from_native(value: $crate::value::NativeValue) -> $crate::error::Result<Self> {
                let raw = <i32 as $crate::value::ContractValue>::from_native(value)?;
                match raw {
                    $($value => Ok($ty::$variant),)+
                    other => Err($crate::error::ServiceError::serialization(format!(
                        "Unknown enum-value {other} on Enum {}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}
