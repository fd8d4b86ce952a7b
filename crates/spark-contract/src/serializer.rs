//! 元数据驱动的 JSON 编解码。
//!
//! # 教案式说明
//! - **意图 (Why)**：线上 JSON 的形状完全由某一版本的元数据决定，同一本地值在不同版本
//!   可能以不同的属性名出现，因此编解码必须绑定一份 [`Metadata`]；
//! - **逻辑 (How)**：按 `数组 → 枚举 → 原始类型 → 实体` 的顺序识别类型名；实体的运行时类型
//!   与声明类型不同时写出 `$type` 判别字段，并输出整条继承链上的属性；
//! - **契约 (What)**：
//!   - `Decimal` 以字符串承载，读取时同时接受数字；
//!   - `DateTime` / `DateTimeOffset` / `TimeSpan` / `Guid` 以字符串承载，格式见 [`crate::text`]；
//!   - 可选属性等于零值时省略；缺失的必填属性一次性全部报告。

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::error::{Result, ServiceError};
use crate::handler::{Argument, Arguments, CancellationToken};
use crate::model::{Entity, Metadata, Parameter, PrimitiveType, Property, TypeInfo};
use crate::text;
use crate::value::{EntityValue, NativeValue};

/// 多态判别字段名。
pub const TYPE_DISCRIMINATOR: &str = "$type";

/// 绑定单一版本元数据的序列化器。
#[derive(Clone, Copy, Debug)]
pub struct Serializer<'m> {
    metadata: &'m Metadata,
}

impl<'m> Serializer<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &'m Metadata {
        self.metadata
    }

    /// 按 `type_info` 把本地值编码为 JSON。
    pub fn serialize(&self, value: &NativeValue, type_info: &TypeInfo) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if type_info.is_array {
            let NativeValue::Array(items) = value else {
                return Err(type_mismatch("Array", value));
            };
            let element = type_info.element();
            return items
                .iter()
                .map(|item| self.serialize(item, &element))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array);
        }
        if let Some(meta) = self.metadata.enums.get(&type_info.name) {
            return match value {
                NativeValue::Enum(raw) | NativeValue::Int32(raw) => Ok(Value::from(*raw)),
                other => Err(type_mismatch(&meta.name, other)),
            };
        }
        if let Some(primitive) = type_info.primitive() {
            return encode_primitive(primitive, value);
        }
        if let Some(entity) = self.metadata.entities.get(&type_info.name) {
            let NativeValue::Entity(instance) = value else {
                return Err(type_mismatch(&entity.name, value));
            };
            return self.serialize_entity(instance, entity);
        }
        Err(ServiceError::serialization(format!(
            "Unknown type: {}",
            type_info.name
        )))
    }

    fn serialize_entity(&self, instance: &EntityValue, declared: &Entity) -> Result<Value> {
        let runtime = self
            .metadata
            .entity_by_native(&instance.type_name)
            .ok_or_else(|| {
                ServiceError::serialization(format!(
                    "Type {} is not supported in this version ({})",
                    instance.type_name, self.metadata.cur_version
                ))
            })?;
        if !self.metadata.is_assignable(&declared.name, &runtime.name) {
            return Err(ServiceError::serialization(format!(
                "Type mismatch: {} is not a {}",
                runtime.name, declared.name
            )));
        }

        let mut object = Map::new();
        if !runtime.name.eq_ignore_ascii_case(&declared.name) {
            object.insert(
                TYPE_DISCRIMINATOR.to_owned(),
                Value::String(runtime.name.clone()),
            );
        }
        for property in self.metadata.collect_properties(runtime) {
            let field = instance
                .get(&property.native_name)
                .unwrap_or(&NativeValue::Null);
            if property.is_optional && is_default(field, property) {
                continue;
            }
            object.insert(
                property.name.clone(),
                self.serialize(field, &property.type_info)?,
            );
        }
        Ok(Value::Object(object))
    }

    /// 按 `type_info` 把 JSON 解码为本地值。
    pub fn deserialize(&self, token: &Value, type_info: &TypeInfo) -> Result<NativeValue> {
        if token.is_null() {
            return Ok(NativeValue::Null);
        }
        if type_info.is_array {
            let Value::Array(items) = token else {
                return Err(ServiceError::serialization("Array type expected"));
            };
            let element = type_info.element();
            return items
                .iter()
                .map(|item| self.deserialize(item, &element))
                .collect::<Result<Vec<_>>>()
                .map(NativeValue::Array);
        }
        if let Some(meta) = self.metadata.enums.get(&type_info.name) {
            let raw = token
                .as_i64()
                .and_then(|raw| i32::try_from(raw).ok())
                .ok_or_else(|| {
                    ServiceError::serialization(format!(
                        "Enum-values should be represented by their numeric value: {}",
                        meta.name
                    ))
                })?;
            if !meta.contains_value(raw) {
                return Err(ServiceError::serialization(format!(
                    "Unknown enum-value {raw} on Enum {}. Possible values are: {}",
                    meta.name,
                    meta.describe_values()
                )));
            }
            return Ok(NativeValue::Enum(raw));
        }
        if let Some(primitive) = type_info.primitive() {
            return decode_primitive(primitive, token);
        }
        if let Some(entity) = self.metadata.entities.get(&type_info.name) {
            return self.deserialize_entity(token, entity);
        }
        Err(ServiceError::serialization(format!(
            "Unknown type: {}",
            type_info.name
        )))
    }

    fn deserialize_entity(&self, token: &Value, declared: &Entity) -> Result<NativeValue> {
        let Value::Object(object) = token else {
            return Err(ServiceError::serialization("Object type expected"));
        };
        let entity = match object.get(TYPE_DISCRIMINATOR) {
            Some(Value::String(discriminator)) => {
                let derived = self.metadata.entities.get(discriminator).ok_or_else(|| {
                    ServiceError::serialization(format!("Unknown type: {discriminator}"))
                })?;
                if !self.metadata.is_assignable(&declared.name, &derived.name) {
                    return Err(ServiceError::serialization(format!(
                        "Type mismatch: {} is not a {}",
                        derived.name, declared.name
                    )));
                }
                derived
            }
            Some(_) => {
                return Err(ServiceError::serialization(format!(
                    "{TYPE_DISCRIMINATOR} must be a string"
                )));
            }
            None => declared,
        };

        let properties = self.metadata.collect_properties(entity);
        let mut instance = EntityValue::new(entity.native_name.clone());
        let mut assigned = HashSet::new();
        for (key, field) in object {
            if key == TYPE_DISCRIMINATOR {
                continue;
            }
            let Some(property) = properties
                .iter()
                .find(|property| property.name.eq_ignore_ascii_case(key))
            else {
                continue;
            };
            instance.set(
                property.native_name.clone(),
                self.deserialize(field, &property.type_info)?,
            );
            assigned.insert(property.name.as_str());
        }

        let missing: Vec<&str> = properties
            .iter()
            .filter(|property| property.is_required && !assigned.contains(property.name.as_str()))
            .map(|property| property.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::serialization(format!(
                "{} on {}",
                missing_message(&missing),
                entity.name
            )));
        }
        Ok(NativeValue::Entity(instance))
    }

    /// 依参数声明装配实参表。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 平台相关参数由 `platform` 回调提供；
    ///   - 取消能力参数获得本次调用的取消令牌；
    ///   - 其余参数通过 `lookup(名称, 位置)` 取得 JSON 片段后解码；缺失的必填参数一次性报告，
    ///     缺失的可选参数代入声明的缺省值。
    pub fn deserialize_arguments<'t, L, P>(
        &self,
        lookup: L,
        parameters: &[Parameter],
        cancellation: Option<&CancellationToken>,
        platform: P,
    ) -> Result<Arguments>
    where
        L: Fn(&str, usize) -> Option<&'t Value>,
        P: Fn(&Parameter) -> Result<Arc<dyn Any + Send + Sync>>,
    {
        let mut arguments = Arguments::new();
        let mut missing = Vec::new();
        for (index, parameter) in parameters.iter().enumerate() {
            let argument = if parameter.is_platform_specific {
                Argument::Platform(platform(parameter)?)
            } else if parameter.type_info.is_cancellation_token {
                Argument::Cancellation(cancellation.cloned().unwrap_or_default())
            } else {
                match lookup(&parameter.name, index) {
                    Some(token) => {
                        Argument::Value(Some(self.deserialize(token, &parameter.type_info)?))
                    }
                    None if parameter.is_optional => Argument::Value(parameter.default.clone()),
                    None => {
                        missing.push(parameter.name.as_str());
                        continue;
                    }
                }
            };
            arguments.push(parameter.name.clone(), argument);
        }
        if !missing.is_empty() {
            return Err(ServiceError::serialization(missing_message(&missing)));
        }
        Ok(arguments)
    }

    /// 以 JSON 对象的字段装配实参，字段名先精确匹配、再大小写不敏感匹配。
    pub fn deserialize_object_arguments<P>(
        &self,
        object: &Map<String, Value>,
        parameters: &[Parameter],
        cancellation: Option<&CancellationToken>,
        platform: P,
    ) -> Result<Arguments>
    where
        P: Fn(&Parameter) -> Result<Arc<dyn Any + Send + Sync>>,
    {
        let lookup = |name: &str, _index: usize| {
            object.get(name).or_else(|| {
                object
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
        };
        self.deserialize_arguments(lookup, parameters, cancellation, platform)
    }

    /// 以位置数组装配实参：数组按公开参数的顺序排列。
    pub fn deserialize_positional_arguments<P>(
        &self,
        tokens: &[Value],
        parameters: &[Parameter],
        cancellation: Option<&CancellationToken>,
        platform: P,
    ) -> Result<Arguments>
    where
        P: Fn(&Parameter) -> Result<Arc<dyn Any + Send + Sync>>,
    {
        let public: Vec<&str> = parameters
            .iter()
            .filter(|parameter| parameter.is_public())
            .map(|parameter| parameter.name.as_str())
            .collect();
        let lookup = |name: &str, _index: usize| {
            public
                .iter()
                .position(|candidate| *candidate == name)
                .and_then(|slot| tokens.get(slot))
        };
        self.deserialize_arguments(lookup, parameters, cancellation, platform)
    }
}

fn missing_message(missing: &[&str]) -> String {
    match missing {
        [single] => format!("Missing required property {single}"),
        many => format!("Missing required properties {}", many.join(", ")),
    }
}

fn type_mismatch(expected: &str, actual: &NativeValue) -> ServiceError {
    ServiceError::serialization(format!(
        "Type mismatch: expected {expected}, found {}",
        actual.kind()
    ))
}

// 可空与数组形态只有 Null 视为零值。
fn is_default(value: &NativeValue, property: &Property) -> bool {
    if property.type_info.is_nullable || property.type_info.is_array {
        value.is_null()
    } else {
        value.is_zero()
    }
}

fn float_value(value: f64, expected: &str) -> Result<Value> {
    Number::from_f64(value).map(Value::Number).ok_or_else(|| {
        ServiceError::serialization(format!("{expected} value {value} is not representable"))
    })
}

fn encode_primitive(primitive: PrimitiveType, value: &NativeValue) -> Result<Value> {
    let encoded = match (primitive, value) {
        (PrimitiveType::Void, _) => Value::Null,
        (PrimitiveType::Boolean, NativeValue::Bool(v)) => Value::Bool(*v),
        (PrimitiveType::Byte, NativeValue::Byte(v)) => Value::from(*v),
        (PrimitiveType::Int32, NativeValue::Int32(v)) => Value::from(*v),
        (PrimitiveType::Int64, NativeValue::Int64(v)) => Value::from(*v),
        (PrimitiveType::Single, NativeValue::Single(v)) => float_value(f64::from(*v), "Single")?,
        (PrimitiveType::Double, NativeValue::Double(v)) => float_value(*v, "Double")?,
        (PrimitiveType::Decimal, NativeValue::Decimal(v)) => Value::String(v.to_string()),
        (PrimitiveType::String, NativeValue::String(v)) => Value::String(v.clone()),
        (PrimitiveType::Guid, NativeValue::Guid(v)) => Value::String(v.hyphenated().to_string()),
        (PrimitiveType::DateTime, NativeValue::DateTime(v)) => {
            Value::String(text::format_datetime(v))
        }
        (PrimitiveType::DateTimeOffset, NativeValue::DateTimeOffset(v)) => {
            Value::String(text::format_datetime_offset(v))
        }
        (PrimitiveType::TimeSpan, NativeValue::TimeSpan(v)) => {
            Value::String(text::format_timespan(v)?)
        }
        (primitive, other) => return Err(type_mismatch(primitive.name(), other)),
    };
    Ok(encoded)
}

fn json_kind(token: &Value) -> &'static str {
    match token {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_primitive(primitive: PrimitiveType, token: &Value) -> Result<NativeValue> {
    let mismatch = || {
        ServiceError::serialization(format!(
            "Type mismatch: expected {primitive}, found {}",
            json_kind(token)
        ))
    };
    let out_of_range = || ServiceError::serialization(format!("Invalid {primitive} value: {token}"));
    match (primitive, token) {
        (PrimitiveType::Void, _) => Ok(NativeValue::Null),
        (PrimitiveType::Boolean, Value::Bool(v)) => Ok(NativeValue::Bool(*v)),
        (PrimitiveType::Byte, Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .map(NativeValue::Byte)
            .ok_or_else(out_of_range),
        (PrimitiveType::Int32, Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(NativeValue::Int32)
            .ok_or_else(out_of_range),
        (PrimitiveType::Int64, Value::Number(n)) => {
            n.as_i64().map(NativeValue::Int64).ok_or_else(out_of_range)
        }
        (PrimitiveType::Single, Value::Number(n)) => n
            .as_f64()
            .filter(|v| (f64::from(f32::MIN)..=f64::from(f32::MAX)).contains(v))
            .map(|v| NativeValue::Single(v as f32))
            .ok_or_else(out_of_range),
        (PrimitiveType::Double, Value::Number(n)) => {
            n.as_f64().map(NativeValue::Double).ok_or_else(out_of_range)
        }
        (PrimitiveType::Decimal, Value::Number(n)) => {
            text::parse_primitive(PrimitiveType::Decimal, &n.to_string())
        }
        // 字符串承载的原始值与查询串共用同一套文本解析。
        (primitive, Value::String(raw)) if primitive != PrimitiveType::Boolean => {
            text::parse_primitive(primitive, raw)
        }
        _ => Err(mismatch()),
    }
}
