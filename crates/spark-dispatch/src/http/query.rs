//! 扁平 `key=value` 参数的解析与装配。
//!
//! # 教案式说明
//! - **意图 (Why)**：`GET` 查询串与表单编码的 `POST` 只能承载原始值与枚举，
//!   因此绕开 JSON 序列化器，为每种原始类型使用专门的文本解析器；
//! - **契约 (What)**：
//!   - 以 `&` 分段，每段在第一个 `=` 处切分；没有 `=` 的键取值为空，空串同样视为空值；
//!   - 键与值均按表单编码解码（`+` 视为空格）；
//!   - 枚举只接受整数形式；数组与实体参数不能经由查询串传递；
//!   - 必填参数缺失时与 JSON 路径使用相同的措辞。

use std::any::Any;
use std::sync::Arc;

use axum::http::StatusCode;
use spark_contract::{
    Argument, Arguments, CancellationToken, Metadata, NativeValue, Parameter, ServiceError, text,
};

/// 解析后的单个键值对；`None` 表示该键没有取值。
pub type QueryPair = (String, Option<String>);

/// 把 `a=1&b&c=x%20y` 形式的文本拆为键值对。
pub fn parse_pairs(raw: &str) -> Vec<QueryPair> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let has_value = segment.contains('=');
            url::form_urlencoded::parse(segment.as_bytes())
                .next()
                .map(|(key, value)| {
                    let value = (has_value && !value.is_empty()).then(|| value.into_owned());
                    (key.into_owned(), value)
                })
        })
        .collect()
}

/// 依参数声明把键值对装配为实参表。
pub fn arguments_from_pairs<P>(
    metadata: &Metadata,
    pairs: &[QueryPair],
    parameters: &[Parameter],
    cancellation: &CancellationToken,
    platform: P,
) -> Result<Arguments, ServiceError>
where
    P: Fn(&Parameter) -> Result<Arc<dyn Any + Send + Sync>, ServiceError>,
{
    let mut arguments = Arguments::new();
    let mut missing = Vec::new();
    for parameter in parameters {
        let argument = if parameter.is_platform_specific {
            Argument::Platform(platform(parameter)?)
        } else if parameter.type_info.is_cancellation_token {
            Argument::Cancellation(cancellation.clone())
        } else {
            match find(pairs, &parameter.name) {
                Some(Some(text)) => Argument::Value(Some(parse_value(metadata, parameter, text)?)),
                Some(None) => Argument::Value(Some(NativeValue::Null)),
                None if parameter.is_optional => Argument::Value(parameter.default.clone()),
                None => {
                    missing.push(parameter.name.as_str());
                    continue;
                }
            }
        };
        arguments.push(parameter.name.clone(), argument);
    }
    match missing.as_slice() {
        [] => Ok(arguments),
        [single] => Err(ServiceError::serialization(format!(
            "Missing required property {single}"
        ))),
        many => Err(ServiceError::serialization(format!(
            "Missing required properties {}",
            many.join(", ")
        ))),
    }
}

fn find<'p>(pairs: &'p [QueryPair], name: &str) -> Option<Option<&'p str>> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .or_else(|| pairs.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)))
        .map(|(_, value)| value.as_deref())
}

fn parse_value(
    metadata: &Metadata,
    parameter: &Parameter,
    text: &str,
) -> Result<NativeValue, ServiceError> {
    let type_info = &parameter.type_info;
    if type_info.is_array {
        return Err(not_primitive(parameter));
    }
    if let Some(enumeration) = metadata.enums.get(&type_info.name) {
        let value = text.trim().parse::<i32>().map_err(|_| {
            ServiceError::service(
                StatusCode::BAD_REQUEST,
                format!(
                    "Enum-arguments should be represented by their numeric value: {}",
                    parameter.name
                ),
            )
        })?;
        if !enumeration.contains_value(value) {
            return Err(ServiceError::serialization(format!(
                "Unknown enum-value {value} on Enum {}. Possible values are: {}",
                enumeration.name,
                enumeration.describe_values()
            )));
        }
        return Ok(NativeValue::Enum(value));
    }
    match type_info.primitive() {
        Some(primitive) => text::parse_primitive(primitive, text),
        None => Err(not_primitive(parameter)),
    }
}

fn not_primitive(parameter: &Parameter) -> ServiceError {
    ServiceError::service(
        StatusCode::BAD_REQUEST,
        format!("Argument is not a primitive type: {}", parameter.name),
    )
}
