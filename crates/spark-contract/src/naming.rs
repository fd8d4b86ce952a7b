//! 对外名称规则。
//!
//! - 显式指定的外部名称优先；
//! - 形如 `IUserService` 的服务名去掉前导 `I`；
//! - 异步命令名去掉 `Async` 后缀；
//! - 命令与属性名以 camelCase 对外。

/// 计算服务的默认对外名称。
pub fn service_name(native: &str) -> String {
    let mut chars = native.chars();
    match (chars.next(), chars.next()) {
        (Some('I'), Some(second)) if second.is_uppercase() => native[1..].to_owned(),
        _ => native.to_owned(),
    }
}

/// 计算命令的默认对外名称（未做 camelCase）。
pub fn command_name(native: &str, is_async: bool) -> String {
    match native.strip_suffix("Async") {
        Some(stripped) if is_async && !stripped.is_empty() => stripped.to_owned(),
        _ => native.to_owned(),
    }
}

/// 首字母小写。
pub fn camel_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
