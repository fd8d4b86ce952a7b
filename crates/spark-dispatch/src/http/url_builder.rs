//! 查询命令的 URL 构建器。
//!
//! # 教案式说明
//! - **意图 (Why)**：客户端调用 `GET` 查询命令时需要把原始值格式化为查询串，
//!   格式必须与命令中间件的解析器严格对应；
//! - **契约 (What)**：
//!   - 首个参数以 `?` 开头，后续以 `&` 连接；
//!   - 值采用与区域无关的格式（日期 `yyyy-MM-ddTHH:mm:ss`、时长 `[-][d.]hh:mm:ss[.fffffff]`、
//!     枚举取整数），并统一做表单编码；
//!   - 空值只写出 `key=`；数组与实体不能进入查询串。

use spark_contract::{ContractValue, NativeValue, ServiceError, text};
use url::Url;
use url::form_urlencoded::byte_serialize;

#[derive(Clone, Debug)]
pub struct UrlBuilder {
    base: Url,
    path: String,
    query: String,
}

impl UrlBuilder {
    pub fn new(base: Url, path: impl Into<String>) -> Self {
        Self {
            base,
            path: path.into(),
            query: String::new(),
        }
    }

    /// 追加一个强类型参数。
    pub fn push<T: ContractValue>(&mut self, key: &str, value: T) -> Result<&mut Self, ServiceError> {
        self.push_native(key, &value.into_native())
    }

    /// 追加一个已转换为本地值的参数。
    pub fn push_native(&mut self, key: &str, value: &NativeValue) -> Result<&mut Self, ServiceError> {
        let formatted = text::format_primitive(value).ok_or_else(|| {
            ServiceError::serialization(format!("Argument is not a primitive type: {key}"))
        })?;
        self.query.push(if self.query.is_empty() { '?' } else { '&' });
        self.query.extend(byte_serialize(key.as_bytes()));
        self.query.push('=');
        self.query.extend(byte_serialize(formatted.as_bytes()));
        Ok(self)
    }

    /// 已拼好的查询串，含前导 `?`；没有参数时为空串。
    pub fn query(&self) -> &str {
        &self.query
    }

    /// 以基地址解析 `path + query`。
    pub fn build(&self) -> Result<Url, url::ParseError> {
        self.base.join(&format!("{}{}", self.path, self.query))
    }
}
