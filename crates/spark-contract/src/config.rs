//! 契约层配置：流程名前缀与受支持的版本区间。

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// 契约设置。
///
/// # 教案式说明
/// - **契约 (What)**：`prefix` 参与拼装 `{prefix}.v{version}.{service}.{command}`；
///   `[min_version, max_version]` 为同时支持的版本闭区间，版本号从 1 开始。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractSettings {
    pub prefix: String,
    #[serde(default = "default_version")]
    pub min_version: u32,
    #[serde(default = "default_version")]
    pub max_version: u32,
}

fn default_version() -> u32 {
    1
}

impl ContractSettings {
    pub fn new(prefix: impl Into<String>, min_version: u32, max_version: u32) -> Self {
        Self {
            prefix: prefix.into(),
            min_version,
            max_version,
        }
    }

    /// 校验前缀非空且版本区间合法。
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(ServiceError::build("contract prefix must not be empty"));
        }
        if self.min_version == 0 {
            return Err(ServiceError::build("min_version must be at least 1"));
        }
        if self.min_version > self.max_version {
            return Err(ServiceError::build(format!(
                "min_version {} exceeds max_version {}",
                self.min_version, self.max_version
            )));
        }
        Ok(())
    }

    /// 区间内的全部版本，升序。
    pub fn versions(&self) -> impl Iterator<Item = u32> {
        self.min_version..=self.max_version
    }
}
