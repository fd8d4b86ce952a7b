//! 按版本缓存的元数据集合。
//!
//! # 教案式说明
//! - **意图 (Why)**：每个版本的元数据只需构建一次，此后在进程生命周期内只读共享；
//! - **逻辑 (How)**：命中缓存直接返回；未命中时在锁外构建，再经 `DashMap::entry`
//!   写入。并发的首次请求可能各自构建一次，但只有先写入者被保留，其余结果被丢弃；
//! - **契约 (What)**：越界版本返回 [`ServiceError::Versioning`]，消息指明合法边界；
//!   构建器是声明与版本的纯函数，因此丢弃的重复结果与保留者等价。

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::builder::MetadataBuilder;
use crate::config::ContractSettings;
use crate::declaration::ContractDeclarations;
use crate::error::{Result, ServiceError};
use crate::model::Metadata;

/// 版本化元数据集合。
#[derive(Debug)]
pub struct MetadataCollection {
    declarations: Arc<ContractDeclarations>,
    settings: ContractSettings,
    cache: DashMap<u32, Arc<Metadata>>,
}

impl MetadataCollection {
    /// 以已校验的设置创建集合。
    pub fn new(declarations: ContractDeclarations, settings: ContractSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            declarations: Arc::new(declarations),
            settings,
            cache: DashMap::new(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.settings.prefix
    }

    pub fn min_version(&self) -> u32 {
        self.settings.min_version
    }

    pub fn max_version(&self) -> u32 {
        self.settings.max_version
    }

    pub fn settings(&self) -> &ContractSettings {
        &self.settings
    }

    pub fn declarations(&self) -> &ContractDeclarations {
        &self.declarations
    }

    /// 获取指定版本的元数据，首次访问时构建。
    pub fn get(&self, version: u32) -> Result<Arc<Metadata>> {
        if version < self.settings.min_version {
            return Err(ServiceError::versioning(format!(
                "Version {version} not supported anymore. Minimum version: {}",
                self.settings.min_version
            )));
        }
        if version > self.settings.max_version {
            return Err(ServiceError::versioning(format!(
                "Version {version} not yet supported. Maximum version: {}",
                self.settings.max_version
            )));
        }
        if let Some(cached) = self.cache.get(&version) {
            return Ok(Arc::clone(cached.value()));
        }

        let built = Arc::new(
            MetadataBuilder::new(
                &self.declarations,
                &self.settings.prefix,
                version,
                self.settings.min_version,
                self.settings.max_version,
            )
            .build()?,
        );
        let retained = self.cache.entry(version).or_insert(built);
        debug!(version, "契约元数据已缓存");
        Ok(Arc::clone(retained.value()))
    }

    /// 最新版本的元数据。
    pub fn latest(&self) -> Result<Arc<Metadata>> {
        self.get(self.settings.max_version)
    }

    /// 启动期预构建全部版本，任何构建错误立即返回。
    pub fn build_all(&self) -> Result<Vec<Arc<Metadata>>> {
        let built = self
            .settings
            .versions()
            .map(|version| self.get(version))
            .collect::<Result<Vec<_>>>()?;
        info!(
            min = self.settings.min_version,
            max = self.settings.max_version,
            "全部契约版本构建完成"
        );
        Ok(built)
    }
}
