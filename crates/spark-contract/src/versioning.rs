//! 版本注解求值。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一份声明需要同时服务多个契约版本，成员在某版本是否可见、以何名称
//!   出现，全部由挂在声明上的版本注解决定；
//! - **逻辑 (How)**：注解按版本升序（同版本保持声明顺序）遍历：
//!   1. 可见性初始未定；遇到的第一条 `Added` 将其初始化为不可见，`Removed` 初始化为可见；
//!   2. 版本 `<= V` 的 `Added` 置可见、`Removed` 置不可见，同版本冲突时以最后一条为准；
//!   3. 版本 `> V` 的首条 `Renamed` 决定对外名称，使旧版本看到改名前的标识；
//!   4. 全程未被设置时视为可见；
//! - **契约 (What)**：`TypeChanged` 仅作记录，不影响可见性与名称。

/// 单条版本变更的种类。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionChange {
    Added,
    Removed,
    Renamed { old_name: String },
    TypeChanged { old_type: String },
}

/// 挂在声明上的版本注解。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionAnnotation {
    pub version: u32,
    pub change: VersionChange,
}

impl VersionAnnotation {
    pub fn added(version: u32) -> Self {
        Self {
            version,
            change: VersionChange::Added,
        }
    }

    pub fn removed(version: u32) -> Self {
        Self {
            version,
            change: VersionChange::Removed,
        }
    }

    pub fn renamed(version: u32, old_name: impl Into<String>) -> Self {
        Self {
            version,
            change: VersionChange::Renamed {
                old_name: old_name.into(),
            },
        }
    }

    pub fn type_changed(version: u32, old_type: impl Into<String>) -> Self {
        Self {
            version,
            change: VersionChange::TypeChanged {
                old_type: old_type.into(),
            },
        }
    }
}

/// 求值结果：是否可见以及对外名称。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub visible: bool,
    pub name: String,
}

/// 在版本 `version` 下求值 `annotations`。
pub fn resolve(annotations: &[VersionAnnotation], version: u32, name: &str) -> Resolution {
    let mut ordered: Vec<&VersionAnnotation> = annotations.iter().collect();
    // `sort_by_key` 为稳定排序，同版本注解保持声明顺序。
    ordered.sort_by_key(|annotation| annotation.version);

    let mut visible: Option<bool> = None;
    let mut surfaced: Option<&str> = None;
    for annotation in ordered {
        if visible.is_none() {
            match annotation.change {
                VersionChange::Added => visible = Some(false),
                VersionChange::Removed => visible = Some(true),
                _ => {}
            }
        }
        if annotation.version <= version {
            match annotation.change {
                VersionChange::Added => visible = Some(true),
                VersionChange::Removed => visible = Some(false),
                _ => {}
            }
        } else if let VersionChange::Renamed { old_name } = &annotation.change {
            surfaced.get_or_insert(old_name.as_str());
        }
    }

    Resolution {
        visible: visible.unwrap_or(true),
        name: surfaced.unwrap_or(name).to_owned(),
    }
}
