//! 单版本元数据构建器。
//!
//! # 教案式说明
//! - **意图 (Why)**：把声明表一次性折算为某个版本的契约图，此后调度与编解码只读该图；
//! - **逻辑 (How)**：
//!   1. 汇总服务声明所在的模块集合，引用集合之外的实体或枚举即为构建错误；
//!   2. 逐个服务、命令求值版本注解，不可见者跳过；
//!   3. 参数与返回类型依次剥离流、异步、数组、可空包装，再把基础类型归类为取消能力、
//!      传输上下文、原始类型、枚举或实体；
//!   4. 实体先构建父类，再登记自身，最后纳入当前版本可见的全部具体子类；
//! - **契约 (What)**：被可见成员引用、却在当前版本隐藏的实体或枚举会导致构建失败；
//!   构建结果对同一输入确定、可重复。

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::declaration::{
    CommandDecl, ContractDeclarations, EntityDecl, ServiceDecl, TypeDecl, TypeRegistry,
};
use crate::error::{Result, ServiceError};
use crate::handler::ResponseStrategy;
use crate::model::{
    CANCELLATION_TYPE_NAME, Command, Entity, EnumMeta, EnumValue, Metadata, NameMap, Parameter,
    PrimitiveType, Property, Service, TRANSPORT_TYPE_NAME, TypeInfo,
};
use crate::naming;
use crate::versioning::resolve;

/// 针对单一版本的构建器。
pub struct MetadataBuilder<'a> {
    declarations: &'a ContractDeclarations,
    prefix: &'a str,
    modules: HashSet<&'a str>,
    metadata: Metadata,
    // 本地实体名到线上实体名；进入构建即占位，用于终止自引用递归。
    entity_names: HashMap<String, String>,
    enum_names: HashMap<String, String>,
}

impl<'a> MetadataBuilder<'a> {
    pub fn new(
        declarations: &'a ContractDeclarations,
        prefix: &'a str,
        version: u32,
        min_version: u32,
        max_version: u32,
    ) -> Self {
        let modules = declarations
            .services()
            .iter()
            .map(|service| service.module.as_str())
            .collect();
        Self {
            declarations,
            prefix,
            modules,
            metadata: Metadata::new(version, min_version, max_version),
            entity_names: HashMap::new(),
            enum_names: HashMap::new(),
        }
    }

    fn version(&self) -> u32 {
        self.metadata.cur_version
    }

    fn types(&self) -> &'a TypeRegistry {
        self.declarations.types()
    }

    /// 构建完整元数据。
    pub fn build(mut self) -> Result<Metadata> {
        let declarations = self.declarations;
        for service in declarations.services() {
            if let Some(built) = self.build_service(service)? {
                self.metadata.services.insert(built.name.clone(), built);
            }
        }
        debug!(
            version = self.version(),
            services = self.metadata.services.len(),
            entities = self.metadata.entities.len(),
            enums = self.metadata.enums.len(),
            "契约元数据构建完成"
        );
        Ok(self.metadata)
    }

    fn build_service(&mut self, decl: &'a ServiceDecl) -> Result<Option<Service>> {
        let base = decl
            .external_name
            .clone()
            .unwrap_or_else(|| naming::service_name(&decl.name));
        let resolution = resolve(&decl.annotations, self.version(), &base);
        if !resolution.visible {
            return Ok(None);
        }
        let service_name = resolution.name;
        let fullname_prefix = format!("{}.v{}.{}.", self.prefix, self.version(), service_name)
            .to_lowercase();

        let mut commands = NameMap::new();
        for command in &decl.commands {
            let built = self.build_command(decl, &service_name, &fullname_prefix, command)?;
            if let Some(built) = built {
                commands.insert(built.name.clone(), built);
            }
        }
        Ok(Some(Service {
            name: service_name,
            native_name: decl.name.clone(),
            commands,
        }))
    }

    fn build_command(
        &mut self,
        service: &ServiceDecl,
        service_name: &str,
        fullname_prefix: &str,
        decl: &CommandDecl,
    ) -> Result<Option<Command>> {
        let base = decl
            .external_name
            .clone()
            .unwrap_or_else(|| naming::command_name(&decl.name, decl.returns.is_future()));
        let resolution = resolve(&decl.annotations, self.version(), &base);
        if !resolution.visible {
            return Ok(None);
        }
        check_handler_shape(&service.name, decl)?;

        let mut parameters = Vec::with_capacity(decl.params.len());
        let mut is_http_raw = false;
        for param in &decl.params {
            let type_info = self.convert_type(&param.ty)?;
            let is_platform_specific = type_info.is_transport;
            is_http_raw |= is_platform_specific;
            parameters.push(Parameter {
                name: param.name.clone(),
                type_info,
                is_optional: param.optional,
                is_platform_specific,
                default: param.default.clone(),
            });
        }

        Ok(Some(Command {
            name: naming::camel_case(&resolution.name),
            fullname: format!("{fullname_prefix}{}", resolution.name.to_lowercase()),
            service: service_name.to_owned(),
            service_native: service.name.clone(),
            parameters,
            return_type: self.convert_type(&decl.returns)?,
            is_query: decl.is_query,
            is_http_raw,
            handler: Some(decl.handler.clone()),
        }))
    }

    /// 把声明类型折算为 [`TypeInfo`]，必要时递归构建枚举与实体。
    fn convert_type(&mut self, decl: &TypeDecl) -> Result<TypeInfo> {
        let mut info = TypeInfo::default();
        let mut current = decl;
        if let TypeDecl::Stream(inner) = current {
            info.is_observable = true;
            current = &**inner;
        }
        if let TypeDecl::Future(inner) = current {
            current = &**inner;
        }
        if let TypeDecl::Array(inner) = current {
            info.is_array = true;
            current = &**inner;
        }
        if let TypeDecl::Nullable(inner) = current {
            info.is_nullable = true;
            current = &**inner;
        }
        info.is_primitive = !info.is_array && !info.is_observable;

        info.name = match current {
            TypeDecl::Void => PrimitiveType::Void.name().to_owned(),
            TypeDecl::Primitive(primitive) => primitive.name().to_owned(),
            TypeDecl::Cancellation => {
                info.is_cancellation_token = true;
                CANCELLATION_TYPE_NAME.to_owned()
            }
            TypeDecl::Transport => {
                info.is_transport = true;
                TRANSPORT_TYPE_NAME.to_owned()
            }
            TypeDecl::Enum(name) => self.enum_name(name)?,
            TypeDecl::Entity(name) => {
                info.is_primitive = false;
                self.entity_name(name)?
            }
            nested => {
                return Err(ServiceError::build(format!(
                    "Unsupported type nesting: {nested:?}"
                )));
            }
        };
        Ok(info)
    }

    fn check_module(&self, kind: &str, name: &str, module: &str) -> Result<()> {
        if self.modules.contains(module) {
            Ok(())
        } else {
            Err(ServiceError::build(format!(
                "{kind} {name} is not defined in the same module as the service(s)"
            )))
        }
    }

    fn enum_name(&mut self, native: &str) -> Result<String> {
        if let Some(name) = self.enum_names.get(native) {
            return Ok(name.clone());
        }
        let decl = self
            .types()
            .enumeration(native)
            .ok_or_else(|| ServiceError::build(format!("Unknown type: {native}")))?;
        self.check_module("Type", native, &decl.module)?;

        let base = decl.external_name.clone().unwrap_or_else(|| decl.name.clone());
        let resolution = resolve(&decl.annotations, self.version(), &base);
        if !resolution.visible {
            return Err(ServiceError::build(format!(
                "Enum {} not available to version {}, but still referred to",
                resolution.name,
                self.version()
            )));
        }

        let mut values = NameMap::new();
        for value in &decl.values {
            let base = value.external_name.clone().unwrap_or_else(|| value.name.clone());
            let member = resolve(&value.annotations, self.version(), &base);
            if member.visible {
                values.insert(
                    member.name.clone(),
                    EnumValue {
                        name: member.name,
                        value: value.value,
                    },
                );
            }
        }
        self.enum_names
            .insert(native.to_owned(), resolution.name.clone());
        self.metadata.enums.insert(
            resolution.name.clone(),
            EnumMeta {
                name: resolution.name.clone(),
                values,
            },
        );
        Ok(resolution.name)
    }

    fn entity_name(&mut self, native: &str) -> Result<String> {
        if let Some(name) = self.entity_names.get(native) {
            return Ok(name.clone());
        }
        let decl = self
            .types()
            .entity(native)
            .ok_or_else(|| ServiceError::build(format!("Unknown type: {native}")))?;
        self.check_module("Type", native, &decl.module)?;
        self.create_entity(decl)
    }

    /// 沿声明的父类链前进，重复出现即为继承成环。
    ///
    /// 属性回指子类属于正常的重入，只有父链本身需要检查。
    fn check_parent_chain(&self, decl: &EntityDecl) -> Result<()> {
        let types = self.types();
        let mut seen = HashSet::new();
        let mut cursor = Some(decl);
        while let Some(current) = cursor {
            if !seen.insert(current.name.as_str()) {
                return Err(ServiceError::build(format!(
                    "Entity {} has a cyclic parent chain",
                    decl.name
                )));
            }
            cursor = current.parent.as_deref().and_then(|parent| types.entity(parent));
        }
        Ok(())
    }

    fn create_entity(&mut self, decl: &'a EntityDecl) -> Result<String> {
        let base = decl.external_name.clone().unwrap_or_else(|| decl.name.clone());
        let resolution = resolve(&decl.annotations, self.version(), &base);
        if !resolution.visible {
            return Err(ServiceError::build(format!(
                "Entity {} not available to version {}, but still referred to",
                resolution.name,
                self.version()
            )));
        }

        let parent = match &decl.parent {
            Some(parent) => {
                self.check_parent_chain(decl)?;
                let parent_name = self.entity_name(parent)?;
                // 父类展开子类时可能已经构建了当前实体。
                if let Some(existing) = self.entity_names.get(&decl.name) {
                    return Ok(existing.clone());
                }
                Some(parent_name)
            }
            None => None,
        };

        let name = resolution.name;
        self.entity_names.insert(decl.name.clone(), name.clone());

        let mut properties = NameMap::new();
        for property in decl.properties.iter().filter(|p| !p.ignored) {
            let base = property
                .external_name
                .clone()
                .unwrap_or_else(|| property.name.clone());
            let resolved = resolve(&property.annotations, self.version(), &base);
            if !resolved.visible {
                continue;
            }
            let mut type_info = self.convert_type(&property.ty)?;
            type_info.max_length = property.max_length;
            let property_name = naming::camel_case(&resolved.name);
            properties.insert(
                property_name.clone(),
                Property {
                    name: property_name,
                    native_name: property.name.clone(),
                    type_info,
                    is_required: property.required,
                    is_optional: property.optional,
                    max_length: property.max_length,
                    is_key: property.key,
                },
            );
        }

        self.metadata.insert_entity(Entity {
            name: name.clone(),
            native_name: decl.name.clone(),
            parent,
            properties,
        });

        let types = self.types();
        for derived in types.entities() {
            if derived.name == decl.name
                || derived.is_abstract
                || self.entity_names.contains_key(&derived.name)
                || !self.modules.contains(derived.module.as_str())
                || !types.derives_from(&derived.name, &decl.name)
            {
                continue;
            }
            let derived_base = derived
                .external_name
                .clone()
                .unwrap_or_else(|| derived.name.clone());
            if resolve(&derived.annotations, self.version(), &derived_base).visible {
                self.entity_name(&derived.name)?;
            }
        }

        Ok(name)
    }
}

/// 校验处理器形态与声明的返回包装一致。
fn check_handler_shape(service: &str, decl: &CommandDecl) -> Result<()> {
    let strategy = decl.handler.strategy();
    let consistent = match &decl.returns {
        TypeDecl::Stream(_) => strategy == ResponseStrategy::Streaming,
        TypeDecl::Future(inner) if **inner == TypeDecl::Void => {
            strategy == ResponseStrategy::AsyncVoid
        }
        TypeDecl::Future(_) => strategy == ResponseStrategy::AsyncValue,
        TypeDecl::Void => strategy == ResponseStrategy::SyncVoid,
        _ => strategy == ResponseStrategy::SyncValue,
    };
    if consistent {
        Ok(())
    } else {
        Err(ServiceError::build(format!(
            "Handler of {service}.{} is {strategy:?}, which does not match its return type",
            decl.name
        )))
    }
}
