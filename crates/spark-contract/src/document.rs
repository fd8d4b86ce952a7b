//! 元数据的线上 JSON 文档。
//!
//! # 教案式说明
//! - **意图 (Why)**：客户端与工具链通过 `GET /metadata` 获取契约；同一文档也可被读回为
//!   不携带处理器的 [`Metadata`]，用于客户端侧编解码；
//! - **契约 (What)**：
//!   - 各名称映射以数组形式写出，保持声明顺序；
//!   - 值为默认（`false`、`0`、`null`）的成员在写出时省略，读回时以默认值填充；
//!   - 平台相关参数与取消能力参数不进入文档。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    CANCELLATION_TYPE_NAME, Command, Entity, EnumMeta, EnumValue, Metadata, NameMap, Parameter,
    Property, Service, TRANSPORT_TYPE_NAME, TypeInfo,
};

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeDocument {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_array: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    is_nullable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    is_observable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnumValueDocument {
    name: String,
    #[serde(default)]
    value: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnumDocument {
    name: String,
    #[serde(default)]
    values: Vec<EnumValueDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDocument {
    name: String,
    #[serde(rename = "type")]
    type_info: TypeDocument,
    #[serde(default, skip_serializing_if = "is_false")]
    is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_key: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    is_optional: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntityDocument {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParameterDocument {
    name: String,
    #[serde(rename = "type")]
    type_info: TypeDocument,
    #[serde(default, skip_serializing_if = "is_false")]
    is_optional: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandDocument {
    name: String,
    fullname: String,
    #[serde(default)]
    parameters: Vec<ParameterDocument>,
    #[serde(default)]
    return_type: TypeDocument,
    #[serde(default, skip_serializing_if = "is_false")]
    is_query: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    is_http_raw: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceDocument {
    name: String,
    #[serde(default)]
    commands: Vec<CommandDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    #[serde(default, skip_serializing_if = "is_zero")]
    cur_version: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    min_version: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    max_version: u32,
    #[serde(default)]
    enums: Vec<EnumDocument>,
    #[serde(default)]
    entities: Vec<EntityDocument>,
    #[serde(default)]
    services: Vec<ServiceDocument>,
}

impl From<&TypeInfo> for TypeDocument {
    fn from(info: &TypeInfo) -> Self {
        Self {
            name: info.name.clone(),
            max_length: info.max_length,
            is_array: info.is_array,
            is_nullable: info.is_nullable,
            is_observable: info.is_observable,
        }
    }
}

impl From<TypeDocument> for TypeInfo {
    fn from(doc: TypeDocument) -> Self {
        Self {
            is_primitive: !doc.is_array && !doc.is_observable,
            is_cancellation_token: doc.name == CANCELLATION_TYPE_NAME,
            is_transport: doc.name == TRANSPORT_TYPE_NAME,
            name: doc.name,
            is_array: doc.is_array,
            is_nullable: doc.is_nullable,
            is_observable: doc.is_observable,
            max_length: doc.max_length,
        }
    }
}

impl Metadata {
    fn to_document(&self) -> MetadataDocument {
        MetadataDocument {
            cur_version: self.cur_version,
            min_version: self.min_version,
            max_version: self.max_version,
            enums: self
                .enums
                .values()
                .map(|meta| EnumDocument {
                    name: meta.name.clone(),
                    values: meta
                        .values
                        .values()
                        .map(|value| EnumValueDocument {
                            name: value.name.clone(),
                            value: value.value,
                        })
                        .collect(),
                })
                .collect(),
            entities: self
                .entities
                .values()
                .map(|entity| EntityDocument {
                    name: entity.name.clone(),
                    parent: entity.parent.clone(),
                    properties: entity
                        .properties
                        .values()
                        .map(|property| PropertyDocument {
                            name: property.name.clone(),
                            type_info: TypeDocument::from(&property.type_info),
                            is_required: property.is_required,
                            max_length: property.max_length,
                            is_key: property.is_key,
                            is_optional: property.is_optional,
                        })
                        .collect(),
                })
                .collect(),
            services: self
                .services
                .values()
                .map(|service| ServiceDocument {
                    name: service.name.clone(),
                    commands: service.commands.values().map(command_document).collect(),
                })
                .collect(),
        }
    }

    /// 写出线上 JSON 文档。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// 以 [`serde_json::Value`] 形式写出文档。
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.to_document())?)
    }

    /// 读回线上 JSON 文档；读回的命令不携带处理器，实体的本地名与线上名相同。
    pub fn from_json(json: &str) -> Result<Metadata> {
        let document: MetadataDocument = serde_json::from_str(json)?;
        let mut metadata = Metadata::new(
            document.cur_version,
            document.min_version,
            document.max_version,
        );
        let entity_names: HashSet<String> = document
            .entities
            .iter()
            .map(|entity| entity.name.to_lowercase())
            .collect();
        let type_info = |doc: TypeDocument| {
            let mut info = TypeInfo::from(doc);
            if entity_names.contains(&info.name.to_lowercase()) {
                info.is_primitive = false;
            }
            info
        };
        for doc in document.enums {
            let values = doc
                .values
                .into_iter()
                .map(|value| {
                    (
                        value.name.clone(),
                        EnumValue {
                            name: value.name,
                            value: value.value,
                        },
                    )
                })
                .collect::<NameMap<_>>();
            metadata.enums.insert(
                doc.name.clone(),
                EnumMeta {
                    name: doc.name,
                    values,
                },
            );
        }
        for doc in document.entities {
            let properties = doc
                .properties
                .into_iter()
                .map(|property| {
                    (
                        property.name.clone(),
                        Property {
                            native_name: property.name.clone(),
                            name: property.name,
                            type_info: type_info(property.type_info),
                            is_required: property.is_required,
                            is_optional: property.is_optional,
                            max_length: property.max_length,
                            is_key: property.is_key,
                        },
                    )
                })
                .collect::<NameMap<_>>();
            metadata.insert_entity(Entity {
                native_name: doc.name.clone(),
                name: doc.name,
                parent: doc.parent,
                properties,
            });
        }
        for doc in document.services {
            let service_name = doc.name;
            let commands = doc
                .commands
                .into_iter()
                .map(|command| {
                    (
                        command.name.clone(),
                        Command {
                            name: command.name,
                            fullname: command.fullname,
                            service: service_name.clone(),
                            service_native: service_name.clone(),
                            parameters: command
                                .parameters
                                .into_iter()
                                .map(|parameter| Parameter {
                                    name: parameter.name,
                                    type_info: type_info(parameter.type_info),
                                    is_optional: parameter.is_optional,
                                    is_platform_specific: false,
                                    default: None,
                                })
                                .collect(),
                            return_type: type_info(command.return_type),
                            is_query: command.is_query,
                            is_http_raw: command.is_http_raw,
                            handler: None,
                        },
                    )
                })
                .collect::<NameMap<_>>();
            metadata.services.insert(
                service_name.clone(),
                Service {
                    native_name: service_name.clone(),
                    name: service_name,
                    commands,
                },
            );
        }
        Ok(metadata)
    }
}

fn command_document(command: &Command) -> CommandDocument {
    CommandDocument {
        name: command.name.clone(),
        fullname: command.fullname.clone(),
        parameters: command
            .parameters
            .iter()
            .filter(|parameter| parameter.is_public())
            .map(|parameter| ParameterDocument {
                name: parameter.name.clone(),
                type_info: TypeDocument::from(&parameter.type_info),
                is_optional: parameter.is_optional,
            })
            .collect(),
        return_type: TypeDocument::from(&command.return_type),
        is_query: command.is_query,
        is_http_raw: command.is_http_raw,
    }
}
