//! 元数据构建：模块边界、隐藏类型、处理器形态、继承展开与线上文档。

mod support;

use spark_contract::{
    CommandDecl, CommandHandler, ContractDeclarations, EntityDecl, EnumDecl, Metadata, MetadataBuilder,
    MetadataCollection, ParamDecl, PropertyDecl, ResponseStrategy, ServiceDecl, ServiceError,
    TypeDecl,
};

fn build(declarations: &ContractDeclarations, version: u32) -> Result<Metadata, ServiceError> {
    MetadataBuilder::new(declarations, support::PREFIX, version, 1, 2).build()
}

fn noop(_invocation: spark_contract::Invocation) -> spark_contract::Result<()> {
    Ok(())
}

/// ## 测试一：引用外部模块的类型是构建错误
///
/// - 意图：契约只能暴露与服务同模块的类型，防止内部模型意外泄漏；
/// - 契约：错误消息点名越界类型。
#[test]
fn foreign_module_types_are_rejected() {
    let declarations = ContractDeclarations::new()
        .entity(EntityDecl::new("AuditRecord", "audit"))
        .service(
            ServiceDecl::new("IAuditService", support::MODULE).command(
                CommandDecl::sync_void("Record", noop)
                    .param(ParamDecl::new("record", TypeDecl::entity("AuditRecord"))),
            ),
        );

    let err = build(&declarations, 1).expect_err("外部模块类型应被拒绝");
    assert!(matches!(err, ServiceError::Build { .. }));
    assert_eq!(
        err.to_string(),
        "Type AuditRecord is not defined in the same module as the service(s)"
    );
}

/// ## 测试二：可见成员引用当前版本隐藏的实体
#[test]
fn hidden_entity_still_referred_to_is_rejected() {
    let declarations = ContractDeclarations::new()
        .entity(EntityDecl::new("Badge", support::MODULE).added(2))
        .service(
            ServiceDecl::new("IBadgeService", support::MODULE).command(
                CommandDecl::sync_void("Award", noop)
                    .param(ParamDecl::new("badge", TypeDecl::entity("Badge"))),
            ),
        );

    let err = build(&declarations, 1).expect_err("v1 不可见的实体被引用应失败");
    assert_eq!(
        err.to_string(),
        "Entity Badge not available to version 1, but still referred to"
    );
    assert!(build(&declarations, 2).is_ok(), "v2 中 Badge 可见，应构建成功");
}

/// ## 测试三：未登记的类型名与形态不符的处理器
#[test]
fn unknown_types_and_mismatched_handlers_fail_fast() {
    let unknown = ContractDeclarations::new().service(
        ServiceDecl::new("IGhostService", support::MODULE).command(
            CommandDecl::sync_void("Haunt", noop)
                .param(ParamDecl::new("ghost", TypeDecl::entity("Ghost"))),
        ),
    );
    assert_eq!(
        build(&unknown, 1).map(|_| ()).unwrap_err().to_string(),
        "Unknown type: Ghost"
    );

    let mismatched = ContractDeclarations::new().service(
        ServiceDecl::new("IEchoService", support::MODULE).command(CommandDecl::new(
            "Echo",
            TypeDecl::string(),
            CommandHandler::sync_void(noop),
        )),
    );
    let err = build(&mismatched, 1).expect_err("声明返回 String 却注册无返回处理器");
    assert!(matches!(err, ServiceError::Build { .. }));
}

/// ## 测试四：返回基类时纳入全部可见的具体子类
///
/// - 意图：多态响应需要客户端事先知道子类的形状；
/// - 契约：`Employee` 以 `Person` 为父类进入元数据，其属性只含自身声明的部分。
#[test]
fn derived_entities_are_expanded() {
    let collection = MetadataCollection::new(support::declarations(), support::settings())
        .expect("夹具设置应合法");
    let metadata = collection.get(2).expect("v2 应可构建");

    let employee = metadata.entities.get("Employee").expect("Employee 应被展开");
    assert_eq!(employee.parent.as_deref(), Some("Person"));
    let own: Vec<&str> = employee.properties.names().collect();
    assert_eq!(own, vec!["salary", "department"]);

    let person = metadata.entities.get("Person").expect("Person 应存在");
    let all: Vec<&str> = metadata
        .collect_properties(employee)
        .into_iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(all.len(), person.properties.len() + 2);
    assert_eq!(all.first(), Some(&"id"), "祖先属性排在前面");
}

/// ## 测试五：忽略属性、主键与长度限制
#[test]
fn property_flags_are_carried() {
    let collection = MetadataCollection::new(support::declarations(), support::settings())
        .expect("夹具设置应合法");
    let metadata = collection.get(2).expect("v2 应可构建");
    let user = metadata.entities.get("User").expect("User 应存在");

    assert!(!user.properties.contains("passwordHash"), "忽略属性不进入契约");
    let email = user.properties.get("email").expect("email 应存在");
    assert!(email.is_key && email.is_required);
    assert_eq!(email.max_length, Some(256));
    assert_eq!(email.type_info.max_length, Some(256));
}

/// ## 测试六：自引用实体可以构建
#[test]
fn self_referencing_entity_builds() {
    let declarations = ContractDeclarations::new()
        .entity(
            EntityDecl::new("Node", support::MODULE)
                .property(PropertyDecl::new("Label", TypeDecl::string()))
                .property(PropertyDecl::new(
                    "Children",
                    TypeDecl::array(TypeDecl::entity("Node")),
                )),
        )
        .service(
            ServiceDecl::new("ITreeService", support::MODULE).command(
                CommandDecl::sync_void("Plant", noop)
                    .param(ParamDecl::new("root", TypeDecl::entity("Node"))),
            ),
        );

    let metadata = build(&declarations, 1).expect("自引用不应导致无限递归");
    let children = metadata
        .entities
        .get("Node")
        .and_then(|node| node.properties.get("children"))
        .expect("children 应存在");
    assert!(children.type_info.is_array);
    assert_eq!(children.type_info.name, "Node");
}

/// ## 测试七：平台参数、取消参数与响应策略
#[test]
fn platform_and_cancellation_parameters() {
    let collection = MetadataCollection::new(support::declarations(), support::settings())
        .expect("夹具设置应合法");
    let metadata = collection.get(2).expect("v2 应可构建");

    let whoami = metadata
        .find_command("UserService", "whoami")
        .expect("whoami 应存在");
    assert!(whoami.is_http_raw);
    assert!(whoami.parameters[0].is_platform_specific);
    assert!(!whoami.parameters[0].is_public());
    assert!(!whoami.supports_cancellation());

    let count_down = metadata
        .find_command("UserService", "countDown")
        .expect("countDown 应存在");
    assert!(count_down.return_type.is_observable);
    assert!(count_down.supports_cancellation());
    assert_eq!(count_down.strategy(), Some(ResponseStrategy::Streaming));

    let get_users = metadata
        .find_command("UserService", "getUsers")
        .expect("getUsers 应存在");
    assert_eq!(get_users.strategy(), Some(ResponseStrategy::AsyncValue));
    assert!(get_users.return_type.is_array && !get_users.return_type.is_primitive);
}

/// ## 测试八：线上文档省略默认值，并可读回
///
/// - 意图：客户端以文档为准生成代理，文档必须稳定可往返；
/// - 逻辑：写出 → 读回 → 再写出，两次文档逐字段相等；
/// - 契约：平台参数与取消参数不进入文档；`false` 成员被省略。
#[test]
fn metadata_document_round_trips() {
    let collection = MetadataCollection::new(support::declarations(), support::settings())
        .expect("夹具设置应合法");
    let metadata = collection.get(2).expect("v2 应可构建");

    let document = metadata.to_json_value().expect("写出文档");
    assert_eq!(document["curVersion"], 2);
    assert_eq!(document["minVersion"], 1);
    assert_eq!(document["maxVersion"], 2);

    let services = document["services"].as_array().expect("services 为数组");
    let user_service = services
        .iter()
        .find(|service| service["name"] == "UserService")
        .expect("文档应包含 UserService");
    let whoami = user_service["commands"]
        .as_array()
        .and_then(|commands| commands.iter().find(|c| c["name"] == "whoami"))
        .expect("文档应包含 whoami");
    assert_eq!(whoami["parameters"].as_array().map(Vec::len), Some(0));
    assert_eq!(whoami["isHttpRaw"], true);
    assert!(whoami["returnType"].get("isArray").is_none(), "false 成员应省略");

    let text = metadata.to_json().expect("写出文本");
    let restored = Metadata::from_json(&text).expect("读回文档");
    assert_eq!(restored.to_json_value().ok(), Some(document));
    assert!(
        restored
            .procedures()
            .all(|command| command.handler.is_none()),
        "读回的命令不携带处理器"
    );
    let employee = restored.entity_by_native("Employee").expect("读回后按线上名索引");
    assert_eq!(employee.parent.as_deref(), Some("Person"));
}

/// ## 测试九：实体类型不是原始单值形态
///
/// - 意图：客户端据 `is_primitive` 决定按值还是按对象处理，实体必须落在对象一侧；
/// - 契约：实体返回值与实体属性为 `false`，枚举与原始类型保持 `true`，读回文档后不变。
#[test]
fn entity_types_are_not_primitive() {
    let declarations = ContractDeclarations::new()
        .enumeration(EnumDecl::new("Kind", support::MODULE).member("Leaf", 0))
        .entity(
            EntityDecl::new("Node", support::MODULE)
                .property(PropertyDecl::new("Label", TypeDecl::string()))
                .property(PropertyDecl::new("Kind", TypeDecl::enumeration("Kind")))
                .property(PropertyDecl::new(
                    "Parent",
                    TypeDecl::nullable(TypeDecl::entity("Node")),
                )),
        )
        .service(
            ServiceDecl::new("ITreeService", support::MODULE).command(
                CommandDecl::sync("Root", TypeDecl::entity("Node"), |_invocation| {
                    Ok(spark_contract::EntityValue::new("Node"))
                })
                .query(),
            ),
        );

    let metadata = build(&declarations, 1).expect("树契约应可构建");
    let check = |metadata: &Metadata| {
        let root = metadata
            .find_command("TreeService", "root")
            .expect("root 应存在");
        assert!(!root.return_type.is_primitive, "实体返回值不是原始形态");
        let node = metadata.entities.get("Node").expect("Node 应存在");
        let flag = |name: &str| {
            node.properties
                .get(name)
                .map(|property| property.type_info.is_primitive)
        };
        assert_eq!(flag("label"), Some(true));
        assert_eq!(flag("kind"), Some(true));
        assert_eq!(flag("parent"), Some(false));
    };
    check(&metadata);

    let text = metadata.to_json().expect("写出文本");
    check(&Metadata::from_json(&text).expect("读回文档"));
}

/// ## 测试十：继承成环是构建错误
///
/// - 意图：错误的父类声明不能让构建无限递归；
/// - 契约：返回 `Build` 错误并点名成环的实体。
#[test]
fn cyclic_parent_chain_is_rejected() {
    let declarations = ContractDeclarations::new()
        .entity(EntityDecl::new("Left", support::MODULE).extends("Right"))
        .entity(EntityDecl::new("Right", support::MODULE).extends("Left"))
        .service(
            ServiceDecl::new("ICycleService", support::MODULE).command(
                CommandDecl::sync_void("Accept", noop)
                    .param(ParamDecl::new("value", TypeDecl::entity("Left"))),
            ),
        );

    let err = build(&declarations, 1).expect_err("成环的继承链应被拒绝");
    assert!(matches!(err, ServiceError::Build { .. }));
    assert_eq!(err.to_string(), "Entity Left has a cyclic parent chain");

    // 父类属性回指子类不是环。
    let declarations = ContractDeclarations::new()
        .entity(
            EntityDecl::new("Staff", support::MODULE)
                .property(PropertyDecl::new("Boss", TypeDecl::nullable(TypeDecl::entity("Manager")))),
        )
        .entity(EntityDecl::new("Manager", support::MODULE).extends("Staff"))
        .service(
            ServiceDecl::new("IStaffService", support::MODULE).command(
                CommandDecl::sync_void("Promote", noop)
                    .param(ParamDecl::new("manager", TypeDecl::entity("Manager"))),
            ),
        );
    let metadata = build(&declarations, 1).expect("属性回指子类应可构建");
    let manager = metadata.entities.get("Manager").expect("Manager 应存在");
    assert_eq!(manager.parent.as_deref(), Some("Staff"));
}
