//! 消息目录
//!
//! 启动时构建的消息种类注册表。构建完成后放入 `Arc`，之后只读，
//! 跨线程读取不需要加锁。两端必须拥有完全相同的目录。

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::value::{Schema, TypeTag};
use crate::core::error::{CatalogError, CatalogResult};

/// 分发类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// 发出即忘
    Notification,
    /// 请求/响应
    Query,
    /// 可记录、可撤销的状态变更
    Command,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Notification => "Notification",
            Category::Query => "Query",
            Category::Command => "Command",
        };
        f.write_str(name)
    }
}

/// 合并策略（仅命令）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    None,
    MergeableWithPrevious,
}

/// 消息种类描述
#[derive(Debug, Clone, PartialEq)]
pub struct MessageKind {
    pub type_id: u32,
    pub name: String,
    pub category: Category,
    /// 输入字段布局
    pub schema: Schema,
    /// 查询结果布局，其他类别为空
    pub response: Schema,
    pub merge: MergePolicy,
}

impl MessageKind {
    pub fn notification(type_id: u32, name: &str, schema: Schema) -> Self {
        Self {
            type_id,
            name: name.to_string(),
            category: Category::Notification,
            schema,
            response: Schema::new(),
            merge: MergePolicy::None,
        }
    }

    pub fn query(type_id: u32, name: &str, schema: Schema, response: Schema) -> Self {
        Self {
            type_id,
            name: name.to_string(),
            category: Category::Query,
            schema,
            response,
            merge: MergePolicy::None,
        }
    }

    pub fn command(type_id: u32, name: &str, merge: MergePolicy, schema: Schema) -> Self {
        Self {
            type_id,
            name: name.to_string(),
            category: Category::Command,
            schema,
            response: Schema::new(),
            merge,
        }
    }

    pub fn is_mergeable(&self) -> bool {
        self.category == Category::Command && self.merge == MergePolicy::MergeableWithPrevious
    }

    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{:?}|{}|{}",
            self.type_id,
            self.name,
            self.category,
            self.merge,
            self.schema.canonical(),
            self.response.canonical()
        )
    }
}

/// 保留的控制消息
pub mod control {
    /// 目录指纹握手（查询）
    pub const HANDSHAKE: u32 = 0xFF00;
    /// 撤销最近的命令（通知）
    pub const UNDO: u32 = 0xFF01;
    /// 重做（通知）
    pub const REDO: u32 = 0xFF02;
    /// 结束当前合并段（通知）
    pub const SEAL_COMMANDS: u32 = 0xFF03;
    /// 模拟端拒绝了命令（通知，模拟 -> 编辑器）
    pub const COMMAND_REJECTED: u32 = 0xFF04;

    pub fn is_control(type_id: u32) -> bool {
        (HANDSHAKE..=COMMAND_REJECTED).contains(&type_id)
    }
}

/// 消息目录
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    kinds: HashMap<u32, Arc<MessageKind>>,
    names: HashMap<String, u32>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCatalog {
    /// 创建目录并注册保留的控制消息
    pub fn new() -> Self {
        let mut catalog = Self {
            kinds: HashMap::new(),
            names: HashMap::new(),
        };
        for kind in control_kinds() {
            // 空目录中不会冲突
            let _ = catalog.register(kind);
        }
        catalog
    }

    /// 注册消息种类
    pub fn register(&mut self, kind: MessageKind) -> CatalogResult<()> {
        if self.kinds.contains_key(&kind.type_id) {
            return Err(CatalogError::DuplicateTypeId(kind.type_id));
        }
        if self.names.contains_key(&kind.name) {
            return Err(CatalogError::DuplicateName(kind.name));
        }
        self.names.insert(kind.name.clone(), kind.type_id);
        self.kinds.insert(kind.type_id, Arc::new(kind));
        Ok(())
    }

    pub fn lookup(&self, type_id: u32) -> CatalogResult<&Arc<MessageKind>> {
        self.kinds
            .get(&type_id)
            .ok_or(CatalogError::UnknownType(type_id))
    }

    pub fn lookup_name(&self, name: &str) -> CatalogResult<&Arc<MessageKind>> {
        let id = self.id_of(name)?;
        self.lookup(id)
    }

    pub fn id_of(&self, name: &str) -> CatalogResult<u32> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownName(name.to_string()))
    }

    pub fn contains(&self, type_id: u32) -> bool {
        self.kinds.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// 按 type id 排序遍历
    pub fn kinds(&self) -> impl Iterator<Item = &Arc<MessageKind>> {
        let sorted: BTreeMap<u32, &Arc<MessageKind>> =
            self.kinds.iter().map(|(id, kind)| (*id, kind)).collect();
        sorted.into_values()
    }

    /// 目录指纹
    ///
    /// 对每个种类的规范描述做 SHA-256，与构建配置和平台无关。
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for kind in self.kinds() {
            hasher.update(kind.canonical().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// 冻结目录
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn control_kinds() -> Vec<MessageKind> {
    vec![
        MessageKind::query(
            control::HANDSHAKE,
            "Handshake",
            Schema::new().field("fingerprint", TypeTag::Str),
            Schema::new()
                .field("accepted", TypeTag::Bool)
                .field("fingerprint", TypeTag::Str),
        ),
        MessageKind::notification(control::UNDO, "Undo", Schema::new()),
        MessageKind::notification(control::REDO, "Redo", Schema::new()),
        MessageKind::notification(control::SEAL_COMMANDS, "SealCommands", Schema::new()),
        MessageKind::notification(
            control::COMMAND_REJECTED,
            "CommandRejected",
            Schema::new()
                .field("command", TypeTag::Str)
                .field("reason", TypeTag::Str),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn move_object() -> MessageKind {
        MessageKind::command(
            1,
            "MoveObject",
            MergePolicy::None,
            Schema::new()
                .field("id", TypeTag::Int)
                .field("pos", TypeTag::Pos2),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = MessageCatalog::new();
        catalog.register(move_object()).unwrap();

        let kind = catalog.lookup(1).unwrap();
        assert_eq!(kind.name, "MoveObject");
        assert_eq!(kind.category, Category::Command);
        assert_eq!(catalog.id_of("MoveObject").unwrap(), 1);
        assert!(catalog.lookup(control::UNDO).is_ok());
    }

    #[test]
    fn test_duplicate_type_id() {
        let mut catalog = MessageCatalog::new();
        catalog.register(move_object()).unwrap();
        let clash = MessageKind::notification(1, "Other", Schema::new());
        assert_eq!(
            catalog.register(clash),
            Err(CatalogError::DuplicateTypeId(1))
        );
        // 控制消息的 id 同样被占用
        let clash = MessageKind::notification(control::UNDO, "MyUndo", Schema::new());
        assert_eq!(
            catalog.register(clash),
            Err(CatalogError::DuplicateTypeId(control::UNDO))
        );
    }

    #[test]
    fn test_unknown_type() {
        let catalog = MessageCatalog::new();
        assert_eq!(
            catalog.lookup(42).unwrap_err(),
            CatalogError::UnknownType(42)
        );
        assert!(matches!(
            catalog.lookup_name("Nope"),
            Err(CatalogError::UnknownName(_))
        ));
    }

    #[test]
    fn test_fingerprint_detects_schema_drift() {
        let mut a = MessageCatalog::new();
        a.register(move_object()).unwrap();

        let mut b = MessageCatalog::new();
        b.register(move_object()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = MessageCatalog::new();
        c.register(MessageKind::command(
            1,
            "MoveObject",
            MergePolicy::None,
            Schema::new()
                .field("id", TypeTag::Int)
                .field("pos", TypeTag::Pos3),
        ))
        .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_kinds_sorted() {
        let mut catalog = MessageCatalog::new();
        catalog
            .register(MessageKind::notification(9, "B", Schema::new()))
            .unwrap();
        catalog
            .register(MessageKind::notification(3, "A", Schema::new()))
            .unwrap();
        let ids: Vec<u32> = catalog.kinds().map(|k| k.type_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
