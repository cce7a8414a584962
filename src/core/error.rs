//! 统一错误处理模块
//!
//! 桥接协议范围内的错误类型定义
//!
//! ## 错误类型分层
//!
//! - **协议层** (`MarshalError`, `CatalogError`): 值编解码与消息目录
//! - **传输层** (`TransportError`): 队列关闭、帧格式
//! - **分发层** (`DispatchError`, `CommandError`, `QueryError`): 处理器路由、命令日志、查询关联
//! - **外部协作方** (`ScriptError`): 脚本宿主边界
//!
//! `BridgeError` 聚合以上所有错误，调用方可以只处理一种类型。

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// 桥接核心错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Thread error: {0}")]
    Thread(String),
}

impl BridgeError {
    /// 是否为正常关闭信号 (`QueueClosed`)
    pub fn is_queue_closed(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport(TransportError::QueueClosed)
                | BridgeError::Dispatch(DispatchError::Transport(TransportError::QueueClosed))
        )
    }
}

/// 值编解码错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    /// 字节流或值的形状与期望的 schema 不一致
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// 字节流本身无法解析
    #[error("Decode error: {0}")]
    Decode(String),

    /// 编码结果超过负载上限
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// 消息目录错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Duplicate type id: {0}")]
    DuplicateTypeId(u32),

    #[error("Duplicate message name: {0}")]
    DuplicateName(String),

    #[error("Unknown type id: {0}")]
    UnknownType(u32),

    #[error("Unknown message name: {0}")]
    UnknownName(String),
}

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    /// 队列已关闭，干净的关闭信号
    #[error("Queue closed")]
    QueueClosed,

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 处理器返回的失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<MarshalError> for HandlerError {
    fn from(err: MarshalError) -> Self {
        Self(err.to_string())
    }
}

/// 分发器错误
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown type id: {0}")]
    UnknownType(u32),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Duplicate handler for type id {0}")]
    DuplicateHandler(u32),

    #[error("Category mismatch for {name}: expected {expected}, got {actual}")]
    CategoryMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("No handler registered for type id {0}")]
    NoHandler(u32),

    #[error("Query backlog full, dropping query of type id {0}")]
    BacklogFull(u32),

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<MarshalError> for DispatchError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::SchemaMismatch(msg) => DispatchError::SchemaMismatch(msg),
            other => DispatchError::SchemaMismatch(other.to_string()),
        }
    }
}

impl From<CatalogError> for DispatchError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownType(id) => DispatchError::UnknownType(id),
            other => DispatchError::SchemaMismatch(other.to_string()),
        }
    }
}

/// 命令日志错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// 命令未被应用，状态保持不变
    #[error("Edit could not be applied: {command}: {reason}")]
    ApplyFailed { command: String, reason: String },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Duplicate command handler for type id {0}")]
    DuplicateHandler(u32),

    #[error("Type id {0} is not a command")]
    NotACommand(u32),
}

/// 查询等待错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// 超时，可以重试
    #[error("Query timed out after {0:?}")]
    TimedOut(Duration),

    /// 远端失败或连接关闭，应当放弃
    #[error("Query failed: {0}")]
    Failed(String),
}

/// 脚本宿主错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Script evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Script call failed: {name}: {reason}")]
    CallFailed { name: String, reason: String },

    #[error("Script property access failed: {name}: {reason}")]
    PropertyFailed { name: String, reason: String },

    #[error("Script value conversion failed: {0}")]
    Conversion(#[from] MarshalError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type MarshalResult<T> = Result<T, MarshalError>;
pub type CatalogResult<T> = Result<T, CatalogError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type DispatchResult<T> = Result<T, DispatchError>;
pub type CommandResult<T> = Result<T, CommandError>;
pub type QueryResult<T> = Result<T, QueryError>;
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: BridgeError = CommandError::NothingToUndo.into();
        assert!(matches!(err, BridgeError::Command(CommandError::NothingToUndo)));

        let err: DispatchError = MarshalError::Decode("eof".into()).into();
        assert!(matches!(err, DispatchError::SchemaMismatch(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CommandError::ApplyFailed {
            command: "MoveObject".to_string(),
            reason: "no object 3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Edit could not be applied: MoveObject: no object 3"
        );
    }

    #[test]
    fn test_queue_closed_detection() {
        let err: BridgeError = TransportError::QueueClosed.into();
        assert!(err.is_queue_closed());
        let err: BridgeError = QueryError::Failed("x".into()).into();
        assert!(!err.is_queue_closed());
    }
}
