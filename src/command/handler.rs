//! 命令处理器接口

use crate::core::error::HandlerError;
use crate::protocol::value::{Record, ShareableValue};

/// 撤销方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStrategy {
    /// 应用前由处理器捕获前像，撤销时交给 `restore`
    PreImage,
    /// 应用前克隆整个状态，撤销时整体恢复，之后所有不经命令日志的修改一并回退
    Snapshot,
}

/// 命令处理器
///
/// 每个命令种类一个。`PreImage` 方式必须实现 `capture` 与 `restore`，
/// 两者互为逆操作：`restore(capture(s))` 之后状态与 `capture` 之前一致。
pub trait CommandHandler<S>: Send {
    fn undo_strategy(&self) -> UndoStrategy {
        UndoStrategy::PreImage
    }

    /// 相邻两条同种命令是否可以合并为同一个撤销步骤
    fn can_merge(&self, _previous: &Record, _next: &Record) -> bool {
        true
    }

    /// 捕获命令将要改动的那部分状态
    ///
    /// 同时承担校验，返回错误时命令不会被应用。
    fn capture(&self, _state: &S, _fields: &Record) -> Result<ShareableValue, HandlerError> {
        Err(HandlerError::new("handler does not capture pre-images"))
    }

    /// 应用命令
    fn commit(&mut self, state: &mut S, fields: &Record) -> Result<(), HandlerError>;

    /// 用前像恢复状态
    fn restore(&mut self, _state: &mut S, _pre_image: &ShareableValue) {}
}
