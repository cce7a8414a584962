//! 命令系统
//!
//! - `handler` - `CommandHandler` trait 与撤销方式
//! - `queue` - 命令日志（合并、撤销、重做）

pub mod handler;
pub mod queue;

pub use handler::{CommandHandler, UndoStrategy};
pub use queue::{ApplyOutcome, CommandLogEntry, CommandQueue};
