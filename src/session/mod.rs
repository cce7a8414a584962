//! 会话层
//!
//! 把传输、分发与查询关联组装成编辑器与模拟两端可直接使用的句柄。

pub mod link;
pub mod messenger;

pub use link::{spawn_simulation, CommandRejection, EditorLink, SimulationHandle};
pub use messenger::Messenger;
