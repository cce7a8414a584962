//! 脚本宿主边界
//!
//! 核心只依赖 `ScriptHost` 定义的四种操作，不关心具体脚本引擎的对象模型。

pub mod bridge;
pub mod host;

pub use bridge::ScriptBridge;
pub use host::{ErrorReporter, ScriptHost, ScriptReport};
