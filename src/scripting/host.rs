//! 脚本宿主边界

use serde_json::Value;

/// 宿主通过回调上报的诊断信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub message: String,
    pub filename: String,
    pub line: u32,
    pub is_warning: bool,
}

impl ScriptReport {
    pub fn error(message: impl Into<String>, filename: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            filename: filename.into(),
            line,
            is_warning: false,
        }
    }

    pub fn warning(message: impl Into<String>, filename: impl Into<String>, line: u32) -> Self {
        Self {
            is_warning: true,
            ..Self::error(message, filename, line)
        }
    }
}

impl std::fmt::Display for ScriptReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.filename, self.line, self.message)
    }
}

pub type ErrorReporter = Box<dyn FnMut(ScriptReport) + Send>;

/// 外部脚本引擎需要提供的最小能力
///
/// 所有操作只返回成功与否，失败原因通过 `set_error_reporter` 安装的回调
/// 单独上报。取值类操作以 `None` 表示失败。
pub trait ScriptHost: Send {
    /// 执行一段代码
    fn eval(&mut self, code: &str, filename: &str) -> bool;

    /// 以 JSON 参数调用具名函数
    fn call_function(&mut self, name: &str, args: &[Value]) -> Option<Value>;

    fn get_property(&mut self, name: &str) -> Option<Value>;

    fn set_property(&mut self, name: &str, value: Value) -> bool;

    /// 安装错误回调，替换之前的回调
    fn set_error_reporter(&mut self, reporter: ErrorReporter);
}
