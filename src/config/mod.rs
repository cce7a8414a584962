/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::impl_default;

/// 桥接配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接主配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// 传输队列配置
    #[serde(default)]
    pub transport: TransportConfig,

    /// 查询配置
    #[serde(default)]
    pub query: QueryConfig,

    /// 命令历史配置
    #[serde(default)]
    pub commands: CommandConfig,

    /// 分发器配置
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 传输队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 每个方向的队列容量，超过后发送方阻塞
    pub capacity: usize,
    /// 单个信封负载上限（字节）
    pub max_payload_bytes: usize,
}

impl_default!(TransportConfig {
    capacity: 256,
    max_payload_bytes: 16 * 1024 * 1024,
});

/// 查询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// 默认等待超时（毫秒）
    pub default_timeout_ms: u64,
}

impl_default!(QueryConfig {
    default_timeout_ms: 5000,
});

impl QueryConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// 命令历史配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// 最大撤销历史长度
    pub history_depth: usize,
}

impl_default!(CommandConfig { history_depth: 100 });

/// 分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 处理器尚未注册时可暂存的查询数量
    pub backlog_limit: usize,
}

impl_default!(DispatchConfig { backlog_limit: 1024 });

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::ParseError(format!("unknown log level: {}", other))),
        }
    }
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询的默认超时
    pub fn default_timeout(&self) -> Duration {
        self.query.default_timeout()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BRIDGE_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.transport.capacity = capacity;
            }
        }
        if let Ok(val) = env::var("BRIDGE_QUERY_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.query.default_timeout_ms = timeout;
            }
        }
        if let Ok(val) = env::var("BRIDGE_HISTORY_DEPTH") {
            if let Ok(depth) = val.parse() {
                self.commands.history_depth = depth;
            }
        }
        if let Ok(val) = env::var("BRIDGE_LOG_LEVEL") {
            if let Ok(level) = val.parse() {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.transport.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "transport.capacity must be at least 1".into(),
            ));
        }
        if self.transport.max_payload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "transport.max_payload_bytes must be at least 1".into(),
            ));
        }
        // 帧头中的负载长度为 u32
        if self.transport.max_payload_bytes as u64 > u64::from(u32::MAX) {
            return Err(ConfigError::ValidationError(
                "transport.max_payload_bytes must fit in a u32 frame length".into(),
            ));
        }
        if self.query.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "query.default_timeout_ms must be at least 1".into(),
            ));
        }
        if self.commands.history_depth == 0 {
            return Err(ConfigError::ValidationError(
                "commands.history_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. 使用默认配置
    pub fn load_or_default() -> Self {
        if let Ok(config) = Self::from_toml_file("bridge.toml") {
            tracing::info!(target: "bridge.config", "Loaded config from bridge.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("bridge.json") {
            tracing::info!(target: "bridge.config", "Loaded config from bridge.json");
            return config;
        }

        tracing::info!(target: "bridge.config", "Using default configuration");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.capacity, 256);
        assert_eq!(config.query.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_timeout(), config.query.default_timeout());
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [transport]
            capacity = 8
            max_payload_bytes = 4096

            [commands]
            history_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.capacity, 8);
        assert_eq!(config.commands.history_depth, 3);
        // 未出现的段落使用默认值
        assert_eq!(config.query.default_timeout_ms, 5000);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_json_serialization() {
        let config = BridgeConfig::default();
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = BridgeConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config.transport.capacity, parsed.transport.capacity);
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.query.default_timeout_ms = 250;
        config.save_toml(&path).unwrap();

        let loaded = BridgeConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.query.default_timeout_ms, 250);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = BridgeConfig::default();
        config.transport.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_validation_rejects_payload_beyond_frame_length() {
        let mut config = BridgeConfig::default();
        config.transport.max_payload_bytes = u32::MAX as usize;
        assert!(config.validate().is_ok());
        config.transport.max_payload_bytes = u32::MAX as usize + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
