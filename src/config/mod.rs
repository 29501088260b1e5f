// ==========================================
// 挂片协议引擎 - 配置层
// ==========================================
// 职责: 引擎配置管理
// 存储: JSON 配置文件
// ==========================================

pub mod config_manager;
pub mod engine_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, default_config_path, ConfigError, ConfigManager};
pub use engine_config_trait::EngineConfigReader;
