// ==========================================
// 挂片协议引擎 - 引擎配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::config_manager::ConfigError;
use crate::logging::LogFormat;

// ==========================================
// EngineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 JSON 配置文件读取）
pub trait EngineConfigReader: Send + Sync {
    /// 获取回退使用的默认协议 id
    ///
    /// # 返回
    /// - Some(id): 使用注册表中的该协议作为回退
    /// - None: 使用注册表自带的默认协议
    fn get_default_protocol_id(&self) -> Result<Option<String>, ConfigError>;

    /// 同分时是否优先当前布局已显示的序列
    ///
    /// # 默认值
    /// - true
    fn get_prefer_displayed_series(&self) -> Result<bool, ConfigError>;

    /// 实例候选是否仅限图像实例
    ///
    /// # 默认值
    /// - true
    fn get_skip_non_image_instances(&self) -> Result<bool, ConfigError>;

    /// 日志输出格式
    ///
    /// # 默认值
    /// - TEXT
    fn get_log_format(&self) -> Result<LogFormat, ConfigError>;
}
