// ==========================================
// 挂片协议引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 无合格协议不是错误（回退到默认协议）
// ==========================================

use crate::config::ConfigError;
use crate::metadata::MetadataError;
use crate::registry::RegistryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 外部依赖错误 =====
    #[error("协议注册表错误: {0}")]
    Registry(#[from] RegistryError),

    #[error("元数据提供者错误: {0}")]
    Metadata(#[from] MetadataError),

    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    // ===== 操作错误 =====
    #[error("协议不存在: {0}")]
    UnknownProtocol(String),

    #[error("未应用任何协议")]
    NoActiveProtocol,

    #[error("阶段越界: protocol_id={protocol_id}, stage_index={stage_index}, stage_count={stage_count}")]
    StageOutOfRange {
        protocol_id: String,
        stage_index: usize,
        stage_count: usize,
    },

    #[error("阶段不可用: protocol_id={protocol_id}, stage_index={stage_index}")]
    StageDisabled { protocol_id: String, stage_index: usize },

    // ===== 并发错误 =====
    #[error("重算进行中，拒绝重入")]
    ReentrantEvaluation,

    #[error("引擎锁获取失败: {0}")]
    LockPoisoned(String),
}

/// 引擎层 Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
