// ==========================================
// 挂片协议引擎 - 核心库
// ==========================================
// 系统定位: DICOM 查看器的挂片协议匹配与应用
// 输入: 已加载检查/序列/实例元数据 + 协议注册表
// 输出: 排序后的匹配结果 + 视口绑定（交给外部布局管理器）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 协议、规则、元数据快照
pub mod domain;

// 引擎层 - 解析、评估、匹配、状态机、绑定
pub mod engine;

// 注册表层 - 协议注册与校验
pub mod registry;

// 元数据层 - 元数据提供者
pub mod metadata;

// 配置层 - 引擎配置
pub mod config;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    AttrValue, Constraint, DisplaySetRef, EngineState, EntityLevel, Instance, MatchResult,
    MatchingRule, Protocol, Series, SlotBinding, Stage, StageStatus, Study, ViewportDefinition,
    ViewportStructure,
};

// 引擎
pub use engine::{
    AttributeResolver, EngineError, EngineHandle, EngineOptions, EngineResult, LayoutBinder,
    LayoutManager, MatchOptions, ProtocolEngine, ProtocolEvent, ProtocolEventPublisher,
    ProtocolMatcher, RuleEvaluator, ViewportBinding,
};

// 注册表与元数据
pub use metadata::{InMemoryMetadataProvider, MetadataError, MetadataProvider};
pub use registry::{InMemoryProtocolRegistry, ProtocolRegistry, ProtocolValidationError, RegistryError};

// 配置
pub use config::{ConfigError, ConfigManager, EngineConfigReader};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "挂片协议引擎";
