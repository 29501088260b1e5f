// ==========================================
// 挂片协议引擎 - 领域模型层
// ==========================================
// 职责: 定义协议、规则、元数据快照、匹配结果
// 红线: 不含匹配逻辑，不含状态管理
// ==========================================

pub mod match_result;
pub mod metadata;
pub mod protocol;
pub mod rule;
pub mod types;

// 重导出核心类型
pub use match_result::{FailedRule, MatchResult, SlotBinding, StageMatch, ViewportMatch};
pub use metadata::{tags, AttributeMap, DisplaySetRef, Instance, Series, Study};
pub use protocol::{
    LayoutRegion, Protocol, Stage, StageActivation, ViewportDefinition, ViewportPosition,
    ViewportSettings, ViewportStructure, WindowLevel,
};
pub use rule::{Constraint, MatchingRule, Predicate, RegexPattern};
pub use types::{AttrValue, EngineState, EntityLevel, StageStatus};
