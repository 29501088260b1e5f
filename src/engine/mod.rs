// ==========================================
// 挂片协议引擎 - 引擎层
// ==========================================
// 组件（叶 → 根）:
// AttributeResolver → RuleEvaluator → ProtocolMatcher → ProtocolEngine → LayoutBinder
// ==========================================
// 职责: 协议匹配与应用
// 红线: 匹配过程同步、纯计算、无 I/O
// ==========================================

pub mod attribute_resolver;
pub mod error;
pub mod events;
pub mod layout_binder;
pub mod matcher;
pub mod protocol_engine;
pub mod reevaluation;
pub mod rule_evaluator;

// 重导出核心组件
pub use attribute_resolver::{AttributeResolver, DerivedAttribute, ResolveContext, ResolveError};
pub use error::{EngineError, EngineResult};
pub use events::{
    ChannelEventPublisher, MatchRun, NoOpEventPublisher, OptionalEventPublisher, ProtocolEvent,
    ProtocolEventPublisher, ProtocolEventType, RecordingEventPublisher,
};
pub use layout_binder::{
    LayoutBinder, LayoutInstruction, LayoutManager, NoOpLayoutManager, ViewportBinding, ViewportContent,
};
pub use matcher::{ExclusionReason, MatchOptions, ProtocolMatcher};
pub use protocol_engine::{ActiveProtocol, EngineOptions, ProtocolEngine};
pub use reevaluation::{spawn_reevaluation, EngineHandle};
pub use rule_evaluator::{GroupMatch, RuleEvaluator, RuleOutcome};
