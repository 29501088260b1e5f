// ==========================================
// 挂片协议引擎 - 布局绑定器
// ==========================================
// 职责: 阶段定义 + 阶段匹配结果 → 每个视口一个 ViewportBinding
// 输出: LayoutInstruction，交给外部布局管理器执行
// ==========================================

use crate::domain::match_result::{SlotBinding, StageMatch};
use crate::domain::metadata::DisplaySetRef;
use crate::domain::protocol::{Stage, ViewportPosition, ViewportSettings, ViewportStructure};
use serde::Serialize;
use std::error::Error;

/// 视口内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "displaySet")]
pub enum ViewportContent {
    DisplaySet(DisplaySetRef),
    /// 空视口标记
    Empty,
}

/// 视口绑定
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportBinding {
    pub viewport_index: usize,
    pub position: ViewportPosition,
    pub content: ViewportContent,
    pub settings: ViewportSettings,
    pub score: f64,
}

impl ViewportBinding {
    pub fn display_set(&self) -> Option<&DisplaySetRef> {
        match &self.content {
            ViewportContent::DisplaySet(r) => Some(r),
            ViewportContent::Empty => None,
        }
    }
}

/// 布局指令
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutInstruction {
    pub protocol_id: String,
    pub stage_id: String,
    pub stage_index: usize,
    pub structure: ViewportStructure,
    pub bindings: Vec<ViewportBinding>,
}

// ==========================================
// LayoutManager Trait
// ==========================================

/// 外部布局管理器
///
/// 由宿主实现（视口网格、渲染器等），引擎只负责下发指令
pub trait LayoutManager: Send + Sync {
    /// 应用布局
    ///
    /// # 返回
    /// - Ok(()): 已应用
    /// - Err: 应用失败（引擎记录告警，不回滚匹配结果）
    fn apply_layout(&self, instruction: &LayoutInstruction) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作布局管理器
#[derive(Debug, Clone, Default)]
pub struct NoOpLayoutManager;

impl LayoutManager for NoOpLayoutManager {
    fn apply_layout(&self, instruction: &LayoutInstruction) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpLayoutManager: 跳过布局应用 - protocol_id={}, stage_id={}",
            instruction.protocol_id,
            instruction.stage_id
        );
        Ok(())
    }
}

// ==========================================
// LayoutBinder
// ==========================================
pub struct LayoutBinder;

impl LayoutBinder {
    /// 生成阶段的视口绑定
    ///
    /// # 参数
    /// - stage: 阶段定义
    /// - stage_match: 该阶段的匹配结果
    ///
    /// # 返回
    /// 与 ViewportDefinition 一一对应的绑定；无匹配的视口为 Empty
    pub fn bind(stage: &Stage, stage_match: &StageMatch) -> Vec<ViewportBinding> {
        stage
            .viewports
            .iter()
            .enumerate()
            .map(|(viewport_index, definition)| {
                let matched = stage_match.viewports.get(viewport_index);
                let content = match matched.map(|m| &m.binding) {
                    Some(SlotBinding::Bound(display_set)) => ViewportContent::DisplaySet(display_set.clone()),
                    Some(SlotBinding::Unmatched) | None => ViewportContent::Empty,
                };

                ViewportBinding {
                    viewport_index,
                    position: stage.position_of(viewport_index),
                    content,
                    settings: normalize_settings(&definition.settings),
                    score: matched.map(|m| m.score).unwrap_or(0.0),
                }
            })
            .collect()
    }

    /// 生成完整布局指令
    pub fn instruction(protocol_id: &str, stage: &Stage, stage_match: &StageMatch) -> LayoutInstruction {
        LayoutInstruction {
            protocol_id: protocol_id.to_string(),
            stage_id: stage.id.clone(),
            stage_index: stage_match.stage_index,
            structure: stage.viewport_structure.clone(),
            bindings: Self::bind(stage, stage_match),
        }
    }
}

/// 自定义设置中的 "YES"/"NO" 规范化为布尔值
fn normalize_settings(settings: &ViewportSettings) -> ViewportSettings {
    let mut normalized = settings.clone();
    for value in normalized.custom.values_mut() {
        let replacement = match value.as_str() {
            Some(s) if s.eq_ignore_ascii_case("YES") => Some(serde_json::Value::Bool(true)),
            Some(s) if s.eq_ignore_ascii_case("NO") => Some(serde_json::Value::Bool(false)),
            _ => None,
        };
        if let Some(v) = replacement {
            *value = v;
        }
    }
    normalized
}
