// ==========================================
// 挂片协议引擎 - 匹配结果
// ==========================================
// 职责: 每次重算整体重建的匹配结果
// 红线: 不含运行时间戳/运行 ID（保证结果可逐字节比较）
// ==========================================

use crate::domain::metadata::DisplaySetRef;
use crate::domain::types::{EntityLevel, StageStatus};
use serde::Serialize;

/// 协议匹配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub protocol_id: String,
    pub protocol_name: String,

    /// 协议在注册表中的注册顺序（同分时的稳定排序依据）
    pub registration_index: usize,

    /// 总分 = 协议级规则得分 + 所有阶段已绑定视口得分
    pub score: f64,
    pub protocol_rules_score: f64,

    pub stages: Vec<StageMatch>,

    /// 协议级规则中未通过的可选规则
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_optional_rules: Vec<FailedRule>,
}

impl MatchResult {
    pub fn stage(&self, index: usize) -> Option<&StageMatch> {
        self.stages.get(index)
    }

    /// 所有阶段已绑定视口总数
    pub fn bound_viewports(&self) -> usize {
        self.stages.iter().map(|s| s.matched_viewports).sum()
    }
}

/// 单个阶段的匹配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMatch {
    pub stage_id: String,
    pub stage_index: usize,
    pub status: StageStatus,
    pub matched_viewports: usize,
    pub viewports: Vec<ViewportMatch>,
}

impl StageMatch {
    pub fn score(&self) -> f64 {
        self.viewports.iter().map(|v| v.score).sum()
    }
}

/// 单个视口的匹配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportMatch {
    pub viewport_index: usize,
    pub binding: SlotBinding,
    pub score: f64,

    /// 通过必需规则的候选数量
    pub candidates_considered: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_optional_rules: Vec<FailedRule>,
}

impl ViewportMatch {
    pub fn display_set(&self) -> Option<&DisplaySetRef> {
        match &self.binding {
            SlotBinding::Bound(r) => Some(r),
            SlotBinding::Unmatched => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.binding, SlotBinding::Bound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "displaySet")]
pub enum SlotBinding {
    Bound(DisplaySetRef),
    Unmatched,
}

/// 未通过的可选规则（诊断用）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRule {
    pub level: EntityLevel,
    pub attribute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub constraint: &'static str,
    pub weight: f64,
}
