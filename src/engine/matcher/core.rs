// ==========================================
// 挂片协议引擎 - 协议匹配器核心
// ==========================================
// 排除条件:
// - 已加载历史检查不足
// - 协议级规则在所有检查上都硬失败
// - 必需视口无候选
// - 所有阶段的所有视口都无候选
// ==========================================

use crate::domain::match_result::{FailedRule, MatchResult, SlotBinding, StageMatch, ViewportMatch};
use crate::domain::metadata::{DisplaySetRef, Study};
use crate::domain::protocol::{Protocol, Stage};
use crate::domain::types::{EntityLevel, StageStatus};
use crate::engine::attribute_resolver::{AttributeResolver, ResolveContext};
use crate::engine::rule_evaluator::RuleEvaluator;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::candidate::collect_candidates;

// ==========================================
// MatchOptions - 匹配选项
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    /// 当前布局已显示的显示集 UID / 序列 UID
    pub displayed_series: BTreeSet<String>,

    /// 同分时优先已显示的序列
    pub prefer_displayed_series: bool,

    /// 实例候选仅限图像实例（存在 Rows）
    pub skip_non_image_instances: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            displayed_series: BTreeSet::new(),
            prefer_displayed_series: true,
            skip_non_image_instances: true,
        }
    }
}

impl MatchOptions {
    pub fn with_displayed<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.displayed_series.extend(uids.into_iter().map(Into::into));
        self
    }

    pub fn is_displayed(&self, display_set: &DisplaySetRef) -> bool {
        self.displayed_series.contains(&display_set.display_set_uid)
            || self.displayed_series.contains(&display_set.series_instance_uid)
    }
}

/// 协议被排除的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    #[error("历史检查不足: 需要={required}, 已加载={available}")]
    InsufficientPriors { required: usize, available: usize },

    #[error("协议级必需规则在所有检查上均未通过")]
    ProtocolRulesFailed,

    #[error("必需视口无候选: stage={stage_index}, viewport={viewport_index}")]
    RequiredViewportUnmatched { stage_index: usize, viewport_index: usize },

    #[error("所有视口均无候选")]
    NoCandidates,
}

/// 协议评估的中间结果
struct Assembled {
    result: MatchResult,
    protocol_rules_passed: bool,
    required_unmatched: Option<(usize, usize)>,
}

// ==========================================
// ProtocolMatcher - 协议匹配器
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ProtocolMatcher {
    resolver: Arc<AttributeResolver>,
}

impl ProtocolMatcher {
    pub fn new(resolver: Arc<AttributeResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &AttributeResolver {
        &self.resolver
    }

    /// 对全部协议求值并排序
    ///
    /// # 参数
    /// - protocols: 协议列表（下标即注册顺序）
    /// - studies: 已加载检查（下标 0 为当前检查）
    /// - options: 匹配选项
    ///
    /// # 返回
    /// 按总分降序排列的匹配结果；无合格协议时为空
    pub fn match_protocols(
        &self,
        protocols: &[Arc<Protocol>],
        studies: &[Study],
        options: &MatchOptions,
    ) -> Vec<MatchResult> {
        let mut results = Vec::with_capacity(protocols.len());

        for (registration_index, protocol) in protocols.iter().enumerate() {
            match self.try_match_protocol(protocol, registration_index, studies, options) {
                Ok(result) => {
                    debug!(
                        protocol_id = %protocol.id,
                        score = result.score,
                        bound_viewports = result.bound_viewports(),
                        "协议匹配成功"
                    );
                    results.push(result);
                }
                Err(reason) => {
                    debug!(protocol_id = %protocol.id, reason = %reason, "协议被排除");
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.registration_index.cmp(&b.registration_index))
        });

        info!(
            protocols = protocols.len(),
            studies = studies.len(),
            matched = results.len(),
            best = results.first().map(|r| r.protocol_id.as_str()).unwrap_or("-"),
            "协议匹配完成"
        );

        results
    }

    /// 对单个协议求值（带排除判定）
    pub fn try_match_protocol(
        &self,
        protocol: &Protocol,
        registration_index: usize,
        studies: &[Study],
        options: &MatchOptions,
    ) -> Result<MatchResult, ExclusionReason> {
        let available = studies.len().saturating_sub(1);
        let required = protocol.required_priors();
        if available < required {
            return Err(ExclusionReason::InsufficientPriors { required, available });
        }

        let assembled = self.assemble(protocol, registration_index, studies, options);

        if !assembled.protocol_rules_passed {
            return Err(ExclusionReason::ProtocolRulesFailed);
        }
        if let Some((stage_index, viewport_index)) = assembled.required_unmatched {
            return Err(ExclusionReason::RequiredViewportUnmatched {
                stage_index,
                viewport_index,
            });
        }
        if assembled.result.bound_viewports() == 0 {
            return Err(ExclusionReason::NoCandidates);
        }

        Ok(assembled.result)
    }

    /// 对单个协议求值（不做排除，用于手动选择与默认协议回退）
    pub fn evaluate_protocol(
        &self,
        protocol: &Protocol,
        registration_index: usize,
        studies: &[Study],
        options: &MatchOptions,
    ) -> MatchResult {
        self.assemble(protocol, registration_index, studies, options).result
    }

    fn assemble(
        &self,
        protocol: &Protocol,
        registration_index: usize,
        studies: &[Study],
        options: &MatchOptions,
    ) -> Assembled {
        let evaluator = RuleEvaluator::new(&self.resolver);

        let (protocol_rules_score, protocol_rules_passed, failed_optional_rules) =
            evaluate_protocol_rules(&evaluator, protocol, studies);

        let mut required_unmatched = None;
        let mut stages = Vec::with_capacity(protocol.stages.len());
        for (stage_index, stage) in protocol.stages.iter().enumerate() {
            let stage_match = match_stage(&evaluator, protocol, stage, stage_index, studies, options);
            if required_unmatched.is_none() {
                required_unmatched = stage
                    .viewports
                    .iter()
                    .zip(&stage_match.viewports)
                    .position(|(def, vm)| def.required && !vm.is_bound())
                    .map(|viewport_index| (stage_index, viewport_index));
            }
            stages.push(stage_match);
        }

        let viewport_score: f64 = stages.iter().map(StageMatch::score).sum();
        let name = if protocol.name.is_empty() {
            protocol.id.clone()
        } else {
            protocol.name.clone()
        };

        Assembled {
            result: MatchResult {
                protocol_id: protocol.id.clone(),
                protocol_name: name,
                registration_index,
                score: protocol_rules_score + viewport_score,
                protocol_rules_score,
                stages,
                failed_optional_rules,
            },
            protocol_rules_passed,
            required_unmatched,
        }
    }
}

/// 协议级规则：取通过检查中的最高分
fn evaluate_protocol_rules(
    evaluator: &RuleEvaluator<'_>,
    protocol: &Protocol,
    studies: &[Study],
) -> (f64, bool, Vec<FailedRule>) {
    if protocol.protocol_matching_rules.is_empty() {
        return (0.0, true, Vec::new());
    }

    let mut best: Option<(f64, Vec<FailedRule>)> = None;
    for (study_index, study) in studies.iter().enumerate() {
        if protocol.active_study_only() && study_index > 0 {
            break;
        }
        let ctx = ResolveContext::for_study(studies, study_index, study);
        let group = evaluator.evaluate_group(&protocol.protocol_matching_rules, EntityLevel::Protocol, &ctx);
        if group.required_failed {
            continue;
        }
        let better = best.as_ref().map_or(true, |(score, _)| group.score > *score);
        if better {
            best = Some((group.score, group.failed));
        }
    }

    match best {
        Some((score, failed)) => (score, true, failed),
        None => (0.0, false, Vec::new()),
    }
}

fn match_stage(
    evaluator: &RuleEvaluator<'_>,
    protocol: &Protocol,
    stage: &Stage,
    stage_index: usize,
    studies: &[Study],
    options: &MatchOptions,
) -> StageMatch {
    let mut viewports = Vec::with_capacity(stage.viewports.len());

    for (viewport_index, viewport) in stage.viewports.iter().enumerate() {
        let candidates = collect_candidates(evaluator, protocol, viewport, studies, options);
        let candidates_considered = candidates.len();

        let viewport_match = match candidates.into_iter().nth(viewport.matched_index) {
            Some(chosen) => ViewportMatch {
                viewport_index,
                binding: SlotBinding::Bound(chosen.display_set),
                score: chosen.score,
                candidates_considered,
                failed_optional_rules: chosen.failed,
            },
            None => ViewportMatch {
                viewport_index,
                binding: SlotBinding::Unmatched,
                score: 0.0,
                candidates_considered,
                failed_optional_rules: Vec::new(),
            },
        };
        viewports.push(viewport_match);
    }

    let matched_viewports = viewports.iter().filter(|v| v.is_bound()).count();
    let activation = stage.activation;
    let status = if matched_viewports >= activation.enabled_min_viewports {
        StageStatus::Enabled
    } else if matched_viewports >= activation.passive_min_viewports {
        StageStatus::Passive
    } else {
        StageStatus::Disabled
    };

    StageMatch {
        stage_id: stage.id.clone(),
        stage_index,
        status,
        matched_viewports,
        viewports,
    }
}
