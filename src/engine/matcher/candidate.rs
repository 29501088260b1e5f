// ==========================================
// 挂片协议引擎 - 视口候选收集与排序
// ==========================================
// 候选排序键:
// 1) 得分降序
// 2) 当前布局已显示的序列优先（仅在启用时）
// 3) SeriesNumber 升序（缺失排最后）
// 4) InstanceNumber 升序（缺失排最后）
// 5) 遍历顺序
// ==========================================

use crate::domain::match_result::FailedRule;
use crate::domain::metadata::{DisplaySetRef, Study};
use crate::domain::protocol::{Protocol, ViewportDefinition};
use crate::domain::types::EntityLevel;
use crate::engine::attribute_resolver::ResolveContext;
use crate::engine::rule_evaluator::RuleEvaluator;
use std::cmp::Ordering;

use super::core::MatchOptions;

/// 视口候选
#[derive(Debug, Clone)]
pub(super) struct Candidate {
    pub display_set: DisplaySetRef,
    pub score: f64,
    pub displayed: bool,
    pub series_number: Option<f64>,
    pub instance_number: Option<f64>,
    pub order: usize,
    pub failed: Vec<FailedRule>,
}

/// 收集一个视口的全部候选（已排除必需规则失败者），并按排序键排好
pub(super) fn collect_candidates(
    evaluator: &RuleEvaluator<'_>,
    protocol: &Protocol,
    viewport: &ViewportDefinition,
    studies: &[Study],
    options: &MatchOptions,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut order = 0usize;

    for (study_index, study) in studies.iter().enumerate() {
        if protocol.active_study_only() && study_index > 0 {
            break;
        }

        let ctx = ResolveContext::for_study(studies, study_index, study);
        let study_group = evaluator.evaluate_group(&viewport.study_rules, EntityLevel::Study, &ctx);
        if study_group.required_failed {
            continue;
        }

        for (series_index, series) in study.series.iter().enumerate() {
            let series_ctx = ctx.with_series(series);
            let series_group = evaluator.evaluate_group(&viewport.series_rules, EntityLevel::Series, &series_ctx);
            if series_group.required_failed {
                continue;
            }

            let display_set = DisplaySetRef::for_series(study, study_index, series, series_index);
            let displayed = options.prefer_displayed_series && options.is_displayed(&display_set);
            let base_score = study_group.score + series_group.score;
            let mut base_failed = study_group.failed.clone();
            base_failed.extend(series_group.failed.iter().cloned());

            if viewport.instance_rules.is_empty() {
                candidates.push(Candidate {
                    display_set,
                    score: base_score,
                    displayed,
                    series_number: series.series_number(),
                    instance_number: None,
                    order,
                    failed: base_failed,
                });
                order += 1;
                continue;
            }

            for (instance_index, instance) in series.instances.iter().enumerate() {
                if options.skip_non_image_instances && !instance.is_image() {
                    continue;
                }

                let instance_ctx = series_ctx.with_instance(instance);
                let instance_group =
                    evaluator.evaluate_group(&viewport.instance_rules, EntityLevel::Instance, &instance_ctx);
                if instance_group.required_failed {
                    continue;
                }

                let mut failed = base_failed.clone();
                failed.extend(instance_group.failed);
                candidates.push(Candidate {
                    display_set: display_set.clone().with_instance(instance, instance_index),
                    score: base_score + instance_group.score,
                    displayed,
                    series_number: series.series_number(),
                    instance_number: instance.instance_number(),
                    order,
                    failed,
                });
                order += 1;
            }
        }
    }

    candidates.sort_by(compare_candidates);
    candidates
}

/// 候选全序比较（遍历顺序唯一，保证全序）
pub(super) fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.displayed.cmp(&a.displayed))
        .then_with(|| missing_last(a.series_number, b.series_number))
        .then_with(|| missing_last(a.instance_number, b.instance_number))
        .then_with(|| a.order.cmp(&b.order))
}

fn missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
