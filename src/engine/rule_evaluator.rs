// ==========================================
// 挂片协议引擎 - 规则评估器
// ==========================================
// 职责: 评估单条规则/规则组 → 通过、得分、硬失败
// 得分: 通过 = weight，未通过 = 0；规则组直接求和，不做归一化
// 红线: 必需规则失败 → 整组得分 0 并标记 required_failed
// ==========================================

use crate::domain::match_result::FailedRule;
use crate::domain::rule::{Constraint, MatchingRule};
use crate::domain::types::{AttrValue, EntityLevel};
use crate::engine::attribute_resolver::{AttributeResolver, ResolveContext};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// 单条规则的评估结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub score: f64,
    /// 必需规则未通过
    pub hard_fail: bool,
}

/// 规则组的评估结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupMatch {
    pub score: f64,
    pub required_failed: bool,
    /// 未通过的可选规则
    pub failed: Vec<FailedRule>,
}

impl GroupMatch {
    pub fn passed(&self) -> bool {
        !self.required_failed
    }
}

// ==========================================
// RuleEvaluator
// ==========================================
pub struct RuleEvaluator<'r> {
    resolver: &'r AttributeResolver,
}

impl<'r> RuleEvaluator<'r> {
    pub fn new(resolver: &'r AttributeResolver) -> Self {
        Self { resolver }
    }

    /// 评估单条规则
    ///
    /// # 参数
    /// - rule: 匹配规则
    /// - level: 规则所属层级（决定从哪个实体取值）
    /// - ctx: 解析上下文
    pub fn evaluate(&self, rule: &MatchingRule, level: EntityLevel, ctx: &ResolveContext<'_>) -> RuleOutcome {
        let value = self.resolver.resolve(level, &rule.attribute, ctx);
        let passed = match &value {
            None => passes_when_missing(&rule.constraint),
            Some(actual) => check_constraint(&rule.constraint, actual),
        };

        tracing::trace!(
            level = %level,
            attribute = %rule.attribute,
            constraint = rule.constraint.kind(),
            passed,
            "规则评估"
        );

        RuleOutcome {
            passed,
            score: if passed { rule.weight } else { 0.0 },
            hard_fail: !passed && rule.required,
        }
    }

    /// 评估规则组
    ///
    /// 遇到必需规则失败立即返回（得分 0）
    pub fn evaluate_group(&self, rules: &[MatchingRule], level: EntityLevel, ctx: &ResolveContext<'_>) -> GroupMatch {
        let mut group = GroupMatch::default();

        for rule in rules {
            let outcome = self.evaluate(rule, level, ctx);
            if outcome.hard_fail {
                return GroupMatch {
                    score: 0.0,
                    required_failed: true,
                    failed: Vec::new(),
                };
            }
            if outcome.passed {
                group.score += outcome.score;
            } else {
                group.failed.push(FailedRule {
                    level,
                    attribute: rule.attribute.clone(),
                    rule_id: rule.id.clone(),
                    constraint: rule.constraint.kind(),
                    weight: rule.weight,
                });
            }
        }

        group
    }
}

// ==========================================
// 约束判定
// ==========================================

/// 值缺失时的判定表：仅 notEquals / doesNotContain 通过
pub fn passes_when_missing(constraint: &Constraint) -> bool {
    match constraint {
        Constraint::NotEquals(_) | Constraint::DoesNotContain(_) => true,
        Constraint::Equals(_)
        | Constraint::Contains(_)
        | Constraint::ContainsIgnoreCase(_)
        | Constraint::Range { .. }
        | Constraint::Regex(_)
        | Constraint::GreaterThan(_)
        | Constraint::LessThan(_)
        | Constraint::Predicate(_) => false,
    }
}

/// 对已存在的值判定约束
pub fn check_constraint(constraint: &Constraint, actual: &AttrValue) -> bool {
    match constraint {
        Constraint::Equals(expected) => values_equal(actual, expected),
        Constraint::NotEquals(expected) => !values_equal(actual, expected),
        Constraint::Contains(needle) => contains(actual, needle, true),
        Constraint::ContainsIgnoreCase(needle) => contains(actual, needle, false),
        Constraint::DoesNotContain(needle) => !contains(actual, needle, true),
        Constraint::Range { min, max } => actual.as_f64().is_some_and(|n| {
            min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
        }),
        Constraint::GreaterThan(threshold) => actual.as_f64().is_some_and(|n| n > *threshold),
        Constraint::LessThan(threshold) => actual.as_f64().is_some_and(|n| n < *threshold),
        Constraint::Regex(pattern) => match pattern.compiled() {
            Some(re) => match actual {
                AttrValue::List(items) => items
                    .iter()
                    .any(|item| item.as_text().is_some_and(|t| re.is_match(&t))),
                other => other.as_text().is_some_and(|t| re.is_match(&t)),
            },
            None => false,
        },
        Constraint::Predicate(predicate) => {
            match catch_unwind(AssertUnwindSafe(|| predicate.test(actual))) {
                Ok(passed) => passed,
                Err(_) => {
                    tracing::warn!(predicate = %predicate.name, "谓词约束崩溃，按未通过处理");
                    false
                }
            }
        }
    }
}

/// 相等比较
///
/// - 列表与列表逐元素比较
/// - 单元素列表可与标量比较
/// - 任一侧为数值时按数值比较（数字文本会被转换）
fn values_equal(actual: &AttrValue, expected: &AttrValue) -> bool {
    match (actual, expected) {
        (AttrValue::List(xs), AttrValue::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (AttrValue::List(xs), scalar) if xs.len() == 1 => values_equal(&xs[0], scalar),
        (scalar, AttrValue::List(ys)) if ys.len() == 1 => values_equal(scalar, &ys[0]),
        (AttrValue::List(_), _) | (_, AttrValue::List(_)) => false,
        (AttrValue::Map(a), AttrValue::Map(b)) => a == b,
        (AttrValue::Number(_), _) | (_, AttrValue::Number(_)) => {
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => match (actual.as_text(), expected.as_text()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// 包含判定
///
/// - 待查值为列表时任一命中即通过
/// - 实际值为列表：成员判定
/// - 实际值为文本：子串判定
fn contains(actual: &AttrValue, needle: &AttrValue, case_sensitive: bool) -> bool {
    if let AttrValue::List(needles) = needle {
        return needles.iter().any(|n| contains(actual, n, case_sensitive));
    }

    match actual {
        AttrValue::List(items) => items.iter().any(|item| {
            if case_sensitive {
                values_equal(item, needle)
            } else {
                text_eq_ignore_case(item, needle)
            }
        }),
        other => match (other.as_text(), needle.as_text()) {
            (Some(haystack), Some(n)) if case_sensitive => haystack.contains(&*n),
            (Some(haystack), Some(n)) => haystack.to_lowercase().contains(&n.to_lowercase()),
            _ => false,
        },
    }
}

fn text_eq_ignore_case(a: &AttrValue, b: &AttrValue) -> bool {
    match (a.as_text(), b.as_text()) {
        (Some(x), Some(y)) => x.to_lowercase() == y.to_lowercase(),
        _ => false,
    }
}
