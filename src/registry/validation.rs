// ==========================================
// 挂片协议引擎 - 协议规范化与校验
// ==========================================
// 规范化: 名称缺省为 id；阶段 id 缺省为 stage-N；缺少视口时按槽位自动生成
// 校验: 收集全部问题后一次性返回
// ==========================================

use crate::domain::protocol::{Protocol, Stage, ViewportDefinition};
use crate::domain::rule::{Constraint, MatchingRule};
use std::collections::BTreeSet;

use super::error::ProtocolValidationError;

/// 规范化协议定义
pub fn normalize_protocol(mut protocol: Protocol) -> Protocol {
    protocol.id = protocol.id.trim().to_string();
    if protocol.name.trim().is_empty() {
        protocol.name = protocol.id.clone();
    }

    for (stage_index, stage) in protocol.stages.iter_mut().enumerate() {
        if stage.id.trim().is_empty() {
            stage.id = format!("stage-{}", stage_index);
        }
        if stage.name.trim().is_empty() {
            stage.name = stage.id.clone();
        }
        if stage.viewports.is_empty() {
            let slots = stage.viewport_structure.slot_count();
            stage.viewports = vec![ViewportDefinition::default(); slots];
        }
    }

    protocol
}

/// 校验协议定义
///
/// # 返回
/// 全部校验错误；为空表示通过
pub fn validate_protocol(protocol: &Protocol) -> Vec<ProtocolValidationError> {
    let mut errors = Vec::new();

    if protocol.id.trim().is_empty() {
        errors.push(ProtocolValidationError::MissingId);
    }
    if protocol.stages.is_empty() {
        errors.push(ProtocolValidationError::NoStages);
    }

    for (index, rule) in protocol.protocol_matching_rules.iter().enumerate() {
        validate_rule(rule, &format!("protocolMatchingRules[{}]", index), &mut errors);
    }

    for (stage_index, stage) in protocol.stages.iter().enumerate() {
        validate_stage(stage, stage_index, &mut errors);
    }

    errors
}

fn validate_stage(stage: &Stage, stage_index: usize, errors: &mut Vec<ProtocolValidationError>) {
    let slots = stage.viewport_structure.slot_count();
    if slots == 0 {
        errors.push(ProtocolValidationError::EmptyGrid { stage_index });
    } else if stage.viewports.len() != slots {
        errors.push(ProtocolValidationError::ViewportCountMismatch {
            stage_index,
            expected: slots,
            actual: stage.viewports.len(),
        });
    }

    let mut seen = BTreeSet::new();
    for (viewport_index, viewport) in stage.viewports.iter().enumerate() {
        let position = stage.position_of(viewport_index);
        if slots > 0 && !stage.viewport_structure.contains(position) {
            errors.push(ProtocolValidationError::PositionOutOfBounds {
                stage_index,
                viewport_index,
                row: position.row,
                column: position.column,
            });
        }
        if !seen.insert(position) {
            errors.push(ProtocolValidationError::DuplicatePosition {
                stage_index,
                row: position.row,
                column: position.column,
            });
        }

        let groups = [
            ("studyRules", &viewport.study_rules),
            ("seriesRules", &viewport.series_rules),
            ("instanceRules", &viewport.instance_rules),
        ];
        for (group, rules) in groups {
            for (rule_index, rule) in rules.iter().enumerate() {
                let location = format!(
                    "stages[{}].viewports[{}].{}[{}]",
                    stage_index, viewport_index, group, rule_index
                );
                validate_rule(rule, &location, errors);
            }
        }
    }
}

fn validate_rule(rule: &MatchingRule, location: &str, errors: &mut Vec<ProtocolValidationError>) {
    if rule.attribute.trim().is_empty() {
        errors.push(ProtocolValidationError::EmptyAttribute {
            location: location.to_string(),
        });
    }
    if !rule.weight.is_finite() || rule.weight < 0.0 {
        errors.push(ProtocolValidationError::InvalidWeight {
            location: location.to_string(),
            weight: rule.weight,
        });
    }

    match &rule.constraint {
        Constraint::Range {
            min: Some(min),
            max: Some(max),
        } if min > max => {
            errors.push(ProtocolValidationError::InvertedRange {
                location: location.to_string(),
                min: *min,
                max: *max,
            });
        }
        Constraint::Regex(pattern) => {
            if let Some(message) = pattern.compile_error() {
                errors.push(ProtocolValidationError::InvalidRegex {
                    location: location.to_string(),
                    pattern: pattern.source().to_string(),
                    message,
                });
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::ViewportStructure;

    #[test]
    fn test_normalize_fills_names_and_viewports() {
        let protocol = normalize_protocol(Protocol::new(" p1 ", "").with_stage(Stage::new(
            "",
            ViewportStructure::Grid { rows: 1, columns: 2 },
        )));
        assert_eq!(protocol.id, "p1");
        assert_eq!(protocol.name, "p1");
        assert_eq!(protocol.stages[0].id, "stage-0");
        assert_eq!(protocol.stages[0].viewports.len(), 2);
        assert!(validate_protocol(&protocol).is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let bad_rule = MatchingRule::new("", Constraint::range(5.0, 1.0)).with_weight(-1.0);
        let protocol = Protocol::new("p", "p").with_stage(
            Stage::grid("s", 1, 2)
                .with_viewport(ViewportDefinition::new().at(0, 0).with_series_rule(bad_rule))
                .with_viewport(ViewportDefinition::new().at(0, 0))
                .with_viewport(ViewportDefinition::new().at(3, 0)),
        );

        let errors = validate_protocol(&protocol);
        assert!(errors.contains(&ProtocolValidationError::ViewportCountMismatch {
            stage_index: 0,
            expected: 2,
            actual: 3
        }));
        assert!(errors.contains(&ProtocolValidationError::DuplicatePosition {
            stage_index: 0,
            row: 0,
            column: 0
        }));
        assert!(errors.contains(&ProtocolValidationError::PositionOutOfBounds {
            stage_index: 0,
            viewport_index: 2,
            row: 3,
            column: 0
        }));
        assert!(errors.iter().any(|e| matches!(e, ProtocolValidationError::EmptyAttribute { .. })));
        assert!(errors.iter().any(|e| matches!(e, ProtocolValidationError::InvalidWeight { .. })));
        assert!(errors.iter().any(|e| matches!(e, ProtocolValidationError::InvertedRange { .. })));
    }

    #[test]
    fn test_empty_grid_and_bad_regex() {
        let protocol = Protocol::new("p", "p")
            .with_protocol_rule(MatchingRule::new("StudyDescription", Constraint::regex("(")))
            .with_stage(Stage::grid("s", 0, 1));
        let errors = validate_protocol(&protocol);
        assert!(errors.contains(&ProtocolValidationError::EmptyGrid { stage_index: 0 }));
        assert!(errors.iter().any(|e| matches!(
            e,
            ProtocolValidationError::InvalidRegex { location, .. } if location == "protocolMatchingRules[0]"
        )));
    }

    #[test]
    fn test_nan_weight_rejected() {
        let protocol = Protocol::new("p", "p").with_stage(
            Stage::grid("s", 1, 1).with_viewport(
                ViewportDefinition::new().with_series_rule(MatchingRule::new("Modality", Constraint::equals("CT")).with_weight(f64::NAN)),
            ),
        );
        assert_eq!(validate_protocol(&protocol).len(), 1);
    }
}
