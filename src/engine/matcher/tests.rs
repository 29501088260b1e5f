use super::candidate::{compare_candidates, Candidate};
use super::*;
use crate::domain::match_result::SlotBinding;
use crate::domain::metadata::{tags, DisplaySetRef, Instance, Series, Study};
use crate::domain::protocol::{Protocol, Stage, ViewportDefinition};
use crate::domain::rule::{Constraint, MatchingRule};
use crate::domain::types::StageStatus;
use std::cmp::Ordering;
use std::sync::Arc;

// ==========================================
// 测试辅助函数
// ==========================================

fn ct_study() -> Study {
    Study::new("1.2.840.1")
        .with_series(
            Series::new("1.2.840.1.1")
                .with_attribute(tags::MODALITY, "CT")
                .with_attribute(tags::SERIES_NUMBER, 2i64)
                .with_attribute(tags::SERIES_DESCRIPTION, "AXIAL 5mm"),
        )
        .with_series(
            Series::new("1.2.840.1.2")
                .with_attribute(tags::MODALITY, "CT")
                .with_attribute(tags::SERIES_NUMBER, 1i64)
                .with_attribute(tags::SERIES_DESCRIPTION, "SCOUT"),
        )
}

fn single_viewport_protocol(id: &str, viewport: ViewportDefinition) -> Arc<Protocol> {
    Arc::new(Protocol::new(id, id).with_stage(Stage::grid("s0", 1, 1).with_viewport(viewport)))
}

fn candidate(order: usize, score: f64, series_number: Option<f64>) -> Candidate {
    Candidate {
        display_set: DisplaySetRef {
            study_instance_uid: "st".to_string(),
            series_instance_uid: format!("se{}", order),
            display_set_uid: format!("se{}", order),
            sop_instance_uid: None,
            instance_index: None,
        },
        score,
        displayed: false,
        series_number,
        instance_number: None,
        order,
        failed: Vec::new(),
    }
}

// ==========================================
// 测试用例
// ==========================================

#[test]
fn test_ct_axial_scores_ten() {
    let viewport = ViewportDefinition::new()
        .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")).required().with_weight(5.0))
        .with_series_rule(MatchingRule::new(tags::SERIES_DESCRIPTION, Constraint::contains("AXIAL")).with_weight(5.0));
    let protocol = single_viewport_protocol("ct-axial", viewport);

    let matcher = ProtocolMatcher::default();
    let results = matcher.match_protocols(&[protocol], &[ct_study()], &MatchOptions::default());

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, 10.0);
    let bound = results[0].stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.series_instance_uid, "1.2.840.1.1");
}

#[test]
fn test_required_rule_excludes_protocol() {
    let viewport = ViewportDefinition::new()
        .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required())
        .required();
    let protocol = single_viewport_protocol("mr-only", viewport);

    let matcher = ProtocolMatcher::default();
    let err = matcher
        .try_match_protocol(&protocol, 0, &[ct_study()], &MatchOptions::default())
        .unwrap_err();
    assert_eq!(
        err,
        ExclusionReason::RequiredViewportUnmatched {
            stage_index: 0,
            viewport_index: 0
        }
    );
}

#[test]
fn test_no_candidates_excludes_protocol() {
    let viewport =
        ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required());
    let protocol = single_viewport_protocol("mr-only", viewport);

    let matcher = ProtocolMatcher::default();
    assert_eq!(
        matcher.try_match_protocol(&protocol, 0, &[ct_study()], &MatchOptions::default()),
        Err(ExclusionReason::NoCandidates)
    );

    let forced = matcher.evaluate_protocol(&protocol, 0, &[ct_study()], &MatchOptions::default());
    assert_eq!(forced.stages[0].viewports[0].binding, SlotBinding::Unmatched);
    assert_eq!(forced.stages[0].status, StageStatus::Passive);
}

#[test]
fn test_tie_breaks_by_series_number() {
    // 两个 CT 序列同分，SeriesNumber 1 胜出
    let viewport = ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")));
    let protocol = single_viewport_protocol("ct", viewport);

    let results = ProtocolMatcher::default().match_protocols(&[protocol], &[ct_study()], &MatchOptions::default());
    let bound = results[0].stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.series_instance_uid, "1.2.840.1.2");
}

#[test]
fn test_displayed_series_wins_tie() {
    let viewport = ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")));
    let protocol = single_viewport_protocol("ct", viewport);
    let options = MatchOptions::default().with_displayed(["1.2.840.1.1"]);

    let results = ProtocolMatcher::default().match_protocols(&[protocol.clone()], &[ct_study()], &options);
    let bound = results[0].stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.series_instance_uid, "1.2.840.1.1");

    let options = MatchOptions {
        prefer_displayed_series: false,
        ..options
    };
    let results = ProtocolMatcher::default().match_protocols(&[protocol], &[ct_study()], &options);
    let bound = results[0].stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.series_instance_uid, "1.2.840.1.2");
}

#[test]
fn test_matched_index_selects_second_candidate() {
    let viewport = ViewportDefinition::new()
        .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")))
        .with_matched_index(1);
    let protocol = single_viewport_protocol("ct-second", viewport);

    let results = ProtocolMatcher::default().match_protocols(&[protocol], &[ct_study()], &MatchOptions::default());
    let vm = &results[0].stages[0].viewports[0];
    assert_eq!(vm.candidates_considered, 2);
    assert_eq!(vm.display_set().unwrap().series_instance_uid, "1.2.840.1.1");
}

#[test]
fn test_equal_scores_keep_registration_order() {
    let viewport = ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")));
    let a = single_viewport_protocol("a", viewport.clone());
    let b = single_viewport_protocol("b", viewport);

    let results = ProtocolMatcher::default().match_protocols(&[b, a], &[ct_study()], &MatchOptions::default());
    let ids: Vec<&str> = results.iter().map(|r| r.protocol_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[test]
fn test_insufficient_priors_excluded() {
    let viewport = ViewportDefinition::new();
    let protocol = Protocol::new("priors", "priors")
        .with_priors(1)
        .with_stage(Stage::grid("s0", 1, 1).with_viewport(viewport));

    let matcher = ProtocolMatcher::default();
    assert_eq!(
        matcher.try_match_protocol(&protocol, 0, &[ct_study()], &MatchOptions::default()),
        Err(ExclusionReason::InsufficientPriors {
            required: 1,
            available: 0
        })
    );
    assert!(matcher
        .try_match_protocol(&protocol, 0, &[ct_study(), Study::new("prior").with_series(Series::new("p1"))], &MatchOptions::default())
        .is_ok());
}

#[test]
fn test_protocol_rules_add_score_and_can_exclude() {
    let viewport = ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("CT")));
    let chest = Protocol::new("chest", "Chest")
        .with_protocol_rule(MatchingRule::new("StudyDescription", Constraint::contains_ignore_case("chest")).with_weight(3.0))
        .with_stage(Stage::grid("s0", 1, 1).with_viewport(viewport.clone()));
    let head = Protocol::new("head", "Head")
        .with_protocol_rule(MatchingRule::new("StudyDescription", Constraint::contains("HEAD")).required())
        .with_stage(Stage::grid("s0", 1, 1).with_viewport(viewport));

    let study = ct_study().with_attribute("StudyDescription", "CT CHEST W/O");
    let matcher = ProtocolMatcher::default();
    let chest_result = matcher.try_match_protocol(&chest, 0, &[study.clone()], &MatchOptions::default()).unwrap();
    assert_eq!(chest_result.protocol_rules_score, 3.0);
    assert_eq!(chest_result.score, 4.0);
    assert_eq!(
        matcher.try_match_protocol(&head, 1, &[study], &MatchOptions::default()),
        Err(ExclusionReason::ProtocolRulesFailed)
    );
}

#[test]
fn test_instance_rules_skip_non_image_instances() {
    let study = Study::new("st").with_series(
        Series::new("se")
            .with_attribute(tags::MODALITY, "CT")
            .with_instance(Instance::new("sr").with_attribute(tags::INSTANCE_NUMBER, 1i64))
            .with_instance(
                Instance::new("img2")
                    .with_attribute(tags::INSTANCE_NUMBER, 3i64)
                    .with_attribute(tags::ROWS, 512i64),
            )
            .with_instance(
                Instance::new("img1")
                    .with_attribute(tags::INSTANCE_NUMBER, 2i64)
                    .with_attribute(tags::ROWS, 512i64),
            ),
    );
    let viewport = ViewportDefinition::new()
        .with_instance_rule(MatchingRule::new(tags::INSTANCE_NUMBER, Constraint::GreaterThan(0.0)));
    let protocol = single_viewport_protocol("inst", viewport);

    let matcher = ProtocolMatcher::default();
    let result = matcher
        .try_match_protocol(&protocol, 0, &[study.clone()], &MatchOptions::default())
        .unwrap();
    let bound = result.stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.sop_instance_uid.as_deref(), Some("img1"));
    assert_eq!(bound.instance_index, Some(2));

    let options = MatchOptions {
        skip_non_image_instances: false,
        ..MatchOptions::default()
    };
    let result = matcher.try_match_protocol(&protocol, 0, &[study], &options).unwrap();
    let bound = result.stages[0].viewports[0].display_set().unwrap();
    assert_eq!(bound.sop_instance_uid.as_deref(), Some("sr"));
}

#[test]
fn test_active_study_only_ignores_priors() {
    let prior = Study::new("prior").with_series(Series::new("mr1").with_attribute(tags::MODALITY, "MR"));
    let viewport = ViewportDefinition::new()
        .with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required());
    let protocol = Protocol::new("mr", "mr")
        .with_priors(-1)
        .with_stage(Stage::grid("s0", 1, 1).with_viewport(viewport));

    let matcher = ProtocolMatcher::default();
    assert_eq!(
        matcher.try_match_protocol(&protocol, 0, &[ct_study(), prior], &MatchOptions::default()),
        Err(ExclusionReason::NoCandidates)
    );
}

#[test]
fn test_stage_status_from_activation() {
    let viewport = ViewportDefinition::new().with_series_rule(MatchingRule::new(tags::MODALITY, Constraint::equals("MR")).required());
    let protocol = Protocol::new("p", "p")
        .with_stage(Stage::grid("ok", 1, 1).with_viewport(ViewportDefinition::new()))
        .with_stage(Stage::grid("strict", 1, 1).with_viewport(viewport).with_activation(1, 1));

    let result = ProtocolMatcher::default()
        .try_match_protocol(&protocol, 0, &[ct_study()], &MatchOptions::default())
        .unwrap();
    assert_eq!(result.stages[0].status, StageStatus::Enabled);
    assert_eq!(result.stages[1].status, StageStatus::Disabled);
}

#[test]
fn test_candidate_ordering_is_total() {
    let a = candidate(0, 1.0, None);
    let b = candidate(1, 1.0, Some(4.0));
    let c = candidate(2, 2.0, Some(9.0));

    assert_eq!(compare_candidates(&c, &a), Ordering::Less);
    assert_eq!(compare_candidates(&b, &a), Ordering::Less);
    assert_eq!(compare_candidates(&a, &candidate(3, 1.0, None)), Ordering::Less);
}
