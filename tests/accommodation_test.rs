//! Integration tests for accommodation resolution and provenance
//!
//! Documents are built as JSON the way a host would hand them over, then
//! resolved through the public API.

use assessment_player_core::accommodation::{
    AccommodationResolver, DecisionAction, FinalState, CALCULATOR, COLOR_SCHEME, LINE_READER,
    MAGNIFIER, PERIODIC_TABLE, RULER, TEXT_TO_SPEECH,
};
use assessment_player_core::AssessmentDocument;
use pretty_assertions::assert_eq;
use serde_json::json;

fn doc(value: serde_json::Value) -> AssessmentDocument {
    serde_json::from_value(value).unwrap()
}

fn qti_with_settings(settings: serde_json::Value, item_settings: serde_json::Value) -> AssessmentDocument {
    doc(json!({
        "identifier": "math-1",
        "settings": settings,
        "testParts": [{
            "identifier": "tp1",
            "sections": [{
                "identifier": "s1",
                "assessmentItemRefs": [
                    { "identifier": "item-1", "itemVId": "v1", "settings": item_settings },
                    { "identifier": "item-2", "itemVId": "v2" }
                ]
            }]
        }]
    }))
}

#[test]
fn test_district_block_beats_item_requirement() {
    let d = qti_with_settings(
        json!({ "districtPolicy": { "blockedTools": [CALCULATOR] } }),
        json!({ "requiredTools": [CALCULATOR] }),
    );
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("item-1"));

    let calculator = resolved.get(CALCULATOR).unwrap();
    assert!(!calculator.enabled);
    assert_eq!(calculator.required, None);

    let report = resolved.provenance.as_ref().unwrap();
    let winner = report.winning_decision(CALCULATOR).unwrap();
    assert_eq!(winner.rule, "District Block");
    assert_eq!(winner.precedence, 1);
    assert_eq!(winner.action, DecisionAction::Block);

    let overridden = report.overridden(CALCULATOR);
    assert_eq!(overridden.len(), 1);
    assert_eq!(overridden[0].rule, "Item Requirement");
    assert_eq!(overridden[0].action, DecisionAction::Skip);

    let explanation = report.explanation(CALCULATOR).unwrap();
    assert!(explanation.starts_with("Blocked by District Block (precedence 1"));
    assert!(explanation.contains("Overridden: Item Requirement"));
    assert_eq!(report.trail(CALCULATOR).unwrap().final_state, FinalState::Blocked);
}

#[test]
fn test_item_requirement_alone_enables_and_requires() {
    let d = qti_with_settings(json!({}), json!({ "requiredTools": [RULER] }));
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("item-1"));

    let ruler = resolved.get(RULER).unwrap();
    assert!(ruler.enabled);
    assert_eq!(ruler.required, Some(true));

    let report = resolved.provenance.as_ref().unwrap();
    let winner = report.winning_decision(RULER).unwrap();
    assert_eq!(winner.rule, "Item Requirement");
    assert_eq!(winner.precedence, 4);
    assert!(report.trail(RULER).unwrap().required);
}

#[test]
fn test_absent_sources_record_no_decisions() {
    let d = qti_with_settings(json!({}), json!({}));
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("item-2"));

    let report = resolved.provenance.as_ref().unwrap();
    assert!(report.decisions.is_empty());
    // only the scope chain of the item was consulted
    assert_eq!(report.sources.len(), 2);

    let calculator = report.trail(CALCULATOR).unwrap();
    assert_eq!(calculator.final_state, FinalState::NotConfigured);
    assert_eq!(
        calculator.explanation,
        "Not configured at any precedence level."
    );
    assert!(!resolved.tools.iter().any(|t| t.id == CALCULATOR && t.enabled));
    assert!(resolved.is_enabled(COLOR_SCHEME));
}

#[test]
fn test_steps_ordered_by_precedence_then_tool() {
    let d = qti_with_settings(
        json!({
            "districtPolicy": {
                "blockedTools": [RULER, CALCULATOR],
                "requiredTools": [MAGNIFIER]
            },
            "testAdministration": {
                "mode": "operational",
                "toolOverrides": { "textToSpeech": false, "lineReader": true }
            }
        }),
        json!({ "requiredTools": [LINE_READER] }),
    );
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("item-1"));
    let report = resolved.provenance.as_ref().unwrap();

    let sequence: Vec<(usize, u8, &str)> = report
        .decisions
        .iter()
        .map(|d| (d.step, d.precedence, d.feature_id.as_str()))
        .collect();
    assert_eq!(
        sequence,
        vec![
            (1, 1, CALCULATOR),
            (2, 1, RULER),
            (3, 2, TEXT_TO_SPEECH),
            (4, 2, LINE_READER),
            (5, 4, LINE_READER),
            (6, 5, MAGNIFIER),
        ]
    );
    assert_eq!(report.decisions[4].action, DecisionAction::Skip);

    assert!(!resolved.is_enabled(TEXT_TO_SPEECH));
    assert!(resolved.is_enabled(LINE_READER));
    // enabled by administration, so not required
    assert_eq!(resolved.get(LINE_READER).unwrap().required, None);
    assert_eq!(resolved.get(MAGNIFIER).unwrap().required, Some(true));
    assert_eq!(report.summary.blocked, 3);
}

#[test]
fn test_pnp_supports_and_auto_activation() {
    let d = doc(json!({
        "identifier": "reading-1",
        "questions": [{ "identifier": "q1" }],
        "personalNeedsProfile": {
            "supports": ["textToSpeech", "magnification", "calculator"],
            "activateAtInit": ["tts", "calculator", "textToSpeech", "magnification"]
        },
        "settings": {
            "districtPolicy": { "blockedTools": ["calculator"] },
            "toolConfigs": { "pie-tool-text-to-speech": { "voice": "en-US" } }
        }
    }));
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("q1"));

    assert!(resolved.is_enabled(TEXT_TO_SPEECH));
    assert!(resolved.is_enabled(MAGNIFIER));
    assert!(!resolved.is_enabled(CALCULATOR));
    assert_eq!(resolved.auto_activate, vec![TEXT_TO_SPEECH, MAGNIFIER]);
    assert_eq!(
        resolved.get(TEXT_TO_SPEECH).unwrap().settings,
        Some(json!({ "voice": "en-US" }))
    );

    let report = resolved.provenance.unwrap();
    assert_eq!(
        report.winning_decision(TEXT_TO_SPEECH).unwrap().rule,
        "PNP Support"
    );
}

#[test]
fn test_section_restriction_applies_to_items() {
    let d = doc(json!({
        "identifier": "sci-1",
        "testParts": [{
            "identifier": "tp1",
            "sections": [{
                "identifier": "no-calc",
                "settings": { "restrictedTools": ["calculator"] },
                "assessmentItemRefs": [{ "identifier": "i1", "itemVId": "v1" }]
            }]
        }],
        "personalNeedsProfile": { "supports": ["calculator"] }
    }));
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("i1"));
    assert!(!resolved.is_enabled(CALCULATOR));

    let report = resolved.provenance.unwrap();
    let winner = report.winning_decision(CALCULATOR).unwrap();
    assert_eq!(winner.rule, "Item Restriction");
    assert_eq!(winner.source.id.as_deref(), Some("no-calc"));
}

#[test]
fn test_outer_section_rules_reach_nested_items() {
    let d = doc(json!({
        "identifier": "sci-2",
        "testParts": [{
            "identifier": "tp1",
            "sections": [{
                "identifier": "no-calc-part",
                "settings": {
                    "restrictedTools": ["calculator"],
                    "requiredTools": ["periodicTable"]
                },
                "sections": [{
                    "identifier": "chem-passage",
                    "settings": { "requiredTools": ["ruler"] },
                    "assessmentItemRefs": [{ "identifier": "i1", "itemVId": "v1" }]
                }]
            }]
        }],
        "personalNeedsProfile": { "supports": ["calculator"] }
    }));
    let resolved = AccommodationResolver::default().resolve_for_item(&d, Some("i1"));

    assert!(!resolved.is_enabled(CALCULATOR));
    assert!(resolved.is_enabled(RULER));
    assert_eq!(resolved.get(PERIODIC_TABLE).unwrap().required, Some(true));

    let report = resolved.provenance.unwrap();
    let winner = report.winning_decision(CALCULATOR).unwrap();
    assert_eq!(winner.rule, "Item Restriction");
    assert_eq!(winner.source.id.as_deref(), Some("no-calc-part"));
    assert_eq!(
        report.winning_decision(RULER).unwrap().source.id.as_deref(),
        Some("chem-passage")
    );
}

#[test]
fn test_report_renders_markdown_and_json() {
    let d = qti_with_settings(
        json!({ "districtPolicy": { "blockedTools": [CALCULATOR] } }),
        json!({ "requiredTools": [CALCULATOR, RULER] }),
    );
    let report = AccommodationResolver::default()
        .resolve_for_item(&d, Some("item-1"))
        .provenance
        .unwrap();

    let markdown = report.to_markdown();
    assert!(markdown.contains(&format!("### {} (blocked)", CALCULATOR)));
    assert!(markdown.contains("District Block"));

    let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(value["decisions"][0]["rule"], "District Block");
    assert_eq!(value["decisions"][0]["source"]["type"], "district");
}

#[test]
fn test_resolution_passes_are_independent() {
    let d = qti_with_settings(json!({}), json!({ "requiredTools": [RULER] }));
    let resolver = AccommodationResolver::default();
    let first = resolver.resolve_for_item(&d, Some("item-1"));
    let second = resolver.resolve_for_item(&d, Some("item-2"));

    assert!(first.is_enabled(RULER));
    assert!(!second.is_enabled(RULER));
    assert_eq!(first.provenance.unwrap().decisions.len(), 1);
}
