// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mw_core::CONTENT_TYPE_HL7V2;
use std::sync::Arc;

const ADT: &[u8] = b"MSH|^~\\&|PAS|TRUST|EPR|TRUST|20240101120000||ADT^A01|MSG001|P|2.4\rEVN|A01\rPID|1\rPV1|1|I\r";
const ORU: &[u8] = b"MSH|^~\\&|LAB|TRUST|EPR|TRUST|20240101120000||ORU^R01|LAB001|P|2.4\rPID|1\r";

fn message(raw: &'static [u8]) -> Message {
    Message::builder().raw(raw).content_type(CONTENT_TYPE_HL7V2).build()
}

fn rule(
    name: &str,
    priority: u16,
    condition: &str,
    action: RouteAction,
    targets: &[&str],
) -> RoutingRule {
    RoutingRule {
        name: name.to_string(),
        process: "Router".to_string(),
        priority,
        enabled: true,
        condition: condition.to_string(),
        action,
        targets: targets.iter().map(|s| s.to_string()).collect(),
        transform: None,
        ordered: false,
    }
}

fn engine(rules: &[RoutingRule]) -> RoutingEngine {
    let refs: Vec<&RoutingRule> = rules.iter().collect();
    RoutingEngine::compile(&refs, Vec::new()).unwrap()
}

fn target_names(decision: &RouteDecision) -> Vec<&str> {
    decision.targets.iter().map(|t| t.name.as_str()).collect()
}

#[test]
fn first_matching_rule_wins() {
    let rules = [
        rule("adt", 10, r#"{MSH-9.1} = "ADT""#, RouteAction::Send, &["EPR.Out", "RIS.Out"]),
        rule("all", 0, "", RouteAction::Send, &["Archive"]),
    ];
    let transforms = TransformRegistry::new();

    let decision = engine(&rules).evaluate(&message(ADT), &transforms).unwrap();
    assert_eq!(target_names(&decision), vec!["EPR.Out", "RIS.Out"]);
    assert_eq!(decision.matched_rule.as_deref(), Some("adt"));

    // Non-ADT falls through to the catch-all.
    let decision = engine(&rules).evaluate(&message(ORU), &transforms).unwrap();
    assert_eq!(target_names(&decision), vec!["Archive"]);
}

#[test]
fn disabled_rules_are_skipped() {
    let mut first = rule("adt", 10, r#"{MSH-9.1} = "ADT""#, RouteAction::Send, &["EPR.Out"]);
    first.enabled = false;
    let rules = [first, rule("all", 0, "", RouteAction::Send, &["Archive"])];

    let decision = engine(&rules).evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert_eq!(target_names(&decision), vec!["Archive"]);
}

#[test]
fn stop_ends_evaluation_with_no_targets() {
    let rules = [
        rule("halt", 10, r#"{MSH-9.1} = "ADT""#, RouteAction::Stop, &[]),
        rule("all", 0, "", RouteAction::Send, &["Archive"]),
    ];
    let decision = engine(&rules).evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert!(decision.targets.is_empty());
    assert!(!decision.deleted);
}

#[test]
fn delete_drops_the_message() {
    let rules = [rule("bin", 10, "", RouteAction::Delete, &[])];
    let decision = engine(&rules).evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert!(decision.deleted);
    assert!(decision.targets.is_empty());
}

#[test]
fn transform_rewrites_and_continues() {
    let transforms = TransformRegistry::new();
    transforms.register(
        "redact",
        Arc::new(|message: &Message| {
            let view = ParsedView::new(message.raw.clone());
            let edited = view
                .set_field(&mw_hl7::FieldPath::parse("MSH-3").unwrap(), "REDACTED")
                .map_err(|e| TransformError::Failed {
                    name: "redact".to_string(),
                    reason: e.to_string(),
                })?;
            Ok(message.with_raw(edited.raw().clone()))
        }),
    );

    let mut rewrite = rule("rewrite", 20, r#"{MSH-9.1} = "ADT""#, RouteAction::Transform, &[]);
    rewrite.transform = Some("redact".to_string());
    let rules = [
        rewrite,
        // Matches only after the transform ran.
        rule("redacted", 10, r#"{MSH-3} = "REDACTED""#, RouteAction::Send, &["EPR.Out"]),
    ];

    let decision = engine(&rules).evaluate(&message(ADT), &transforms).unwrap();
    assert_eq!(target_names(&decision), vec!["EPR.Out"]);
    // The decision carries the rewritten bytes; the input was untouched.
    assert!(String::from_utf8_lossy(&decision.message.raw).contains("REDACTED"));
}

#[test]
fn unknown_transform_is_an_error() {
    let mut rewrite = rule("rewrite", 10, "", RouteAction::Transform, &[]);
    rewrite.transform = Some("missing".to_string());
    let err = engine(&[rewrite])
        .evaluate(&message(ADT), &TransformRegistry::new())
        .unwrap_err();
    assert!(matches!(err, TransformError::Unknown(_)));
}

#[test]
fn no_match_uses_default_targets() {
    let rules = [rule("oru", 10, r#"{MSH-9.1} = "ORU""#, RouteAction::Send, &["LAB.Out"])];
    let refs: Vec<&RoutingRule> = rules.iter().collect();
    let engine = RoutingEngine::compile(&refs, vec!["Fallback".to_string()]).unwrap();

    let decision = engine.evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert_eq!(target_names(&decision), vec!["Fallback"]);
    assert_eq!(decision.matched_rule, None);
}

#[test]
fn no_match_and_no_defaults_routes_nowhere() {
    let rules = [rule("oru", 10, r#"{MSH-9.1} = "ORU""#, RouteAction::Send, &["LAB.Out"])];
    let decision = engine(&rules).evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert!(decision.targets.is_empty());
    assert!(!decision.deleted);
}

#[test]
fn send_rule_carries_per_target_transform_and_ordering() {
    let mut send = rule("adt", 10, "", RouteAction::Send, &["EPR.Out"]);
    send.transform = Some("to-epr".to_string());
    send.ordered = true;

    let decision = engine(&[send]).evaluate(&message(ADT), &TransformRegistry::new()).unwrap();
    assert_eq!(
        decision.targets,
        vec![RouteTarget {
            name: "EPR.Out".to_string(),
            transform: Some("to-epr".to_string()),
            ordered: true,
        }]
    );
}

#[test]
fn invalid_condition_fails_compile() {
    let rules = [rule("bad", 10, r#"{MSH-9} ="#, RouteAction::Send, &["X"])];
    let refs: Vec<&RoutingRule> = rules.iter().collect();
    assert!(RoutingEngine::compile(&refs, Vec::new()).is_err());
}
