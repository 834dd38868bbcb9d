// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    reject_fails = { ":?R=F,:?E=S,:*=S", "AR", ReplyAction::Fail },
    commit_reject_fails = { ":?R=F,:?E=S,:*=S", "CR", ReplyAction::Fail },
    error_succeeds = { ":?R=F,:?E=S,:*=S", "AE", ReplyAction::Success },
    accept_catch_all = { ":?R=F,:?E=S,:*=S", "AA", ReplyAction::Success },
    error_retries = { ":?E=R,:*=S", "AE", ReplyAction::Retry },
    commit_error_retries = { ":?E=R,:*=S", "CE", ReplyAction::Retry },
    exact_beats_catch_all = { ":AE=W,:?E=F,:*=S", "AE", ReplyAction::Warning },
    first_match_wins = { ":?E=F,:AE=W", "AE", ReplyAction::Fail },
    any_accept = { ":?A=W,:*=F", "CA", ReplyAction::Warning },
    unmatched_defaults_to_success = { ":AR=F", "AA", ReplyAction::Success },
)]
fn evaluates(spec: &str, code: &str, expected: ReplyAction) {
    let actions = ReplyCodeActions::parse(spec).unwrap();
    assert_eq!(actions.evaluate(code), expected, "{spec} on {code}");
}

#[test]
fn empty_spec_is_always_success() {
    let actions = ReplyCodeActions::parse("").unwrap();
    assert_eq!(actions.evaluate("AR"), ReplyAction::Success);
    assert_eq!(actions.evaluate("anything"), ReplyAction::Success);
}

#[test]
fn lowercase_actions_accepted() {
    let actions = ReplyCodeActions::parse(":?R=f").unwrap();
    assert_eq!(actions.evaluate("AR"), ReplyAction::Fail);
}

#[parameterized(
    undocumented_action_c = { ":?A=C" },
    unknown_action = { ":AA=X" },
    unknown_pattern = { ":ZZ=S" },
    missing_equals = { ":AA" },
    unknown_wildcard = { ":?Z=S" },
)]
fn rejects_at_parse(spec: &str) {
    assert!(ReplyCodeActions::parse(spec).is_err(), "expected {spec:?} to fail");
}

#[test]
fn whitespace_tolerated() {
    let actions = ReplyCodeActions::parse(" :?E = R , :* = S ").unwrap();
    assert_eq!(actions.evaluate("CE"), ReplyAction::Retry);
    assert_eq!(actions.evaluate("AA"), ReplyAction::Success);
}
