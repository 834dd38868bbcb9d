// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;

#[test]
fn new_message_mints_session_and_correlation() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42_000);

    let msg = Message::new(&b"hello"[..], "text/plain", "HL7.In", &clock);

    assert_eq!(msg.correlation_id, msg.id.to_string());
    assert_eq!(msg.sequence_num, 1);
    assert_eq!(msg.status, MessageStatus::Created);
    assert_eq!(msg.source_config_name, "HL7.In");
    assert_eq!(msg.received_at_ms, 42_000);
}

#[test]
fn next_leg_preserves_session_and_increments_sequence() {
    let msg = Message::builder().build();
    let leg = msg.next_leg("Router", "EPR.Out");

    assert_ne!(leg.id, msg.id);
    assert_eq!(leg.session_id, msg.session_id);
    assert_eq!(leg.correlation_id, msg.correlation_id);
    assert_eq!(leg.sequence_num, msg.sequence_num + 1);
    assert_eq!(leg.source_config_name, "Router");
    assert_eq!(leg.target_config_name, "EPR.Out");
    assert_eq!(leg.status, MessageStatus::Created);
    assert_eq!(leg.retry_count, 0);
    assert_eq!(leg.raw, msg.raw);
}

#[test]
fn with_raw_keeps_identity_and_leaves_original_untouched() {
    let msg = Message::builder().build();
    let original_raw = msg.raw.clone();

    let rewritten = msg.with_raw(&b"new"[..]);

    assert_eq!(rewritten.id, msg.id);
    assert_eq!(rewritten.raw, Bytes::from_static(b"new"));
    assert_eq!(msg.raw, original_raw);
}

#[test]
fn expiry() {
    let msg = Message::builder().expires_at_ms(5_000u64).build();
    assert!(!msg.is_expired(4_999));
    assert!(msg.is_expired(5_000));

    let no_expiry = Message::builder().build();
    assert!(!no_expiry.is_expired(u64::MAX));
}

#[test]
fn terminal_statuses() {
    assert!(MessageStatus::Completed.is_terminal());
    assert!(MessageStatus::Error.is_terminal());
    assert!(MessageStatus::Discarded.is_terminal());
    assert!(!MessageStatus::Created.is_terminal());
    assert!(!MessageStatus::Queued.is_terminal());
}

#[test]
fn serde_round_trip() {
    let msg = Message::builder().message_type("ADT_A01").build();
    let json = serde_json::to_string(&msg).unwrap();
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, msg.id);
    assert_eq!(back.raw, msg.raw);
    assert_eq!(back.message_type.as_deref(), Some("ADT_A01"));
}
