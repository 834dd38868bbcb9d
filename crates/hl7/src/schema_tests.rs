// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mw_core::FakeClock;

const ADT_A01: &[u8] = b"MSH|^~\\&|SENDAPP|SENDFAC|RECVAPP|RECVFAC|20240101120000||ADT^A01|MSG001|P|2.4\rEVN|A01|20240101120000\rPID|1||12345\rPV1|1|I\r";

const MSH_ONLY: &[u8] =
    b"MSH|^~\\&|SENDAPP|SENDFAC|RECVAPP|RECVFAC|20240101120000||ADT^A01|MSG002|P|2.4\r";

#[test]
fn valid_adt_passes() {
    let schema = Hl7Schema::new("2.4");
    assert!(schema.validate(ADT_A01).is_empty());
}

#[test]
fn message_must_start_with_msh() {
    let schema = Hl7Schema::new("2.4");
    let issues = schema.validate(b"PID|1||12345\r");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].path, "MSH");
    assert_eq!(issues[0].severity, Severity::Error);
}

#[test]
fn missing_required_segments_reported() {
    let schema = Hl7Schema::new("2.4");
    let issues = schema.validate(MSH_ONLY);

    let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
    assert!(paths.contains(&"EVN"), "missing EVN not reported: {paths:?}");
    assert!(paths.contains(&"PID"));
    assert!(paths.contains(&"PV1"));
}

#[test]
fn missing_required_msh_fields_reported() {
    let schema = Hl7Schema::new("2.4");
    // No control ID (MSH-10) or version (MSH-12).
    let raw = b"MSH|^~\\&|A|B|C|D|20240101||ADT^A01||P|\rEVN|A01\rPID|1\rPV1|1\r";
    let issues = schema.validate(raw);

    let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
    assert!(paths.contains(&"MSH-10"), "{paths:?}");
    assert!(paths.contains(&"MSH-12"), "{paths:?}");
}

#[test]
fn unknown_message_type_only_checks_msh() {
    let schema = Hl7Schema::new("2.4");
    let raw = b"MSH|^~\\&|A|B|C|D|20240101||ZZZ^Z99|ID1|P|2.4\r";
    assert!(schema.validate(raw).is_empty());
}

#[test]
fn create_ack_swaps_sender_and_receiver() {
    let schema = Hl7Schema::new("2.4");
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_704_110_400_000); // 2024-01-01 12:00:00 UTC

    let parsed = schema.parse(ADT_A01);
    let ack = schema.create_ack(&parsed, AckCode::Aa, "Message accepted", &clock);
    let text = String::from_utf8_lossy(&ack);

    let segments: Vec<&str> = text.trim_end_matches('\r').split('\r').collect();
    assert_eq!(segments.len(), 2);
    assert_eq!(
        segments[0],
        "MSH|^~\\&|RECVAPP|RECVFAC|SENDAPP|SENDFAC|20240101120000||ACK|MSG001|P|2.4"
    );
    assert_eq!(segments[1], "MSA|AA|MSG001|Message accepted");
}

#[test]
fn create_ack_without_text_omits_msa_3() {
    let schema = Hl7Schema::new("2.4");
    let parsed = schema.parse(ADT_A01);
    let ack = schema.create_ack(&parsed, AckCode::Ae, "", &FakeClock::new());
    let text = String::from_utf8_lossy(&ack);
    assert!(text.contains("\rMSA|AE|MSG001\r"));
}

#[test]
fn create_ack_is_deterministic_given_a_clock() {
    let schema = Hl7Schema::new("2.4");
    let clock = FakeClock::new();
    let parsed = schema.parse(ADT_A01);

    let first = schema.create_ack(&parsed, AckCode::Aa, "ok", &clock);
    let second = schema.create_ack(&parsed, AckCode::Aa, "ok", &clock);
    assert_eq!(first, second);
}

#[test]
fn custom_message_type_definitions_are_honoured() {
    let mut schema = Hl7Schema::new("site");
    schema.add_message_type(
        MessageTypeDef::new("ADT_A99", "Site event")
            .with_segments(&["MSH", "ZBX"])
            .with_required(&["MSH", "ZBX"]),
    );

    let raw = b"MSH|^~\\&|A|B|C|D|20240101||ADT^A99|ID1|P|2.4\r";
    let issues = schema.validate(raw);
    assert!(issues.iter().any(|i| i.path == "ZBX"));
}

#[test]
fn ack_code_display() {
    assert_eq!(AckCode::Aa.to_string(), "AA");
    assert_eq!(AckCode::Cr.to_string(), "CR");
}
