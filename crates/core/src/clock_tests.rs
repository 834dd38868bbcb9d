// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::new();
    let before_ms = Clock::epoch_ms(&clock);
    let before = Clock::now(&clock);

    clock.advance(Duration::from_secs(5));

    assert_eq!(Clock::epoch_ms(&clock), before_ms + 5_000);
    assert_eq!(Clock::now(&clock) - before, Duration::from_secs(5));
}

#[test]
fn fake_clock_set_epoch() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    assert_eq!(Clock::epoch_ms(&clock), 1_700_000_000_000);
}

#[test]
fn hl7_timestamp_formats_utc() {
    let clock = FakeClock::new();
    // 2024-01-02 03:04:05 UTC
    clock.set_epoch_ms(1_704_164_645_000);
    assert_eq!(Clock::hl7_timestamp(&clock), "20240102030405");
}

#[test]
fn system_clock_epoch_is_sane() {
    let clock = SystemClock;
    // After 2020-01-01 in any environment running these tests.
    assert!(Clock::epoch_ms(&clock) > 1_577_836_800_000);
}
