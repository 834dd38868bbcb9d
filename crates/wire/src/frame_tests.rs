// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use tokio::io::AsyncWriteExt;

const TIMEOUT: Duration = Duration::from_secs(2);
const MAX: usize = 1024 * 1024;

#[test]
fn wrap_adds_framing() {
    let framed = wrap(b"MSH|test");
    assert_eq!(framed[0], START_BLOCK);
    assert_eq!(framed[framed.len() - 2], END_BLOCK);
    assert_eq!(framed[framed.len() - 1], CARRIAGE_RETURN);
}

#[test]
fn unwrap_strips_framing() {
    assert_eq!(unwrap(&wrap(b"payload")).unwrap(), b"payload");
}

#[test]
fn unwrap_tolerates_missing_cr() {
    assert_eq!(unwrap(b"\x0bpayload\x1c").unwrap(), b"payload");
}

#[test]
fn unwrap_rejects_missing_start_block() {
    assert!(matches!(
        unwrap(b"payload\x1c\x0d"),
        Err(FrameError::MissingStartBlock)
    ));
}

#[test]
fn unwrap_rejects_missing_end_block() {
    assert!(matches!(
        unwrap(b"\x0bpayload"),
        Err(FrameError::MissingEndBlock)
    ));
}

proptest! {
    #[test]
    fn roundtrip_wrap_unwrap(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let framed = wrap(&payload);
        let back = unwrap(&framed).unwrap();
        prop_assert_eq!(back, &payload[..]);
    }
}

#[tokio::test]
async fn read_frame_simple() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    tx.write_all(&wrap(b"MSH|hello")).await.unwrap();

    let payload = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&payload[..], b"MSH|hello");
}

#[tokio::test]
async fn read_frame_discards_garbage_before_start_block() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    tx.write_all(b"\r\n\0junk").await.unwrap();
    tx.write_all(&wrap(b"payload")).await.unwrap();

    let payload = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&payload[..], b"payload");
}

#[tokio::test]
async fn read_frame_without_trailing_cr() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    tx.write_all(b"\x0bno-cr\x1c").await.unwrap();
    drop(tx);

    let payload = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&payload[..], b"no-cr");
}

#[tokio::test]
async fn read_frame_end_block_inside_payload() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    // EB followed by ordinary data is payload content, not a terminator.
    tx.write_all(b"\x0bab\x1ccd\x1c\x0d").await.unwrap();

    let payload = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&payload[..], b"ab\x1ccd");
}

#[tokio::test]
async fn read_frame_two_messages_back_to_back() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    tx.write_all(&wrap(b"one")).await.unwrap();
    tx.write_all(&wrap(b"two")).await.unwrap();

    let first = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    let second = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&first[..], b"one");
    assert_eq!(&second[..], b"two");
}

#[tokio::test]
async fn read_frame_enforces_max_size() {
    let (mut tx, mut rx) = tokio::io::duplex(4096);
    let big = vec![b'x'; 100];
    tx.write_all(&wrap(&big)).await.unwrap();

    let err = read_frame(&mut rx, TIMEOUT, 50).await.unwrap_err();
    assert!(matches!(err, FrameError::TooLarge { max: 50 }));
    assert!(err.is_frame_error());
}

#[tokio::test]
async fn read_frame_times_out_on_silence() {
    let (_tx, mut rx) = tokio::io::duplex(16);

    let err = read_frame(&mut rx, Duration::from_millis(50), MAX).await.unwrap_err();
    assert!(matches!(err, FrameError::Timeout(_)));
    assert!(!err.is_frame_error());
}

#[tokio::test]
async fn read_frame_reports_closed_connection() {
    let (tx, mut rx) = tokio::io::duplex(16);
    drop(tx);

    let err = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap_err();
    assert!(matches!(err, FrameError::ConnectionClosed(_)));
}

#[tokio::test]
async fn read_frame_closed_mid_message() {
    let (mut tx, mut rx) = tokio::io::duplex(16);
    tx.write_all(b"\x0bpartial").await.unwrap();
    drop(tx);

    let err = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap_err();
    assert!(matches!(err, FrameError::ConnectionClosed("while reading message")));
}

#[tokio::test]
async fn write_frame_then_read_frame() {
    let (mut tx, mut rx) = tokio::io::duplex(256);
    write_frame(&mut tx, b"MSA|AA|MSG001", TIMEOUT).await.unwrap();

    let payload = read_frame(&mut rx, TIMEOUT, MAX).await.unwrap();
    assert_eq!(&payload[..], b"MSA|AA|MSG001");
}
