// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::host::InboundOutcome;
use mw_core::{ItemConfig, ItemType, SettingTarget};
use yare::parameterized;

#[parameterized(
    star_suffix = { "*.hl7", "adt_001.hl7", true },
    star_suffix_miss = { "*.hl7", "adt_001.txt", false },
    exact = { "feed.hl7", "feed.hl7", true },
    exact_miss = { "feed.hl7", "feed2.hl7", false },
    star_only = { "*", "anything", true },
    prefix = { "adt_*", "adt_001.hl7", true },
    prefix_miss = { "adt_*", "oru_001.hl7", false },
    middle = { "adt*001*.hl7", "adt_x_001_y.hl7", true },
    middle_miss = { "adt*001*.hl7", "adt_x_002_y.hl7", false },
)]
fn glob_matching(pattern: &str, name: &str, expected: bool) {
    assert_eq!(glob_match(name, pattern), expected, "{pattern} vs {name}");
}

#[parameterized(
    hl7 = { "msg.hl7", mw_core::CONTENT_TYPE_HL7V2 },
    hl7v2 = { "msg.hl7v2", mw_core::CONTENT_TYPE_HL7V2 },
    text = { "msg.txt", "text/plain" },
    csv = { "data.csv", "text/csv" },
    json = { "data.json", "application/json" },
    unknown = { "blob.bin", "application/octet-stream" },
)]
fn content_types(name: &str, expected: &str) {
    assert_eq!(content_type_for(Path::new(name)), expected);
}

struct RecordingHandler {
    received: Mutex<Vec<(Vec<u8>, String)>>,
}

#[async_trait::async_trait]
impl InboundHandler for RecordingHandler {
    async fn on_data_received(&self, data: bytes::Bytes, content_type: &str) -> InboundOutcome {
        self.received.lock().push((data.to_vec(), content_type.to_string()));
        InboundOutcome { accepted: true, ..Default::default() }
    }
}

fn watcher_item(dir: &Path, move_to: Option<&Path>) -> ItemConfig {
    let mut item = ItemConfig::new("File.In", "Hl7FileService", ItemType::Service)
        .with_setting(SettingTarget::Adapter, "watch_directory", dir.display().to_string())
        .with_setting(SettingTarget::Adapter, "patterns", "*.hl7")
        .with_setting(SettingTarget::Adapter, "poll_interval", "0.05");
    match move_to {
        Some(path) => {
            item = item.with_setting(SettingTarget::Adapter, "move_to", path.display().to_string());
        }
        None => {
            item = item.with_setting(SettingTarget::Adapter, "delete_after", "true");
        }
    }
    item
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn picks_up_existing_and_new_files_in_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b_second.hl7"), b"MSH|second").unwrap();
    std::fs::write(dir.path().join("a_first.hl7"), b"MSH|first").unwrap();
    std::fs::write(dir.path().join("ignored.txt"), b"nope").unwrap();

    let handler = Arc::new(RecordingHandler { received: Mutex::new(Vec::new()) });
    let adapter = FileInboundAdapter::new(&watcher_item(dir.path(), None), handler.clone()).unwrap();

    let token = CancellationToken::new();
    adapter.start(token.clone()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handler.received.lock().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    {
        let received = handler.received.lock();
        // Existing files in filename order.
        assert_eq!(received[0].0, b"MSH|first");
        assert_eq!(received[1].0, b"MSH|second");
        assert_eq!(received[0].1, mw_core::CONTENT_TYPE_HL7V2);
    }

    // Processed files were deleted; the non-matching one remains.
    assert!(!dir.path().join("a_first.hl7").exists());
    assert!(dir.path().join("ignored.txt").exists());

    // A new file shows up on a later poll.
    std::fs::write(dir.path().join("c_third.hl7"), b"MSH|third").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handler.received.lock().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(handler.received.lock().len(), 3);

    adapter.stop(Duration::from_secs(1)).await;
    assert_eq!(adapter.state(), AdapterState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn moves_processed_files_aside() {
    let dir = tempfile::tempdir().unwrap();
    let done = dir.path().join("done");
    std::fs::write(dir.path().join("one.hl7"), b"MSH|one").unwrap();

    let handler = Arc::new(RecordingHandler { received: Mutex::new(Vec::new()) });
    let adapter =
        FileInboundAdapter::new(&watcher_item(dir.path(), Some(&done)), handler.clone()).unwrap();

    let token = CancellationToken::new();
    adapter.start(token).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handler.received.lock().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    adapter.stop(Duration::from_secs(1)).await;
    assert!(!dir.path().join("one.hl7").exists());
    assert!(done.join("one.hl7").exists());
}

#[tokio::test]
async fn missing_watch_directory_fails_start() {
    let handler = Arc::new(RecordingHandler { received: Mutex::new(Vec::new()) });
    let item = watcher_item(Path::new("/nonexistent/medway-test"), None);
    let adapter = FileInboundAdapter::new(&item, handler).unwrap();
    assert!(adapter.start(CancellationToken::new()).await.is_err());
}
