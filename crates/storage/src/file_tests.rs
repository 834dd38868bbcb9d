// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::MessageQuery;
use mw_core::{Message, MessageStatus, CONTENT_TYPE_HL7V2};
use std::io::Write as _;
use tempfile::tempdir;

const ADT_A01: &[u8] = b"MSH|^~\\&|A|B|C|D|20240101120000||ADT^A01|MSG001|P|2.4\rEVN|A01\rPID|1\rPV1|1\r";

fn hl7_message() -> Message {
    Message::builder()
        .raw(ADT_A01)
        .content_type(CONTENT_TYPE_HL7V2)
        .message_type("ADT_A01")
        .build()
}

#[tokio::test]
async fn survives_reopen() {
    let dir = tempdir().unwrap();

    let (header_id, session) = {
        let store = FileStore::open(dir.path()).unwrap();
        let msg = hl7_message();
        let id = store.store_header(&msg).await.unwrap();
        store
            .update_status(id, MessageStatus::Completed, Some("MSA|AA|MSG001".into()), None)
            .await
            .unwrap();
        (id, msg.session_id.to_string())
    };

    let store = FileStore::open(dir.path()).unwrap();
    let header = store.get_by_id(header_id).await.unwrap().unwrap();
    assert_eq!(header.status, MessageStatus::Completed);
    assert_eq!(header.session_id, session);
    assert_eq!(header.ack_content.as_deref(), Some("MSA|AA|MSG001"));
    assert!(header.completed_at_ms.is_some());

    let body = store.get_content(header_id).await.unwrap().unwrap();
    assert_eq!(&body.raw_content[..], ADT_A01);
    assert_eq!(body.hl7_control_id.as_deref(), Some("MSG001"));
}

#[tokio::test]
async fn body_dedup_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let msg = hl7_message();

    {
        let store = FileStore::open(dir.path()).unwrap();
        store.store_header(&msg).await.unwrap();
        store.store_header(&msg.next_leg("Router", "Out")).await.unwrap();
    }

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.count(&MessageQuery::new()).await.unwrap(), 2);
    assert_eq!(store.body_count().await.unwrap(), 1);
}

#[tokio::test]
async fn corrupt_tail_keeps_clean_prefix() {
    let dir = tempdir().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.store_header(&hl7_message()).await.unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("store.jsonl"))
            .unwrap();
        f.write_all(b"{broken\n").unwrap();
    }

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.count(&MessageQuery::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn retention_sweep_compacts_journal() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    store
        .store_header(&Message::builder().raw(&b"old"[..]).received_at_ms(100).build())
        .await
        .unwrap();
    store
        .store_header(&Message::builder().raw(&b"new"[..]).received_at_ms(900).build())
        .await
        .unwrap();

    assert_eq!(store.delete_received_before(500).await.unwrap(), 1);

    // The compacted journal replays to exactly the surviving rows.
    drop(store);
    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.count(&MessageQuery::new()).await.unwrap(), 1);
    assert_eq!(store.body_count().await.unwrap(), 1);
}

#[tokio::test]
async fn query_matches_memory_semantics() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    for (t, source) in [(100u64, "A"), (300, "B"), (200, "A")] {
        store
            .store_header(
                &Message::builder()
                    .source_config_name(source)
                    .received_at_ms(t)
                    .raw(format!("p{t}").into_bytes())
                    .build(),
            )
            .await
            .unwrap();
    }

    let from_a = store
        .query(&MessageQuery::new().source_config_name("A").order_ascending(true))
        .await
        .unwrap();
    let times: Vec<u64> = from_a.iter().map(|h| h.received_at_ms).collect();
    assert_eq!(times, vec![100, 200]);
}
