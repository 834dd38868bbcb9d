// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::adapter::Adapter as _;
use crate::error::HostError;
use crate::host::{Disposition, Processor, WorkerHost};
use mw_config::{RouteAction, RoutingRule};
use mw_core::{
    HostState, ItemConfig, ItemType, MessageStatus, SettingTarget, CONTENT_TYPE_HL7V2,
};
use mw_storage::{MessageQuery, MessageStore as _};
use mw_wire::{read_frame, write_frame};
use std::net::SocketAddr;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

const ADT_A01: &[u8] = b"MSH|^~\\&|PAS|TRUST|EPR|TRUST|20240101120000||ADT^A01|MSG001|P|2.4\rEVN|A01|20240101120000\rPID|1||12345\rPV1|1|I\r";

const MSH_ONLY: &[u8] =
    b"MSH|^~\\&|PAS|TRUST|EPR|TRUST|20240101120000||ADT^A01|MSG002|P|2.4\r";

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME: usize = 1024 * 1024;

/// Test sink host class: records every message it processes.
struct SinkProcessor {
    seen: Arc<Mutex<Vec<mw_core::Message>>>,
}

#[async_trait::async_trait]
impl Processor for SinkProcessor {
    async fn process(&self, message: &mw_core::Message) -> Result<Disposition, HostError> {
        self.seen.lock().push(message.clone());
        Ok(Disposition::Complete)
    }
}

type Captured = Arc<Mutex<Vec<mw_core::Message>>>;

/// Register a `TestSink` class on the engine; returns the capture list.
fn register_sink(engine: &Engine) -> Captured {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let capture_handle = Arc::clone(&captured);
    let factory: crate::registry::HostFactory =
        Arc::new(move |item, _production, ctx| {
            let processor = Arc::new(SinkProcessor { seen: Arc::clone(&capture_handle) });
            let host: Arc<dyn crate::host::Host> = Arc::new(WorkerHost::new(
                item.name.clone(),
                item.item_type,
                crate::host::HostTuning::from_item(item)?,
                processor,
                ctx.clone(),
            ));
            Ok(host)
        });
    engine.registry().register("TestSink", factory);
    captured
}

fn tcp_service(name: &str, targets: &str) -> ItemConfig {
    let item = ItemConfig::new(name, "Hl7TcpService", ItemType::Service)
        .with_setting(SettingTarget::Adapter, "Port", "0")
        .with_setting(SettingTarget::Adapter, "Host", "127.0.0.1")
        .with_setting(SettingTarget::Host, "MessageSchemaCategory", "2.4");
    if targets.is_empty() {
        item
    } else {
        item.with_setting(SettingTarget::Host, "TargetConfigNames", targets)
    }
}

fn sink(name: &str) -> ItemConfig {
    ItemConfig::new(name, "TestSink", ItemType::Operation)
}

fn rule(name: &str, priority: u16, condition: &str, targets: &[&str]) -> RoutingRule {
    RoutingRule {
        name: name.to_string(),
        process: "Router".to_string(),
        priority,
        enabled: true,
        condition: condition.to_string(),
        action: RouteAction::Send,
        targets: targets.iter().map(|s| s.to_string()).collect(),
        transform: None,
        ordered: false,
    }
}

fn engine() -> Engine {
    Engine::new(EngineContext::in_memory(), EngineOptions::default())
}

fn service_addr(engine: &Engine, name: &str) -> SocketAddr {
    engine
        .get_host(name)
        .and_then(|h| h.adapter())
        .and_then(|a| a.local_addr())
        .unwrap_or_else(|| panic!("no bound address for {name}"))
}

/// One MLLP round trip against a live engine.
async fn mllp_exchange(addr: SocketAddr, payload: &[u8]) -> bytes::Bytes {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_frame(&mut write_half, payload, IO_TIMEOUT).await.unwrap();
    read_frame(&mut reader, IO_TIMEOUT, MAX_FRAME).await.unwrap()
}

async fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test]
async fn deploy_rejects_invalid_config() {
    let engine = engine();
    let config = ProductionConfig::new("Bad").with_item(
        ItemConfig::new("Svc", "Hl7TcpService", ItemType::Service).with_setting(
            SettingTarget::Host,
            "TargetConfigNames",
            "Missing",
        ),
    );
    assert!(matches!(engine.deploy(config).await, Err(EngineError::Config(_))));
}

#[tokio::test]
async fn deploy_rejects_unknown_class() {
    let engine = engine();
    let config = ProductionConfig::new("Bad")
        .with_item(ItemConfig::new("Svc", "NoSuchClass", ItemType::Service));
    assert!(matches!(engine.deploy(config).await, Err(EngineError::UnknownClass(_))));
}

#[tokio::test]
async fn start_requires_deploy() {
    let engine = engine();
    assert!(matches!(engine.start().await, Err(EngineError::NotDeployed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_order_is_dependency_order_and_idempotent() {
    let engine = engine();
    register_sink(&engine);

    let config = ProductionConfig::new("Order")
        .with_item(tcp_service("HL7.In", "Router"))
        .with_item(ItemConfig::new("Router", "RoutingProcess", ItemType::Process))
        .with_item(sink("EPR.Out"))
        .with_route(rule("all", 0, "", &["EPR.Out"]));

    engine.deploy(config).await.unwrap();
    let started = engine.start().await.unwrap();
    assert_eq!(started, vec!["EPR.Out", "Router", "HL7.In"]);
    assert_eq!(engine.state(), mw_core::ProductionState::Running);

    // Idempotent: no items started a second time.
    assert!(engine.start().await.unwrap().is_empty());

    let status = engine.get_status();
    assert_eq!(status.production.as_deref(), Some("Order"));
    assert!(status.hosts.values().all(|h| h.state == HostState::Running));

    engine.stop().await.unwrap();
    assert_eq!(engine.state(), mw_core::ProductionState::Stopped);
    let status = engine.get_status();
    assert!(status.hosts.values().all(|h| h.state == HostState::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn positive_ack_and_store_trail() {
    let engine = engine();
    engine.deploy(ProductionConfig::new("S1").with_item(tcp_service("HL7.In", ""))).await.unwrap();
    engine.start().await.unwrap();

    let ack = mllp_exchange(service_addr(&engine, "HL7.In"), ADT_A01).await;
    let text = String::from_utf8_lossy(&ack);
    assert!(
        text.contains("MSA|AA|MSG001|Message accepted"),
        "unexpected ACK: {text}"
    );

    // One header row, Completed, with the HL7 metadata on its body.
    let ctx = engine.context();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut rows = Vec::new();
    while tokio::time::Instant::now() < deadline {
        rows = ctx.store.query(&MessageQuery::new()).await.unwrap();
        if rows.len() == 1 && rows[0].status == MessageStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, MessageStatus::Completed);
    assert_eq!(rows[0].message_type.as_deref(), Some("ADT_A01"));
    assert_eq!(rows[0].correlation_id, "MSG001");

    let body = ctx.store.get_content(rows[0].id).await.unwrap().unwrap();
    assert_eq!(body.hl7_control_id.as_deref(), Some("MSG001"));
    assert_eq!(body.hl7_message_type.as_deref(), Some("ADT_A01"));
    assert_eq!(ctx.store.body_count().await.unwrap(), 1);

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn validation_nack_with_error_detail() {
    let engine = engine();
    engine.deploy(ProductionConfig::new("S2").with_item(tcp_service("HL7.In", ""))).await.unwrap();
    engine.start().await.unwrap();

    let ack = mllp_exchange(service_addr(&engine, "HL7.In"), MSH_ONLY).await;
    let text = String::from_utf8_lossy(&ack);
    assert!(text.contains("MSA|AE|MSG002"), "expected AE NACK: {text}");
    // The diagnostic lists the missing segments (capped at three).
    assert!(text.contains("EVN"), "{text}");
    assert!(text.contains("PID"), "{text}");
    assert!(text.contains("PV1"), "{text}");

    let ctx = engine.context();
    let rows = ctx.store.query(&MessageQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, MessageStatus::Error);
    assert!(rows[0].error_message.as_deref().unwrap_or_default().contains("validation"));

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn routing_fan_out_skips_lower_priority() {
    let engine = engine();
    let captured = register_sink(&engine);

    let config = ProductionConfig::new("S3")
        .with_item(tcp_service("HL7.In", "Router"))
        .with_item(ItemConfig::new("Router", "RoutingProcess", ItemType::Process))
        .with_item(sink("EPR.Out"))
        .with_item(sink("RIS.Out"))
        .with_item(sink("Archive"))
        .with_route(rule("adt", 1, r#"{MSH-9.1} = "ADT""#, &["EPR.Out", "RIS.Out"]))
        .with_route(rule("catch-all", 0, "", &["Archive"]));

    engine.deploy(config).await.unwrap();
    engine.start().await.unwrap();

    let ack = mllp_exchange(service_addr(&engine, "HL7.In"), ADT_A01).await;
    assert!(String::from_utf8_lossy(&ack).contains("MSA|AA"));

    assert!(wait_for(|| captured.lock().len() == 2).await, "expected exactly two dispatches");
    let seen = captured.lock().clone();
    let mut targets: Vec<&str> =
        seen.iter().map(|m| m.target_config_name.as_str()).collect();
    targets.sort();
    assert_eq!(targets, vec!["EPR.Out", "RIS.Out"]);
    // Same business event: one session across both legs.
    assert_eq!(seen[0].session_id, seen[1].session_id);
    assert_eq!(seen[0].correlation_id, "MSG001");

    // No dispatch to the catch-all.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(captured.lock().len(), 2);

    let ctx = engine.context();
    let session_rows = ctx
        .store
        .query(&MessageQuery::new().session_id(seen[0].session_id.to_string()))
        .await
        .unwrap();
    // Ingress + router leg + two operation legs.
    assert_eq!(session_rows.len(), 4);

    engine.stop().await.unwrap();
}

async fn http_request(addr: SocketAddr, request: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_service_accepts_posts_and_rejects_bad_requests() {
    let engine = engine();
    let captured = register_sink(&engine);

    let config = ProductionConfig::new("Http")
        .with_item(
            ItemConfig::new("HL7.In.HTTP", "Hl7HttpService", ItemType::Service)
                .with_setting(SettingTarget::Adapter, "port", "0")
                .with_setting(SettingTarget::Adapter, "path", "/messages")
                .with_setting(SettingTarget::Adapter, "max_body_size", "256")
                .with_setting(SettingTarget::Host, "TargetConfigNames", "Sink"),
        )
        .with_item(sink("Sink"));
    engine.deploy(config).await.unwrap();
    engine.start().await.unwrap();
    let addr = service_addr(&engine, "HL7.In.HTTP");

    // Happy path: 202 with the message ID in the body.
    let body = String::from_utf8_lossy(ADT_A01);
    let response = http_request(
        addr,
        &format!(
            "POST /messages HTTP/1.1\r\nHost: x\r\nContent-Type: {CONTENT_TYPE_HL7V2}\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");
    assert!(response.contains("msg-"), "{response}");
    assert!(wait_for(|| captured.lock().len() == 1).await);

    // Unsupported method.
    let response =
        http_request(addr, "GET /messages HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405"), "{response}");
    assert!(response.contains("Allow: POST"), "{response}");

    // Wrong path.
    let response = http_request(
        addr,
        "POST /other HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    // Unsupported content type.
    let response = http_request(
        addr,
        "POST /messages HTTP/1.1\r\nHost: x\r\nContent-Type: image/png\r\nContent-Length: 1\r\n\r\nx",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 415"), "{response}");

    // Body over the configured limit.
    let response = http_request(
        addr,
        "POST /messages HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: 9999\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");

    engine.stop().await.unwrap();
}

/// Scripted downstream MLLP endpoint answering a fixed ACK sequence.
async fn spawn_ack_server(codes: Vec<&'static str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        for code in codes {
            let Ok(message) = read_frame(&mut reader, IO_TIMEOUT, MAX_FRAME).await else {
                return;
            };
            let control_id = mw_hl7::ParsedView::new(message)
                .control_id()
                .unwrap_or_default();
            let ack = format!(
                "MSH|^~\\&|EPR|TRUST|PAS|TRUST|20240101120500||ACK|{control_id}|P|2.4\rMSA|{code}|{control_id}\r"
            );
            if write_frame(&mut write_half, ack.as_bytes(), IO_TIMEOUT).await.is_err() {
                return;
            }
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_code_retry_until_accept() {
    let addr = spawn_ack_server(vec!["AE", "AE", "AA"]).await;

    let engine = engine();
    let config = ProductionConfig::new("S4").with_item(
        ItemConfig::new("EPR.Out", "Hl7TcpOperation", ItemType::Operation)
            .with_setting(SettingTarget::Adapter, "IPAddress", addr.ip().to_string())
            .with_setting(SettingTarget::Adapter, "Port", addr.port().to_string())
            .with_setting(SettingTarget::Host, "ReplyCodeActions", ":?E=R,:*=S")
            .with_setting(SettingTarget::Host, "MaxRetries", "2")
            .with_setting(SettingTarget::Host, "RetryInterval", "0.05"),
    );
    engine.deploy(config).await.unwrap();
    engine.start().await.unwrap();

    let ctx = engine.context().clone();
    let message = mw_core::Message::builder()
        .raw(ADT_A01)
        .content_type(CONTENT_TYPE_HL7V2)
        .build();
    let header_id = crate::dispatch::submit_leg(&ctx, "EPR.Out", message, true).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut status = None;
    while tokio::time::Instant::now() < deadline {
        status = ctx.store.get_by_id(header_id).await.unwrap().map(|h| h.status);
        if status == Some(MessageStatus::Completed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, Some(MessageStatus::Completed), "message never completed");

    let host = engine.get_host("EPR.Out").unwrap();
    let metrics = host.status().metrics;
    assert_eq!(metrics.retries, 2, "expected two retries");
    let adapter_metrics = metrics.adapter.unwrap();
    assert_eq!(adapter_metrics.errors_total, 2, "expected two adapter error increments");

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wal_recovery_replays_pending_legs() {
    use mw_storage::{Wal, WalConfig};

    let dir = tempfile::tempdir().unwrap();

    // A previous run left two pending legs for the sink.
    let (id_a, id_b) = {
        let mut wal = Wal::open(WalConfig::new(dir.path())).unwrap();
        let make = |n: u32| {
            serde_json::to_vec(
                &mw_core::Message::builder()
                    .correlation_id(format!("recovered-{n}"))
                    .raw(&b"MSH|recovered"[..])
                    .build(),
            )
            .unwrap()
        };
        let a = wal
            .append("Sink", "msg-a", &make(1), Default::default())
            .unwrap();
        let b = wal
            .append("Sink", "msg-b", &make(2), Default::default())
            .unwrap();
        let done = wal.append("Sink", "msg-c", &make(3), Default::default()).unwrap();
        wal.complete(done.id.as_str()).unwrap();
        wal.flush().unwrap();
        (a.id, b.id)
    };

    let ctx = EngineContext::in_memory().with_wal(Arc::new(Mutex::new(
        Wal::open(WalConfig::new(dir.path())).unwrap(),
    )));
    let engine = Engine::new(ctx, EngineOptions::default());
    let captured = register_sink(&engine);

    engine
        .deploy(ProductionConfig::new("Recovery").with_item(sink("Sink")))
        .await
        .unwrap();
    engine.start().await.unwrap();

    assert!(wait_for(|| captured.lock().len() == 2).await, "pending legs not replayed");
    let seen: Vec<String> =
        captured.lock().iter().map(|m| m.correlation_id.clone()).collect();
    assert_eq!(seen, vec!["recovered-1", "recovered-2"]);

    // The recovered entries are terminal now.
    {
        let wal = engine.context().wal.as_ref().unwrap();
        let wal = wal.lock();
        assert!(!wal.get_pending().iter().any(|e| e.id == id_a || e.id == id_b));
    }
    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_host_preserves_queue() {
    let engine = engine();
    let captured = register_sink(&engine);

    engine
        .deploy(ProductionConfig::new("Restart").with_item(sink("Sink")))
        .await
        .unwrap();
    engine.start().await.unwrap();

    assert!(matches!(
        engine.restart_host("Ghost").await,
        Err(EngineError::UnknownHost(_))
    ));

    engine.restart_host("Sink").await.unwrap();
    assert_eq!(engine.get_host("Sink").unwrap().state(), HostState::Running);

    // Still processes after restart.
    let message = mw_core::Message::builder().raw(&b"after-restart"[..]).build();
    crate::dispatch::submit_leg(engine.context(), "Sink", message, true).await.unwrap();
    assert!(wait_for(|| !captured.lock().is_empty()).await);

    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disable_and_enable_host() {
    let engine = engine();
    register_sink(&engine);

    engine
        .deploy(ProductionConfig::new("Toggle").with_item(sink("Sink")))
        .await
        .unwrap();
    engine.start().await.unwrap();

    engine.disable_host("Sink").await.unwrap();
    assert!(engine.get_host("Sink").is_none());
    assert!(!engine.context().dispatcher.is_registered("Sink"));

    engine.enable_host("Sink").await.unwrap();
    let host = engine.get_host("Sink").unwrap();
    assert_eq!(host.state(), HostState::Running);

    assert!(matches!(
        engine.disable_host("Ghost").await,
        Err(EngineError::UnknownHost(_))
    ));
    engine.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retention_sweep_honours_configured_days() {
    let engine = engine();
    register_sink(&engine);

    let mut config = ProductionConfig::new("Sweep").with_item(sink("Sink"));
    config.persistence.retention_days = 7;
    engine.deploy(config).await.unwrap();

    // One ancient row, one recent row.
    let ctx = engine.context();
    let old = mw_core::Message::builder().raw(&b"old"[..]).received_at_ms(0).build();
    ctx.store.store_header(&old).await.unwrap();
    let recent = mw_core::Message::builder()
        .raw(&b"recent"[..])
        .received_at_ms(ctx.clock.epoch_ms())
        .build();
    ctx.store.store_header(&recent).await.unwrap();

    assert_eq!(engine.sweep_retention().await.unwrap(), 1);
    assert_eq!(ctx.store.count(&MessageQuery::new()).await.unwrap(), 1);

    // Retention disabled: nothing happens.
    let engine2 = engine_with_defaults().await;
    assert_eq!(engine2.sweep_retention().await.unwrap(), 0);
}

async fn engine_with_defaults() -> Engine {
    let engine = engine();
    register_sink(&engine);
    engine
        .deploy(ProductionConfig::new("NoSweep").with_item(sink("Sink")))
        .await
        .unwrap();
    engine
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_host_config_applies_settings() {
    let engine = engine();
    register_sink(&engine);

    engine
        .deploy(
            ProductionConfig::new("Reload")
                .with_item(sink("Sink").with_setting(SettingTarget::Host, "QueueSize", "10")),
        )
        .await
        .unwrap();
    engine.start().await.unwrap();

    let state = engine
        .reload_host_config(
            "Sink",
            vec![mw_core::ItemSetting::new(SettingTarget::Host, "QueueSize", "50")],
        )
        .await
        .unwrap();
    assert_eq!(state, HostState::Running);

    // The stored item config reflects the change.
    let status = engine.get_status();
    assert!(status.hosts.contains_key("Sink"));

    engine.stop().await.unwrap();
}
