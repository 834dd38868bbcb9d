// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{PersistenceBackend, RouteAction};

const SAMPLE: &str = r#"
[production]
name = "Trust.ADT"
description = "ADT feed"
actor_pool_size = 4

[[items]]
name = "HL7.In.TCP"
class_name = "Hl7TcpService"
item_type = "service"
pool_size = 2

[items.adapter]
Port = 2575
ReadTimeout = 30

[items.host]
MessageSchemaCategory = "2.4"
TargetConfigNames = "ADT.Router"

[[items]]
name = "ADT.Router"
class_name = "RoutingProcess"
item_type = "process"

[[items]]
name = "EPR.Out"
class_name = "Hl7TcpOperation"
item_type = "operation"
enabled = true

[items.adapter]
IPAddress = "10.0.0.5"
Port = 2576

[items.host]
ReplyCodeActions = ":?E=R,:*=S"

[[routes]]
name = "adt-to-epr"
process = "ADT.Router"
priority = 100
condition = '{MSH-9.1} = "ADT"'
action = "send"
targets = ["EPR.Out"]

[logging]
level = "debug"

[persistence]
backend = "file"
directory = "/var/lib/medway"
retention_days = 30
"#;

#[test]
fn loads_full_production() {
    let config = load_toml_str(SAMPLE).unwrap();

    assert_eq!(config.name, "Trust.ADT");
    assert_eq!(config.actor_pool_size, 4);
    assert_eq!(config.items.len(), 3);

    let service = config.get_item("HL7.In.TCP").unwrap();
    assert_eq!(service.item_type, ItemType::Service);
    assert_eq!(service.pool_size, 2);
    // Integer TOML values arrive in wire string form.
    assert_eq!(service.setting(SettingTarget::Adapter, "Port"), Some("2575"));
    assert_eq!(service.target_config_names(), vec!["ADT.Router"]);

    assert_eq!(config.routes.len(), 1);
    let route = &config.routes[0];
    assert_eq!(route.action, RouteAction::Send);
    assert_eq!(route.priority, 100);
    assert_eq!(route.condition, r#"{MSH-9.1} = "ADT""#);

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.persistence.backend, PersistenceBackend::File);
    assert_eq!(config.persistence.retention_days, 30);
}

#[test]
fn validation_runs_at_load() {
    let bad = r#"
[production]
name = "Broken"

[[items]]
name = "Svc"
class_name = "Hl7TcpService"
item_type = "service"

[items.host]
TargetConfigNames = "Missing"
"#;
    let err = load_toml_str(bad).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
    assert!(err.to_string().contains("unknown target 'Missing'"));
}

#[test]
fn malformed_toml_is_a_config_error() {
    assert!(matches!(load_toml_str("not toml ["), Err(ConfigError::Toml(_))));
}

#[test]
fn defaults_apply() {
    let minimal = r#"
[production]
name = "Minimal"
"#;
    let config = load_toml_str(minimal).unwrap();
    assert_eq!(config.actor_pool_size, 2);
    assert!(config.items.is_empty());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.persistence.backend, PersistenceBackend::Memory);
}

#[test]
fn load_file_dispatches_on_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("production.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = load_file(&path).unwrap();
    assert_eq!(config.name, "Trust.ADT");

    let unknown = dir.path().join("production.yaml");
    std::fs::write(&unknown, "x").unwrap();
    assert!(matches!(load_file(&unknown), Err(ConfigError::UnsupportedFormat(_))));
}
