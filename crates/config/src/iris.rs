// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legacy IRIS production XML loader.
//!
//! Accepts plain `<Production>` documents and `.cls` class files whose
//! `XData ProductionDefinition` block wraps the XML. IRIS class names
//! are mapped to Medway host classes through a configurable table;
//! unmapped `EnsLib.*` classes become `unknown.*` stubs and surface as
//! warnings.

use crate::error::ConfigError;
use crate::model::ProductionConfig;
use mw_core::{ItemConfig, ItemSetting, ItemType, SettingTarget};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Loader with an IRIS→Medway class mapping table.
pub struct IrisXmlLoader {
    class_mapping: BTreeMap<String, String>,
}

impl Default for IrisXmlLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl IrisXmlLoader {
    pub fn new() -> Self {
        let mut class_mapping = BTreeMap::new();
        let defaults = [
            // HL7 services (inbound)
            ("EnsLib.HL7.Service.TCPService", "Hl7TcpService"),
            ("EnsLib.HL7.Service.HTTPService", "Hl7HttpService"),
            ("EnsLib.HL7.Service.FileService", "Hl7FileService"),
            // HL7 operations (outbound)
            ("EnsLib.HL7.Operation.TCPOperation", "Hl7TcpOperation"),
            ("EnsLib.HL7.Operation.FileOperation", "Hl7FileOperation"),
            // Routers
            ("EnsLib.HL7.MsgRouter.RoutingEngine", "RoutingProcess"),
            ("EnsLib.MsgRouter.RoutingEngine", "RoutingProcess"),
        ];
        for (iris, medway) in defaults {
            class_mapping.insert(iris.to_string(), medway.to_string());
        }
        Self { class_mapping }
    }

    /// Register or override a mapping.
    pub fn register_class_mapping(
        &mut self,
        iris_class: impl Into<String>,
        class_name: impl Into<String>,
    ) {
        self.class_mapping.insert(iris_class.into(), class_name.into());
    }

    /// Map an IRIS class name. Custom (non-EnsLib) classes keep their
    /// name under a `custom.` prefix; unknown EnsLib classes become
    /// `unknown.` stubs.
    pub fn map_class_name(&self, iris_class: &str) -> String {
        if let Some(mapped) = self.class_mapping.get(iris_class) {
            return mapped.clone();
        }
        if !iris_class.starts_with("EnsLib.") {
            return format!("custom.{iris_class}");
        }
        warn!(class = iris_class, "unknown IRIS class, mapping to stub");
        format!("unknown.{iris_class}")
    }

    /// Load from a file, dispatching `.cls` to the XData extractor.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ProductionConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("cls"))
        {
            self.load_from_cls(&content)
        } else {
            self.load_from_xml(&content)
        }
    }

    /// Extract the `XData ProductionDefinition { … }` block and parse it.
    pub fn load_from_cls(&self, cls_content: &str) -> Result<ProductionConfig, ConfigError> {
        let xml = extract_xdata(cls_content).ok_or_else(|| {
            ConfigError::Xml("no XData ProductionDefinition found in .cls file".to_string())
        })?;
        self.load_from_xml(xml)
    }

    /// Parse a `<Production>` XML document.
    pub fn load_from_xml(&self, xml: &str) -> Result<ProductionConfig, ConfigError> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();

        let mut config: Option<ProductionConfig> = None;
        let mut current_item: Option<ItemConfig> = None;
        let mut current_setting: Option<(SettingTarget, String, String)> = None;
        // Production-level child element currently collecting text.
        let mut text_element: Option<String> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => return Err(e.into()),
                Ok(Event::Eof) => break,
                Ok(Event::Start(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    match name.as_str() {
                        "Production" => {
                            let mut production = ProductionConfig::new(
                                get_attr(e, "Name").unwrap_or_else(|| "Unknown".into()),
                            );
                            production.testing_enabled =
                                parse_bool(&get_attr(e, "TestingEnabled").unwrap_or_default());
                            config = Some(production);
                        }
                        "Description" | "ActorPoolSize" => {
                            text_element = Some(name);
                        }
                        "Item" => {
                            current_item = Some(self.parse_item(e));
                        }
                        "Setting" => {
                            current_setting = parse_setting_start(e);
                        }
                        _ => {}
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    match name.as_str() {
                        // Self-closing item: no settings.
                        "Item" => {
                            if let Some(production) = config.as_mut() {
                                production.items.push(self.parse_item(e));
                            }
                        }
                        // Self-closing setting: empty value.
                        "Setting" => {
                            if let (Some((target, setting_name, value)), Some(item)) =
                                (parse_setting_start(e), current_item.as_mut())
                            {
                                item.settings.push(ItemSetting::new(target, setting_name, value));
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(ref e)) => {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if let Some((_, _, value)) = current_setting.as_mut() {
                        value.push_str(&text);
                    } else if let (Some(element), Some(production)) =
                        (text_element.as_deref(), config.as_mut())
                    {
                        match element {
                            "Description" => production.description = text.trim().to_string(),
                            "ActorPoolSize" => {
                                if let Ok(size) = text.trim().parse() {
                                    production.actor_pool_size = size;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    let name = local_name(e.name().as_ref());
                    match name.as_str() {
                        "Setting" => {
                            if let (Some((target, setting_name, value)), Some(item)) =
                                (current_setting.take(), current_item.as_mut())
                            {
                                item.settings.push(ItemSetting::new(
                                    target,
                                    setting_name,
                                    value.trim().to_string(),
                                ));
                            }
                        }
                        "Item" => {
                            if let (Some(item), Some(production)) =
                                (current_item.take(), config.as_mut())
                            {
                                production.items.push(item);
                            }
                        }
                        "Description" | "ActorPoolSize" => {
                            text_element = None;
                        }
                        _ => {}
                    }
                }
                Ok(_) => {}
            }
            buf.clear();
        }

        let config = config
            .ok_or_else(|| ConfigError::Xml("no <Production> element found".to_string()))?;
        info!(
            production = %config.name,
            items = config.items.len(),
            enabled = config.enabled_items().count(),
            "IRIS production loaded"
        );
        Ok(config)
    }

    fn parse_item(&self, e: &BytesStart<'_>) -> ItemConfig {
        let iris_class = get_attr(e, "ClassName").unwrap_or_default();
        let class_name = self.map_class_name(&iris_class);
        let item_type = infer_item_type(&iris_class);

        let mut item =
            ItemConfig::new(get_attr(e, "Name").unwrap_or_default(), class_name, item_type);
        item.pool_size = get_attr(e, "PoolSize")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        item.enabled = get_attr(e, "Enabled").map(|v| parse_bool(&v)).unwrap_or(true);
        item.category = get_attr(e, "Category").unwrap_or_default();
        item.comment = get_attr(e, "Comment").unwrap_or_default();
        item.schedule = get_attr(e, "Schedule").unwrap_or_default();
        item
    }

    /// Serialize a production back to IRIS XML.
    pub fn to_xml(&self, config: &ProductionConfig) -> String {
        let mut out = String::from("<?xml version=\"1.0\"?>\n");
        out.push_str(&format!(
            "<Production Name=\"{}\" TestingEnabled=\"{}\">\n",
            escape(&config.name),
            config.testing_enabled
        ));
        if !config.description.is_empty() {
            out.push_str(&format!("  <Description>{}</Description>\n", escape(&config.description)));
        }
        out.push_str(&format!("  <ActorPoolSize>{}</ActorPoolSize>\n", config.actor_pool_size));
        for item in &config.items {
            out.push_str(&format!(
                "  <Item Name=\"{}\" ClassName=\"{}\" PoolSize=\"{}\" Enabled=\"{}\"",
                escape(&item.name),
                escape(&item.class_name),
                item.pool_size,
                item.enabled
            ));
            if !item.category.is_empty() {
                out.push_str(&format!(" Category=\"{}\"", escape(&item.category)));
            }
            if !item.schedule.is_empty() {
                out.push_str(&format!(" Schedule=\"{}\"", escape(&item.schedule)));
            }
            if item.settings.is_empty() {
                out.push_str(" />\n");
                continue;
            }
            out.push_str(">\n");
            for setting in &item.settings {
                let target = match setting.target {
                    SettingTarget::Adapter => "Adapter",
                    SettingTarget::Host => "Host",
                };
                out.push_str(&format!(
                    "    <Setting Target=\"{target}\" Name=\"{}\">{}</Setting>\n",
                    escape(&setting.name),
                    escape(&setting.value)
                ));
            }
            out.push_str("  </Item>\n");
        }
        out.push_str("</Production>\n");
        out
    }
}

fn parse_setting_start(e: &BytesStart<'_>) -> Option<(SettingTarget, String, String)> {
    let target = match get_attr(e, "Target").as_deref() {
        Some("Adapter") => Some(SettingTarget::Adapter),
        Some("Host") => Some(SettingTarget::Host),
        other => {
            warn!(target = ?other, "invalid setting target, skipping");
            None
        }
    };
    Some((target?, get_attr(e, "Name")?, String::new()))
}

/// Item type from the IRIS class path: `.Service.` is inbound,
/// `.Operation.` outbound, anything else a process.
fn infer_item_type(iris_class: &str) -> ItemType {
    if iris_class.contains(".Service.") || iris_class.ends_with("Service") {
        ItemType::Service
    } else if iris_class.contains(".Operation.") || iris_class.ends_with("Operation") {
        ItemType::Operation
    } else {
        ItemType::Process
    }
}

/// Find `XData ProductionDefinition { … }` by brace matching.
fn extract_xdata(cls: &str) -> Option<&str> {
    let marker = cls.find("XData ProductionDefinition")?;
    let open = cls[marker..].find('{')? + marker;
    let mut depth = 0usize;
    for (offset, ch) in cls[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(cls[open + 1..open + offset].trim());
                }
            }
            _ => {}
        }
    }
    None
}

fn local_name(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

fn get_attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).to_string()
}

#[cfg(test)]
#[path = "iris_tests.rs"]
mod tests;
