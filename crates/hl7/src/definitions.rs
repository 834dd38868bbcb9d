// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Segment, field, and message-type definitions plus the standard v2.4 tables.

use std::collections::BTreeSet;

/// Definition of a field within a segment (1-indexed position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub position: usize,
    pub name: &'static str,
    pub data_type: &'static str,
    pub max_length: Option<usize>,
    pub required: bool,
    pub repeating: bool,
}

impl FieldDef {
    const fn new(position: usize, name: &'static str, data_type: &'static str) -> Self {
        Self { position, name, data_type, max_length: None, required: false, repeating: false }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }

    const fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// Definition of an HL7 segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDef {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldDef>,
}

impl SegmentDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), fields: Vec::new() }
    }

    pub fn with_fields(mut self, fields: Vec<FieldDef>) -> Self {
        self.fields = fields;
        self
    }

    pub fn field(&self, position: usize) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.position == position)
    }
}

/// Definition of an HL7 message type: ordered segment list plus which
/// segments are required or may repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeDef {
    pub name: String,
    pub description: String,
    pub segments: Vec<String>,
    pub required_segments: BTreeSet<String>,
    pub repeating_segments: BTreeSet<String>,
}

impl MessageTypeDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            segments: Vec::new(),
            repeating_segments: BTreeSet::new(),
            required_segments: BTreeSet::new(),
        }
    }

    pub fn with_segments(mut self, segments: &[&str]) -> Self {
        self.segments = segments.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required_segments = required.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_repeating(mut self, repeating: &[&str]) -> Self {
        self.repeating_segments = repeating.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Standard v2.4 segment definitions.
pub fn standard_segments() -> Vec<SegmentDef> {
    vec![
        SegmentDef::new("MSH", "Message Header").with_fields(vec![
            FieldDef::new(1, "FieldSeparator", "ST").required().max_length(1),
            FieldDef::new(2, "EncodingCharacters", "ST").required().max_length(4),
            FieldDef::new(3, "SendingApplication", "HD"),
            FieldDef::new(4, "SendingFacility", "HD"),
            FieldDef::new(5, "ReceivingApplication", "HD"),
            FieldDef::new(6, "ReceivingFacility", "HD"),
            FieldDef::new(7, "DateTimeOfMessage", "TS").required(),
            FieldDef::new(8, "Security", "ST"),
            FieldDef::new(9, "MessageType", "MSG").required(),
            FieldDef::new(10, "MessageControlID", "ST").required(),
            FieldDef::new(11, "ProcessingID", "PT").required(),
            FieldDef::new(12, "VersionID", "VID").required(),
        ]),
        SegmentDef::new("EVN", "Event Type").with_fields(vec![
            FieldDef::new(1, "EventTypeCode", "ID"),
            FieldDef::new(2, "RecordedDateTime", "TS"),
            FieldDef::new(3, "DateTimePlannedEvent", "TS"),
            FieldDef::new(4, "EventReasonCode", "IS"),
            FieldDef::new(5, "OperatorID", "XCN").repeating(),
            FieldDef::new(6, "EventOccurred", "TS"),
        ]),
        SegmentDef::new("PID", "Patient Identification").with_fields(vec![
            FieldDef::new(1, "SetID", "SI"),
            FieldDef::new(2, "PatientID", "CX"),
            FieldDef::new(3, "PatientIdentifierList", "CX").repeating(),
            FieldDef::new(4, "AlternatePatientID", "CX"),
            FieldDef::new(5, "PatientName", "XPN").repeating(),
            FieldDef::new(6, "MothersMaidenName", "XPN"),
            FieldDef::new(7, "DateTimeOfBirth", "TS"),
            FieldDef::new(8, "AdministrativeSex", "IS"),
            FieldDef::new(11, "PatientAddress", "XAD").repeating(),
            FieldDef::new(13, "PhoneNumberHome", "XTN").repeating(),
            FieldDef::new(18, "PatientAccountNumber", "CX"),
            FieldDef::new(19, "SSNNumber", "ST"),
        ]),
        SegmentDef::new("PV1", "Patient Visit").with_fields(vec![
            FieldDef::new(1, "SetID", "SI"),
            FieldDef::new(2, "PatientClass", "IS").required(),
            FieldDef::new(3, "AssignedPatientLocation", "PL"),
            FieldDef::new(4, "AdmissionType", "IS"),
            FieldDef::new(7, "AttendingDoctor", "XCN").repeating(),
            FieldDef::new(8, "ReferringDoctor", "XCN").repeating(),
            FieldDef::new(10, "HospitalService", "IS"),
            FieldDef::new(19, "VisitNumber", "CX"),
            FieldDef::new(44, "AdmitDateTime", "TS"),
            FieldDef::new(45, "DischargeDateTime", "TS"),
        ]),
        SegmentDef::new("OBR", "Observation Request").with_fields(vec![
            FieldDef::new(1, "SetID", "SI"),
            FieldDef::new(2, "PlacerOrderNumber", "EI"),
            FieldDef::new(3, "FillerOrderNumber", "EI"),
            FieldDef::new(4, "UniversalServiceIdentifier", "CE").required(),
        ]),
        SegmentDef::new("OBX", "Observation/Result").with_fields(vec![
            FieldDef::new(1, "SetID", "SI"),
            FieldDef::new(2, "ValueType", "ID"),
            FieldDef::new(3, "ObservationIdentifier", "CE").required(),
            FieldDef::new(4, "ObservationSubID", "ST"),
            FieldDef::new(5, "ObservationValue", "varies").repeating(),
            FieldDef::new(6, "Units", "CE"),
            FieldDef::new(7, "ReferencesRange", "ST"),
            FieldDef::new(8, "AbnormalFlags", "IS").repeating(),
            FieldDef::new(11, "ObservationResultStatus", "ID").required(),
        ]),
        SegmentDef::new("MSA", "Message Acknowledgment").with_fields(vec![
            FieldDef::new(1, "AcknowledgmentCode", "ID").required(),
            FieldDef::new(2, "MessageControlID", "ST").required(),
            FieldDef::new(3, "TextMessage", "ST"),
        ]),
    ]
}

/// Standard v2.4 message type definitions.
pub fn standard_message_types() -> Vec<MessageTypeDef> {
    let adt = |name: &str, description: &str| {
        MessageTypeDef::new(name, description)
            .with_segments(&["MSH", "EVN", "PID", "PV1"])
            .with_required(&["MSH", "EVN", "PID", "PV1"])
    };
    vec![
        adt("ADT_A01", "Admit/Visit Notification"),
        adt("ADT_A02", "Transfer a Patient"),
        adt("ADT_A03", "Discharge/End Visit"),
        adt("ADT_A04", "Register a Patient"),
        adt("ADT_A08", "Update Patient Information"),
        MessageTypeDef::new("ORU_R01", "Unsolicited Observation Result")
            .with_segments(&["MSH", "PID", "PV1", "OBR", "OBX"])
            .with_required(&["MSH"])
            .with_repeating(&["OBR", "OBX"]),
        MessageTypeDef::new("ORM_O01", "Order Message")
            .with_segments(&["MSH", "PID", "PV1", "OBR"])
            .with_required(&["MSH"]),
        MessageTypeDef::new("ACK", "General Acknowledgment")
            .with_segments(&["MSH", "MSA"])
            .with_required(&["MSH", "MSA"]),
    ]
}
