//! Output record construction
//!
//! Each output type has its own constructor taking every field the record
//! cannot do without. UTC information is filled in later by the timezone
//! offset utility, and `finalize` refuses records where that never happened.

use crate::types::{DecoderError, Result, Units};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Device time format used in output records (no offset)
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a device-local time the way output records carry it
pub fn format_device_time(time: &NaiveDateTime) -> String {
    time.format(DEVICE_TIME_FORMAT).to_string()
}

/// Annotation attached to an output record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl Annotation {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: None,
            threshold: None,
        }
    }
}

/// Payload of a device clock change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeChange {
    pub from: String,
    pub to: String,
    pub agent: String,
}

/// Device event sub types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceEventType {
    TimeChange,
}

/// Type-specific part of an output record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordKind {
    /// Continuous glucose sample
    Cbg { value: f64, units: Units },
    /// Blood glucose meter reading
    Smbg { value: f64, units: Units },
    BloodKetone { value: f64, units: Units },
    DeviceEvent {
        #[serde(rename = "subType")]
        sub_type: DeviceEventType,
        change: TimeChange,
    },
}

impl RecordKind {
    /// Name of the output type, as serialized
    pub fn type_name(&self) -> &'static str {
        match self {
            RecordKind::Cbg { .. } => "cbg",
            RecordKind::Smbg { .. } => "smbg",
            RecordKind::BloodKetone { .. } => "bloodKetone",
            RecordKind::DeviceEvent { .. } => "deviceEvent",
        }
    }
}

/// UTC placement of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtcInfo {
    /// ISO-8601 UTC time
    pub time: String,
    /// Minutes east of UTC
    pub timezone_offset: i32,
    pub conversion_offset: i64,
    /// Milliseconds the device clock was off, beyond the timezone offset
    pub clock_drift_offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub log_indices: Vec<u32>,
}

/// A finished output record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    #[serde(flatten)]
    pub kind: RecordKind,
    pub device_time: String,
    pub time: String,
    pub timezone_offset: i32,
    pub conversion_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_drift_offset: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    pub payload: Payload,
    /// Database record number the record was built from
    #[serde(skip)]
    pub index: u32,
}

/// Pending output record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBuilder {
    kind: RecordKind,
    device_time: NaiveDateTime,
    index: u32,
    utc: Option<UtcInfo>,
    annotations: Vec<Annotation>,
}

impl RecordBuilder {
    fn new(kind: RecordKind, device_time: NaiveDateTime, index: u32) -> Self {
        Self {
            kind,
            device_time,
            index,
            utc: None,
            annotations: Vec::new(),
        }
    }

    /// Continuous glucose sample in mg/dL
    pub fn cbg(value: f64, device_time: NaiveDateTime, index: u32) -> Self {
        Self::new(
            RecordKind::Cbg {
                value,
                units: Units::MgPerDl,
            },
            device_time,
            index,
        )
    }

    /// Blood glucose reading in mg/dL
    pub fn smbg(value: f64, device_time: NaiveDateTime, index: u32) -> Self {
        Self::new(
            RecordKind::Smbg {
                value,
                units: Units::MgPerDl,
            },
            device_time,
            index,
        )
    }

    /// Blood ketone reading in mmol/L
    pub fn blood_ketone(value: f64, device_time: NaiveDateTime, index: u32) -> Self {
        Self::new(
            RecordKind::BloodKetone {
                value,
                units: Units::MmolPerL,
            },
            device_time,
            index,
        )
    }

    /// Device clock change; `device_time` is the clock after the change
    pub fn time_change(change: TimeChange, device_time: NaiveDateTime, index: u32) -> Self {
        Self::new(
            RecordKind::DeviceEvent {
                sub_type: DeviceEventType::TimeChange,
                change,
            },
            device_time,
            index,
        )
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    pub fn device_time(&self) -> NaiveDateTime {
        self.device_time
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Measurement value, if this is a measurement record
    pub fn value(&self) -> Option<f64> {
        match &self.kind {
            RecordKind::Cbg { value, .. }
            | RecordKind::Smbg { value, .. }
            | RecordKind::BloodKetone { value, .. } => Some(*value),
            RecordKind::DeviceEvent { .. } => None,
        }
    }

    /// Replace the measurement value; no-op on device events
    pub fn set_value(&mut self, new_value: f64) {
        match &mut self.kind {
            RecordKind::Cbg { value, .. }
            | RecordKind::Smbg { value, .. }
            | RecordKind::BloodKetone { value, .. } => *value = new_value,
            RecordKind::DeviceEvent { .. } => {}
        }
    }

    /// Clock change payload, if this is a time change event
    pub fn change(&self) -> Option<&TimeChange> {
        match &self.kind {
            RecordKind::DeviceEvent { change, .. } => Some(change),
            _ => None,
        }
    }

    /// Attach an annotation unless one with the same code is already present
    pub fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.iter().any(|a| a.code == annotation.code) {
            self.annotations.push(annotation);
        }
    }

    pub fn fill_utc(&mut self, utc: UtcInfo) {
        self.utc = Some(utc);
    }

    pub fn utc(&self) -> Option<&UtcInfo> {
        self.utc.as_ref()
    }

    /// Check required fields and produce the output record
    pub fn finalize(self) -> Result<DomainRecord> {
        let utc = self.utc.ok_or(DecoderError::MissingField {
            record_type: self.kind.type_name(),
            field: "time",
        })?;

        Ok(DomainRecord {
            device_time: format_device_time(&self.device_time),
            time: utc.time,
            timezone_offset: utc.timezone_offset,
            conversion_offset: utc.conversion_offset,
            clock_drift_offset: utc.clock_drift_offset,
            annotations: self.annotations,
            payload: Payload {
                log_indices: vec![self.index],
            },
            index: self.index,
            kind: self.kind,
        })
    }
}
