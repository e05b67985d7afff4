//! The cacheable record contract and the raw value types shared by all caches.
//!
//! Every record type is `Clone`; listeners and readers always receive a copy,
//! never the cache-resident value.
use serde::{Deserialize, Serialize};
use std::fmt;

/// cache key
pub type Id = i64;

/// epoch millis
pub type Timestamp = i64;

/// The unit of state held by a cache.
///
/// `id` must never change once the record exists. `cache_timestamp` is
/// stamped by the cache on every write.
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn id(&self) -> Id;

    fn cache_timestamp(&self) -> Option<Timestamp>;

    fn set_cache_timestamp(&mut self, timestamp: Timestamp);
}

/// A tag value as delivered by a DAQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            TagValue::Int(n) => Some(*n != 0),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(n) => write!(f, "{}", n),
            TagValue::Float(x) => write!(f, "{}", x),
            TagValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStatus {
    #[default]
    Ok,
    Uncertain,
    Inaccessible,
    ValueOutOfBounds,
    Unknown,
    ProcessDown,
    EquipmentDown,
    SubEquipmentDown,
}

/// Quality flags attached to a value.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagQuality {
    pub status: QualityStatus,
    pub description: Option<String>,
}

impl TagQuality {
    pub fn ok() -> TagQuality {
        TagQuality::default()
    }

    pub fn invalid(status: QualityStatus, description: &str) -> TagQuality {
        TagQuality {
            status,
            description: Some(description.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == QualityStatus::Ok
    }
}

/// A raw value update as received from the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUpdate {
    pub id: Id,
    pub value: TagValue,
    #[serde(default)]
    pub quality: TagQuality,
    pub source_timestamp: Option<Timestamp>,
    pub daq_timestamp: Option<Timestamp>,
}

impl RawUpdate {
    pub fn new(id: Id, value: TagValue, source_timestamp: Timestamp) -> RawUpdate {
        RawUpdate {
            id,
            value,
            quality: TagQuality::ok(),
            source_timestamp: Some(source_timestamp),
            daq_timestamp: None,
        }
    }

    /// The earliest of the daq and source timestamps, if either is set.
    pub fn effective_timestamp(&self) -> Option<Timestamp> {
        match (self.daq_timestamp, self.source_timestamp) {
            (Some(daq), Some(src)) => Some(daq.min(src)),
            (Some(ts), None) | (None, Some(ts)) => Some(ts),
            (None, None) => None,
        }
    }
}
