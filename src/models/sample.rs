use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LocationSource {
    Gps,
    Bluetooth,
    Fused,
    /// Last-known cache fallback; the position may no longer reflect reality.
    Stale,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::Gps => "gps",
            LocationSource::Bluetooth => "bluetooth",
            LocationSource::Fused => "fused",
            LocationSource::Stale => "stale",
        }
    }
}

/// A single positional estimate produced by one scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub id: String,
    pub employee_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    pub source: LocationSource,
    /// 0-100 trust score; always clamped by the producer.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(
        employee_id: impl Into<String>,
        lat: f64,
        lng: f64,
        accuracy_meters: f64,
        source: LocationSource,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: employee_id.into(),
            lat,
            lng,
            accuracy_meters,
            source,
            confidence: confidence.clamp(0.0, 100.0),
            timestamp: Utc::now(),
        }
    }
}

/// One beacon sighting from a Bluetooth scan. Transient: produced by the
/// scanner, consumed immediately by fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconSignal {
    pub beacon_id: String,
    pub rssi: f64,
}

/// Registered beacon with a surveyed position, matched against scan results
/// by id signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownBeacon {
    pub beacon_id: String,
    pub lat: f64,
    pub lng: f64,
    /// Survey accuracy of the beacon's own position, meters.
    pub position_accuracy_meters: f64,
    pub label: String,
}

/// Typed capability probe for the host platform. Fusion branches on this
/// explicit set rather than probing for sensors ad hoc.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub has_gps: bool,
    pub has_bluetooth: bool,
    pub has_battery: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            has_gps: true,
            has_bluetooth: true,
            has_battery: true,
        }
    }
}
