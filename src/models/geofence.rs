use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GeofenceType {
    Office,
    FieldSite,
    Home,
}

impl GeofenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceType::Office => "office",
            GeofenceType::FieldSite => "field_site",
            GeofenceType::Home => "home",
        }
    }
}

/// Circular workplace area. Reference data, managed by the host application;
/// read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceArea {
    pub id: String,
    pub name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    /// Must be > 0; zero-radius areas are rejected at load time.
    pub radius_meters: f64,
    pub kind: GeofenceType,
}

/// Outcome of checking one sample against the registered geofence set.
/// When no geofence is satisfied the nearest one is still reported so the
/// caller can render "N m outside <name>".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub sample_id: String,
    pub geofence_id: Option<String>,
    pub is_valid: bool,
    /// Distance to the reported geofence. `None` only when no geofences are
    /// registered at all.
    pub distance_meters: Option<f64>,
    pub message: String,
}
