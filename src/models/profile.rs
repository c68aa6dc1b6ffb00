use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TrackingTier {
    High,
    Standard,
    Low,
    Disabled,
}

impl TrackingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingTier::High => "high",
            TrackingTier::Standard => "standard",
            TrackingTier::Low => "low",
            TrackingTier::Disabled => "disabled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "high" => Some(TrackingTier::High),
            "standard" => Some(TrackingTier::Standard),
            "low" => Some(TrackingTier::Low),
            "disabled" => Some(TrackingTier::Disabled),
            _ => None,
        }
    }
}

impl Default for TrackingTier {
    fn default() -> Self {
        TrackingTier::Standard
    }
}

/// One tracking profile per employee. Never deleted; tier flips to
/// `Disabled` on termination so history stays attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingProfile {
    pub employee_id: String,
    pub tier: TrackingTier,
    pub polling_interval_secs: u64,
    /// Set when an admin pinned this profile manually; bulk reclassification
    /// skips overridden profiles.
    pub override_flag: bool,
    pub tracking_enabled: bool,
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl TrackingProfile {
    pub fn new(employee_id: impl Into<String>, tier: TrackingTier, interval_secs: u64) -> Self {
        Self {
            employee_id: employee_id.into(),
            tier,
            polling_interval_secs: interval_secs,
            override_flag: false,
            tracking_enabled: tier != TrackingTier::Disabled,
            last_sample_at: None,
        }
    }
}

/// Employee attributes the classifier looks at. The wider HR record lives in
/// the host application; the engine only ever sees this slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeAttributes {
    pub employee_id: String,
    pub department: String,
    pub designation: String,
    pub override_tier: Option<TrackingTier>,
}
