use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::models::TrackingTier;

/// Nominal polling intervals per tier, seconds. Must be strictly ordered
/// high < standard < low.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierIntervals {
    pub high_secs: u64,
    pub standard_secs: u64,
    pub low_secs: u64,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            high_secs: 180,
            standard_secs: 600,
            low_secs: 1800,
        }
    }
}

impl TierIntervals {
    pub fn for_tier(&self, tier: TrackingTier) -> Option<u64> {
        match tier {
            TrackingTier::High => Some(self.high_secs),
            TrackingTier::Standard => Some(self.standard_secs),
            TrackingTier::Low => Some(self.low_secs),
            TrackingTier::Disabled => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.high_secs < self.standard_secs && self.standard_secs < self.low_secs) {
            bail!(
                "tier intervals must satisfy high < standard < low (got {}, {}, {})",
                self.high_secs,
                self.standard_secs,
                self.low_secs
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionSettings {
    pub gps_timeout_ms: u64,
    pub bluetooth_scan_timeout_ms: u64,
    /// Reference transmit power at 1 m, dBm.
    pub beacon_tx_power_dbm: f64,
    /// Path-loss exponent; ~2.0 free space, higher indoors.
    pub path_loss_exponent: f64,
    /// A fix from the last-known cache older than this is flagged stale.
    pub last_known_max_age_secs: u64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            gps_timeout_ms: 10_000,
            bluetooth_scan_timeout_ms: 8_000,
            beacon_tx_power_dbm: -59.0,
            path_loss_exponent: 2.0,
            last_known_max_age_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Backoff multiplier cap relative to the nominal interval.
    pub backoff_cap_factor: u32,
    /// Max simultaneous in-flight GPS/Bluetooth/network operations.
    pub max_concurrent_acquisitions: usize,
    /// Random spread applied to due times, fraction of the interval.
    pub jitter_fraction: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            backoff_cap_factor: 8,
            max_concurrent_acquisitions: 16,
            jitter_fraction: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    pub retry_cap: u32,
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            retry_cap: 5,
            capacity: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSettings {
    /// Cap on the accuracy-based leniency added to a geofence radius, meters.
    pub max_leniency_meters: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_leniency_meters: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostParameters {
    pub work_minutes_per_day: u64,
    pub working_days_per_month: u64,
    /// Price per 1000 location updates, in the org's billing currency.
    pub unit_price_per_thousand: f64,
    /// Historical biometric terminal headroom, used to back out the
    /// non-biometric employee count. Operational approximation, not a
    /// business rule.
    pub max_biometric_capacity: u64,
}

impl Default for CostParameters {
    fn default() -> Self {
        Self {
            work_minutes_per_day: 480,
            working_days_per_month: 26,
            unit_price_per_thousand: 5.0,
            max_biometric_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub intervals: TierIntervals,
    pub fusion: FusionSettings,
    pub scheduler: SchedulerSettings,
    pub queue: QueueSettings,
    pub validation: ValidationSettings,
    pub cost: CostParameters,
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        self.intervals.validate()
    }
}

/// JSON-file-backed settings store. A missing or unreadable file falls back
/// to defaults rather than refusing to start.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            EngineSettings::default()
        };

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        store.current().validate()?;
        Ok(store)
    }

    /// Settings held only in memory, for tests and embedded use.
    pub fn in_memory(settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            path: PathBuf::new(),
            data: RwLock::new(settings),
        })
    }

    pub fn current(&self) -> EngineSettings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        settings.validate()?;
        {
            let mut guard = self.data.write().unwrap();
            *guard = settings;
            if !self.path.as_os_str().is_empty() {
                self.persist(&guard)?;
            }
        }
        Ok(())
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
