use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::error::EngineError;
use crate::models::{BeaconSignal, Capabilities, KnownBeacon, LocationSample, LocationSource};
use crate::settings::FusionSettings;
use crate::store::Store;

pub mod beacons;

use beacons::{fuse, match_known_beacons};

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Cache-served fixes are worth at most this much confidence.
const STALE_CONFIDENCE_CAP: f64 = 40.0;

/// A raw platform GPS fix.
#[derive(Debug, Clone, Copy)]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
}

/// Platform GPS access. Implementations should resolve promptly on
/// `PermissionDenied`; the engine enforces the timeout either way.
pub trait GpsProvider: Send + Sync + 'static {
    fn request_fix(
        &self,
        employee_id: &str,
    ) -> impl Future<Output = Result<GpsFix, EngineError>> + Send;
}

/// Platform Bluetooth scan access.
pub trait BeaconScanner: Send + Sync + 'static {
    fn scan(&self) -> impl Future<Output = Result<Vec<BeaconSignal>, EngineError>> + Send;
}

/// Obtains one positional estimate per scheduler tick.
///
/// Chain: GPS with bounded timeout, then Bluetooth beacon trilateration, then
/// the last-known cache with a staleness flag. `PermissionDenied` surfaces
/// immediately; `Timeout`/`NoSignal` fall through; only a full-chain miss
/// reports `NoSignal` to the scheduler.
pub struct FusionEngine<G, B> {
    gps: G,
    scanner: B,
    capabilities: Capabilities,
    beacon_registry: Vec<KnownBeacon>,
    settings: FusionSettings,
    store: Store,
}

impl<G: GpsProvider, B: BeaconScanner> FusionEngine<G, B> {
    pub fn new(
        gps: G,
        scanner: B,
        capabilities: Capabilities,
        beacon_registry: Vec<KnownBeacon>,
        settings: FusionSettings,
        store: Store,
    ) -> Self {
        Self {
            gps,
            scanner,
            capabilities,
            beacon_registry,
            settings,
            store,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub async fn acquire(&self, employee_id: &str) -> Result<LocationSample, EngineError> {
        if self.capabilities.has_gps {
            match self.try_gps(employee_id).await {
                Ok(sample) => return Ok(sample),
                Err(err @ EngineError::PermissionDenied { .. }) => return Err(err),
                Err(err) => {
                    log_info!("GPS unavailable for {employee_id} ({err}), trying Bluetooth");
                }
            }
        }

        if self.capabilities.has_bluetooth {
            match self.try_bluetooth(employee_id).await {
                Ok(sample) => return Ok(sample),
                Err(err @ EngineError::PermissionDenied { .. }) => return Err(err),
                Err(err) => {
                    log_info!("Bluetooth unavailable for {employee_id} ({err}), trying last known");
                }
            }
        }

        self.try_last_known(employee_id).await
    }

    async fn try_gps(&self, employee_id: &str) -> Result<LocationSample, EngineError> {
        let timeout = Duration::from_millis(self.settings.gps_timeout_ms);
        let fix = tokio::time::timeout(timeout, self.gps.request_fix(employee_id))
            .await
            .map_err(|_| EngineError::Timeout {
                waited_ms: self.settings.gps_timeout_ms,
            })??;

        let confidence = (100.0 - fix.accuracy_meters).clamp(0.0, 100.0);
        Ok(LocationSample::new(
            employee_id,
            fix.lat,
            fix.lng,
            fix.accuracy_meters,
            LocationSource::Gps,
            confidence,
        ))
    }

    async fn try_bluetooth(&self, employee_id: &str) -> Result<LocationSample, EngineError> {
        let timeout = Duration::from_millis(self.settings.bluetooth_scan_timeout_ms);
        let signals = tokio::time::timeout(timeout, self.scanner.scan())
            .await
            .map_err(|_| EngineError::Timeout {
                waited_ms: self.settings.bluetooth_scan_timeout_ms,
            })??;

        let observations = match_known_beacons(
            &signals,
            &self.beacon_registry,
            self.settings.beacon_tx_power_dbm,
            self.settings.path_loss_exponent,
        );

        let fix = fuse(&observations).ok_or(EngineError::NoSignal)?;

        log_info!(
            "Fused {} beacon(s) for {employee_id}: accuracy {:.1} m, confidence {:.0}",
            observations.len(),
            fix.accuracy_meters,
            fix.confidence
        );

        Ok(LocationSample::new(
            employee_id,
            fix.lat,
            fix.lng,
            fix.accuracy_meters,
            LocationSource::Bluetooth,
            fix.confidence,
        ))
    }

    async fn try_last_known(&self, employee_id: &str) -> Result<LocationSample, EngineError> {
        let cached = self
            .store
            .last_known(employee_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::NoSignal)?;

        let age_secs = (Utc::now() - cached.timestamp).num_seconds().max(0) as u64;
        if age_secs > self.settings.last_known_max_age_secs {
            log_warn!(
                "Last-known fix for {employee_id} is {age_secs}s old, past the {}s limit",
                self.settings.last_known_max_age_secs
            );
            return Err(EngineError::NoSignal);
        }

        Ok(LocationSample {
            source: LocationSource::Stale,
            confidence: (cached.confidence * 0.5).min(STALE_CONFIDENCE_CAP),
            ..cached
        })
    }
}
