use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::fusion::{BeaconScanner, FusionEngine, GpsProvider};
use crate::geofence;
use crate::models::{ActionType, GeofenceArea, LocationSample, TrackingProfile, ValidationResult};
use crate::queue::{Dispatcher, SyncQueue};
use crate::settings::SettingsStore;
use crate::store::Store;

use super::{backoff_interval_secs, PollSchedule};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

/// Latest position and validation for one employee, for the map collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPosition {
    pub sample: LocationSample,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub running: bool,
    pub paused: bool,
    pub tracked_employees: usize,
}

/// Profile-change signal from the admin surface to a running controller.
/// Bulk reclassification and overrides mark it; the scheduler driver re-syncs
/// tracked employees from the store so the next tick uses the new interval.
#[derive(Clone)]
pub struct ProfileChangeFeed {
    tx: Arc<watch::Sender<u64>>,
}

impl ProfileChangeFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_changed(&self) {
        self.tx.send_modify(|version| *version += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for ProfileChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

struct EmployeeState {
    nominal_interval_secs: u64,
    consecutive_failures: u32,
    in_flight: bool,
    cancel: CancellationToken,
}

/// Adaptive polling orchestrator. One logical timer per enabled profile,
/// realized as a single min-heap driven by one task; each due poll runs
/// fusion, validates, and hands the event to the sync queue.
pub struct TrackingController<G, B, D> {
    fusion: Arc<FusionEngine<G, B>>,
    queue: Arc<SyncQueue<D>>,
    store: Store,
    settings: Arc<SettingsStore>,
    geofences: StdRwLock<Vec<GeofenceArea>>,
    schedule: StdMutex<PollSchedule>,
    states: StdMutex<HashMap<String, EmployeeState>>,
    latest: StdRwLock<HashMap<String, TrackedPosition>>,
    paused: AtomicBool,
    acquisition_permits: Arc<Semaphore>,
    wake: Notify,
    profile_changes: ProfileChangeFeed,
    shutdown_token: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<G, B, D> TrackingController<G, B, D>
where
    G: GpsProvider,
    B: BeaconScanner,
    D: Dispatcher,
{
    pub fn new(
        fusion: Arc<FusionEngine<G, B>>,
        queue: Arc<SyncQueue<D>>,
        store: Store,
        settings: Arc<SettingsStore>,
        geofences: Vec<GeofenceArea>,
        profile_changes: ProfileChangeFeed,
    ) -> Self {
        let permits = settings.current().scheduler.max_concurrent_acquisitions;
        Self {
            fusion,
            queue,
            store,
            settings,
            geofences: StdRwLock::new(geofences),
            schedule: StdMutex::new(PollSchedule::new()),
            states: StdMutex::new(HashMap::new()),
            latest: StdRwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
            acquisition_permits: Arc::new(Semaphore::new(permits)),
            wake: Notify::new(),
            profile_changes,
            shutdown_token: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Load enabled profiles from the store and start the driver task.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let profiles = self.store.enabled_profiles().await?;
        for profile in &profiles {
            self.track_employee(profile);
        }

        let mut driver_guard = self.driver.lock().await;
        if driver_guard.is_some() {
            return Ok(());
        }

        let controller = Arc::clone(self);
        *driver_guard = Some(tokio::spawn(async move {
            controller.drive().await;
        }));

        log_info!("Tracking scheduler started with {} profiles", profiles.len());
        Ok(())
    }

    /// Begin (or refresh) tracking for one employee. Resets backoff and
    /// supersedes any scheduled poll with one at the profile's interval.
    pub fn track_employee(&self, profile: &TrackingProfile) {
        if !profile.tracking_enabled {
            self.stop_employee(&profile.employee_id);
            return;
        }

        let interval = profile.polling_interval_secs;
        {
            let mut states = self.states.lock().unwrap();
            match states.get_mut(&profile.employee_id) {
                Some(state) => {
                    state.nominal_interval_secs = interval;
                    state.consecutive_failures = 0;
                }
                None => {
                    states.insert(
                        profile.employee_id.clone(),
                        EmployeeState {
                            nominal_interval_secs: interval,
                            consecutive_failures: 0,
                            in_flight: false,
                            cancel: self.shutdown_token.child_token(),
                        },
                    );
                }
            }
        }

        self.reschedule(&profile.employee_id, interval);
    }

    /// Stop tracking one employee: invalidates any scheduled poll and
    /// cancels an in-flight acquisition so no sensor subscription dangles
    /// and no stale sample lands after the stop.
    pub fn stop_employee(&self, employee_id: &str) {
        // The latest-position entry is cleared under the same lock a commit
        // publishes under, so a racing commit either loses its entry here or
        // is skipped entirely.
        let state = {
            let mut states = self.states.lock().unwrap();
            let state = states.remove(employee_id);
            if state.is_some() {
                self.latest.write().unwrap().remove(employee_id);
            }
            state
        };
        if let Some(state) = state {
            state.cancel.cancel();
        }
        self.schedule.lock().unwrap().cancel(employee_id);
        self.wake.notify_one();
        log_info!("Stopped tracking for {employee_id}");
    }

    /// Suspend all polling without touching tier assignments.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        log_info!("Tracking globally paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        log_info!("Tracking globally resumed");
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            running: !self.shutdown_token.is_cancelled(),
            paused: self.paused.load(Ordering::SeqCst),
            tracked_employees: self.states.lock().unwrap().len(),
        }
    }

    /// Latest sample + validation for the map collaborator. Read-only.
    pub fn latest(&self, employee_id: &str) -> Option<TrackedPosition> {
        self.latest.read().unwrap().get(employee_id).cloned()
    }

    /// Current effective interval (nominal with backoff applied), seconds.
    pub fn effective_interval_secs(&self, employee_id: &str) -> Option<u64> {
        let cap = self.settings.current().scheduler.backoff_cap_factor;
        self.states.lock().unwrap().get(employee_id).map(|state| {
            backoff_interval_secs(state.nominal_interval_secs, state.consecutive_failures, cap)
        })
    }

    pub fn set_geofences(&self, geofences: Vec<GeofenceArea>) {
        *self.geofences.write().unwrap() = geofences;
    }

    /// Re-sync tracked employees with the profile store. Called after bulk
    /// reclassification or an admin override so the next tick uses the new
    /// interval.
    pub async fn refresh_from_store(self: &Arc<Self>) -> Result<()> {
        let profiles = self.store.enabled_profiles().await?;

        let stale: Vec<String> = {
            let states = self.states.lock().unwrap();
            states
                .keys()
                .filter(|id| !profiles.iter().any(|p| &p.employee_id == *id))
                .cloned()
                .collect()
        };
        for employee_id in stale {
            self.stop_employee(&employee_id);
        }

        for profile in &profiles {
            self.track_employee(profile);
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.wake.notify_one();
        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(err) = handle.await {
                log_error!("Scheduler driver failed to join: {err}");
            }
        }
    }

    async fn drive(self: Arc<Self>) {
        let mut profile_changes = self.profile_changes.subscribe();
        loop {
            let next_due = self.schedule.lock().unwrap().next_due();

            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    log_info!("Scheduler driver shutting down");
                    break;
                }
                _ = self.wake.notified() => {
                    // Schedule changed; recompute the earliest deadline.
                }
                _ = profile_changes.changed() => {
                    // The sender lives on self, so this arm never closes.
                    if let Err(err) = self.refresh_from_store().await {
                        log_warn!("Profile refresh after admin change failed: {err}");
                    }
                }
                _ = sleep_until_or_forever(next_due) => {
                    let due = self
                        .schedule
                        .lock()
                        .unwrap()
                        .pop_due(Instant::now());
                    for (employee_id, generation) in due {
                        let controller = Arc::clone(&self);
                        tokio::spawn(async move {
                            controller.handle_tick(employee_id, generation).await;
                        });
                    }
                }
            }
        }
    }

    async fn handle_tick(self: Arc<Self>, employee_id: String, generation: u64) {
        // Global pause: skip with no side effects, keep the timer alive.
        if self.paused.load(Ordering::SeqCst) {
            if let Some(interval) = self.effective_interval_secs(&employee_id) {
                self.reschedule(&employee_id, interval);
            }
            return;
        }

        let (interval, cancel) = {
            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(&employee_id) else {
                return; // stopped between scheduling and firing
            };

            if state.in_flight {
                // Previous acquisition still pending: drop this tick rather
                // than queue it, to bound concurrent sensor usage.
                log_info!("Dropping overlapping tick for {employee_id}");
                let cap = self.settings.current().scheduler.backoff_cap_factor;
                let interval = backoff_interval_secs(
                    state.nominal_interval_secs,
                    state.consecutive_failures,
                    cap,
                );
                drop(states);
                self.reschedule(&employee_id, interval);
                return;
            }

            state.in_flight = true;
            (state.nominal_interval_secs, state.cancel.clone())
        };

        let Ok(_permit) = self.acquisition_permits.acquire().await else {
            return; // semaphore closed only on shutdown
        };

        // The permit spans the whole tick, dispatch included: acquisition and
        // outward network IO count against the same concurrency bound.
        let outcome = tokio::select! {
            result = self.fusion.acquire(&employee_id) => Some(result),
            _ = cancel.cancelled() => None,
        };

        let Some(result) = outcome else {
            // Cancelled mid-acquisition; the sensor future was dropped and
            // nothing may be written.
            return;
        };

        // A stop or reschedule since this tick fired invalidates the commit.
        let still_current = self
            .schedule
            .lock()
            .unwrap()
            .current_generation(&employee_id)
            == Some(generation);
        if !still_current {
            if let Some(state) = self.states.lock().unwrap().get_mut(&employee_id) {
                state.in_flight = false;
            }
            return;
        }

        match result {
            Ok(sample) => {
                self.commit_sample(&employee_id, sample).await;
                let next = {
                    let mut states = self.states.lock().unwrap();
                    let Some(state) = states.get_mut(&employee_id) else {
                        return;
                    };
                    state.in_flight = false;
                    state.consecutive_failures = 0;
                    state.nominal_interval_secs
                };
                self.reschedule(&employee_id, next);
            }
            Err(err) => {
                if let EngineError::PermissionDenied { .. } = err {
                    log_error!("Cannot sample {employee_id}: {err}");
                } else {
                    log_warn!("Fusion failed for {employee_id}: {err}");
                }

                let cap = self.settings.current().scheduler.backoff_cap_factor;
                let next = {
                    let mut states = self.states.lock().unwrap();
                    let Some(state) = states.get_mut(&employee_id) else {
                        return;
                    };
                    state.in_flight = false;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    backoff_interval_secs(interval, state.consecutive_failures, cap)
                };
                self.reschedule(&employee_id, next);
            }
        }
    }

    async fn commit_sample(&self, employee_id: &str, sample: LocationSample) {
        let validation = {
            let geofences = self.geofences.read().unwrap();
            let leniency = self.settings.current().validation.max_leniency_meters;
            geofence::validate(&sample, &geofences, leniency)
        };

        if !validation.is_valid {
            // Warning only; the event still flows.
            log_info!("{employee_id} {}", validation.message);
        }

        let payload = json!({
            "sample": &sample,
            "validation": &validation,
        });

        // Publish under the states lock: a stop that already removed this
        // employee aborts the commit here, before anything durable happens.
        let still_tracked = {
            let states = self.states.lock().unwrap();
            if states.contains_key(employee_id) {
                self.latest.write().unwrap().insert(
                    employee_id.to_string(),
                    TrackedPosition {
                        sample: sample.clone(),
                        validation,
                    },
                );
                true
            } else {
                false
            }
        };
        if !still_tracked {
            return;
        }

        if let Err(err) = self.store.put_last_known(&sample).await {
            log_warn!("Failed to cache last-known location for {employee_id}: {err}");
        }
        if let Err(err) = self.store.touch_last_sample(employee_id, Utc::now()).await {
            log_warn!("Failed to record sample time for {employee_id}: {err}");
        }

        match self
            .queue
            .submit(employee_id, ActionType::LocationUpdate, payload)
            .await
        {
            Ok(_) => {}
            Err(EngineError::QueueCapacityExceeded { capacity }) => {
                log_warn!(
                    "Location update for {employee_id} dropped: queue at capacity {capacity}"
                );
            }
            Err(err) => {
                log_warn!("Failed to hand off location update for {employee_id}: {err}");
            }
        }
    }

    fn reschedule(&self, employee_id: &str, interval_secs: u64) {
        let jitter_fraction = self.settings.current().scheduler.jitter_fraction;
        let jittered = apply_jitter(interval_secs, jitter_fraction);
        self.schedule
            .lock()
            .unwrap()
            .schedule(employee_id, Instant::now() + jittered);
        self.wake.notify_one();
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

fn apply_jitter(interval_secs: u64, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return Duration::from_secs(interval_secs);
    }
    let spread = rand::thread_rng().gen_range(-fraction..=fraction);
    Duration::from_secs_f64((interval_secs as f64 * (1.0 + spread)).max(0.0))
}
