use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::models::{
    ActionStatus, ActionType, LocationSample, LocationSource, QueuedAction, TrackingProfile,
    TrackingTier,
};

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn tier_from_str(value: &str) -> Result<TrackingTier> {
    TrackingTier::from_str(value).ok_or_else(|| anyhow!("unknown tracking tier '{value}'"))
}

fn source_from_str(value: &str) -> Result<LocationSource> {
    match value {
        "gps" => Ok(LocationSource::Gps),
        "bluetooth" => Ok(LocationSource::Bluetooth),
        "fused" => Ok(LocationSource::Fused),
        "stale" => Ok(LocationSource::Stale),
        _ => Err(anyhow!("unknown location source '{value}'")),
    }
}

/// A profile row together with the HR attributes bulk reclassification
/// matches against.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub department: String,
    pub designation: String,
    pub profile: TrackingProfile,
}

/// Outcome of an enqueue under the capacity policy.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Stored(QueuedAction),
    /// Capacity was reached; the oldest evictable pending row was dropped to
    /// make room.
    Evicted {
        dropped_id: i64,
        stored: QueuedAction,
    },
    /// Capacity reached and nothing evictable: the action was not persisted.
    Rejected,
}

/// Durable engine state on SQLite. All access is funneled through one
/// dedicated worker thread, so enqueues can never interleave with a drain in
/// progress.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl Store {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("fieldtrack-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(
                            Err(anyhow::Error::new(err).context("failed to open SQLite database")),
                        );
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Store initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    // ---- tracking profiles ----

    pub async fn upsert_profile(&self, record: &ProfileRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO tracking_profiles
                     (employee_id, department, designation, tier, polling_interval_secs,
                      override_flag, tracking_enabled, last_sample_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(employee_id) DO UPDATE SET
                     department = excluded.department,
                     designation = excluded.designation,
                     tier = excluded.tier,
                     polling_interval_secs = excluded.polling_interval_secs,
                     override_flag = excluded.override_flag,
                     tracking_enabled = excluded.tracking_enabled",
                params![
                    record.profile.employee_id,
                    record.department,
                    record.designation,
                    record.profile.tier.as_str(),
                    record.profile.polling_interval_secs as i64,
                    record.profile.override_flag as i64,
                    record.profile.tracking_enabled as i64,
                    record.profile.last_sample_at.map(|dt| dt.to_rfc3339()),
                ],
            )
            .with_context(|| "failed to upsert tracking profile")?;
            Ok(())
        })
        .await
    }

    pub async fn get_profile(&self, employee_id: &str) -> Result<Option<ProfileRecord>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT employee_id, department, designation, tier, polling_interval_secs,
                        override_flag, tracking_enabled, last_sample_at
                 FROM tracking_profiles WHERE employee_id = ?1",
                params![employee_id],
                row_to_profile,
            )
            .optional()
            .with_context(|| "failed to query tracking profile")?
            .transpose()
        })
        .await
    }

    pub async fn list_profiles(&self, offset: u64, limit: u64) -> Result<Vec<ProfileRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT employee_id, department, designation, tier, polling_interval_secs,
                        override_flag, tracking_enabled, last_sample_at
                 FROM tracking_profiles
                 ORDER BY employee_id
                 LIMIT ?1 OFFSET ?2",
            )?;

            let mut rows = stmt.query(params![limit as i64, offset as i64])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_profile(row)??);
            }
            Ok(records)
        })
        .await
    }

    pub async fn enabled_profiles(&self) -> Result<Vec<TrackingProfile>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT employee_id, department, designation, tier, polling_interval_secs,
                        override_flag, tracking_enabled, last_sample_at
                 FROM tracking_profiles
                 WHERE tracking_enabled = 1 AND tier != 'disabled'
                 ORDER BY employee_id",
            )?;

            let mut rows = stmt.query([])?;
            let mut profiles = Vec::new();
            while let Some(row) = rows.next()? {
                profiles.push(row_to_profile(row)??.profile);
            }
            Ok(profiles)
        })
        .await
    }

    pub async fn count_profiles(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM tracking_profiles", [], |row| {
                    row.get(0)
                })?;
            Ok(count as u64)
        })
        .await
    }

    pub async fn tier_populations(&self) -> Result<Vec<(TrackingTier, u64)>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tier, COUNT(*) FROM tracking_profiles GROUP BY tier ORDER BY tier",
            )?;

            let mut rows = stmt.query([])?;
            let mut populations = Vec::new();
            while let Some(row) = rows.next()? {
                let tier = tier_from_str(&row.get::<_, String>(0)?)?;
                let count: i64 = row.get(1)?;
                populations.push((tier, count as u64));
            }
            Ok(populations)
        })
        .await
    }

    /// SET-semantics bulk update: every non-overridden profile whose
    /// department or designation contains `criteria` (case-insensitive) gets
    /// the new tier/interval. Returns the number of rows changed; zero
    /// matches is not an error.
    pub async fn bulk_update_tier(
        &self,
        criteria: &str,
        tier: TrackingTier,
        interval_secs: u64,
    ) -> Result<usize> {
        let pattern = format!("%{}%", criteria.to_lowercase());
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tracking_profiles
                     SET tier = ?1,
                         polling_interval_secs = ?2,
                         tracking_enabled = CASE WHEN ?1 = 'disabled' THEN 0 ELSE 1 END
                     WHERE override_flag = 0
                       AND (LOWER(department) LIKE ?3 OR LOWER(designation) LIKE ?3)",
                    params![tier.as_str(), interval_secs as i64, pattern],
                )
                .with_context(|| "failed to bulk-update tracking tiers")?;
            Ok(changed)
        })
        .await
    }

    pub async fn set_override(
        &self,
        employee_id: &str,
        tracking_enabled: bool,
        interval_secs: u64,
    ) -> Result<bool> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tracking_profiles
                     SET override_flag = 1,
                         tracking_enabled = ?1,
                         polling_interval_secs = ?2
                     WHERE employee_id = ?3",
                    params![tracking_enabled as i64, interval_secs as i64, employee_id],
                )
                .with_context(|| "failed to apply tracking override")?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn touch_last_sample(
        &self,
        employee_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE tracking_profiles SET last_sample_at = ?1 WHERE employee_id = ?2",
                params![at.to_rfc3339(), employee_id],
            )
            .with_context(|| "failed to record last sample time")?;
            Ok(())
        })
        .await
    }

    // ---- offline queue ----

    /// Persist an outward action under the capacity policy: at capacity, the
    /// oldest pending plain location-update is evicted first; punch and
    /// preference actions are never silently dropped.
    pub async fn enqueue_action(
        &self,
        employee_id: &str,
        action_type: ActionType,
        payload: serde_json::Value,
        capacity: usize,
    ) -> Result<EnqueueOutcome> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let pending: i64 = tx.query_row(
                "SELECT COUNT(*) FROM queued_actions WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;

            let mut dropped_id = None;
            if pending as usize >= capacity {
                let victim: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM queued_actions
                         WHERE status = 'pending' AND action_type = 'location-update'
                         ORDER BY id LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;

                match victim {
                    Some(id) => {
                        tx.execute("DELETE FROM queued_actions WHERE id = ?1", params![id])?;
                        dropped_id = Some(id);
                    }
                    None => {
                        tx.rollback()?;
                        return Ok(EnqueueOutcome::Rejected);
                    }
                }
            }

            let enqueued_at = Utc::now();
            tx.execute(
                "INSERT INTO queued_actions (employee_id, action_type, payload, enqueued_at, retry_count, status)
                 VALUES (?1, ?2, ?3, ?4, 0, 'pending')",
                params![
                    employee_id,
                    action_type.as_str(),
                    payload.to_string(),
                    enqueued_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to enqueue action")?;

            let id = tx.last_insert_rowid();
            tx.commit()?;

            let stored = QueuedAction {
                id,
                employee_id,
                action_type,
                payload,
                enqueued_at,
                retry_count: 0,
                status: ActionStatus::Pending,
            };

            Ok(match dropped_id {
                Some(dropped_id) => EnqueueOutcome::Evicted { dropped_id, stored },
                None => EnqueueOutcome::Stored(stored),
            })
        })
        .await
    }

    /// Pending actions in strict id (enqueue) order.
    pub async fn pending_actions(&self) -> Result<Vec<QueuedAction>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, employee_id, action_type, payload, enqueued_at, retry_count, status
                 FROM queued_actions
                 WHERE status = 'pending'
                 ORDER BY id",
            )?;

            let mut rows = stmt.query([])?;
            let mut actions = Vec::new();
            while let Some(row) = rows.next()? {
                actions.push(row_to_action(row)??);
            }
            Ok(actions)
        })
        .await
    }

    pub async fn dead_letter_actions(&self) -> Result<Vec<QueuedAction>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, employee_id, action_type, payload, enqueued_at, retry_count, status
                 FROM queued_actions
                 WHERE status = 'dead-letter'
                 ORDER BY id",
            )?;

            let mut rows = stmt.query([])?;
            let mut actions = Vec::new();
            while let Some(row) = rows.next()? {
                actions.push(row_to_action(row)??);
            }
            Ok(actions)
        })
        .await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queued_actions WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// Remove an acked action.
    pub async fn delete_action(&self, id: i64) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM queued_actions WHERE id = ?1", params![id])
                .with_context(|| "failed to delete acked action")?;
            Ok(())
        })
        .await
    }

    /// Bump retry_count after a failed dispatch; past the cap the row parks
    /// as dead-letter instead of retrying forever.
    pub async fn record_failure(&self, id: i64, retry_cap: u32) -> Result<ActionStatus> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE queued_actions SET retry_count = retry_count + 1 WHERE id = ?1",
                params![id],
            )?;

            let retry_count: u32 = tx.query_row(
                "SELECT retry_count FROM queued_actions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;

            let status = if retry_count >= retry_cap {
                tx.execute(
                    "UPDATE queued_actions SET status = 'dead-letter' WHERE id = ?1",
                    params![id],
                )?;
                ActionStatus::DeadLetter
            } else {
                ActionStatus::Pending
            };

            tx.commit()?;
            Ok(status)
        })
        .await
    }

    // ---- last-known location cache ----

    pub async fn put_last_known(&self, sample: &LocationSample) -> Result<()> {
        let sample = sample.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO last_known_locations
                     (employee_id, lat, lng, accuracy_meters, source, confidence, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(employee_id) DO UPDATE SET
                     lat = excluded.lat,
                     lng = excluded.lng,
                     accuracy_meters = excluded.accuracy_meters,
                     source = excluded.source,
                     confidence = excluded.confidence,
                     recorded_at = excluded.recorded_at",
                params![
                    sample.employee_id,
                    sample.lat,
                    sample.lng,
                    sample.accuracy_meters,
                    sample.source.as_str(),
                    sample.confidence,
                    sample.timestamp.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to store last-known location")?;
            Ok(())
        })
        .await
    }

    pub async fn last_known(&self, employee_id: &str) -> Result<Option<LocationSample>> {
        let employee_id = employee_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT employee_id, lat, lng, accuracy_meters, source, confidence, recorded_at
                 FROM last_known_locations WHERE employee_id = ?1",
                params![employee_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .with_context(|| "failed to query last-known location")?
            .map(
                |(employee_id, lat, lng, accuracy, source, confidence, recorded_at)| {
                    Ok(LocationSample {
                        id: uuid::Uuid::new_v4().to_string(),
                        employee_id,
                        lat,
                        lng,
                        accuracy_meters: accuracy,
                        source: source_from_str(&source)?,
                        confidence,
                        timestamp: parse_datetime(&recorded_at)?,
                    })
                },
            )
            .transpose()
        })
        .await
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ProfileRecord>> {
    let employee_id: String = row.get(0)?;
    let department: String = row.get(1)?;
    let designation: String = row.get(2)?;
    let tier: String = row.get(3)?;
    let interval: i64 = row.get(4)?;
    let override_flag: i64 = row.get(5)?;
    let tracking_enabled: i64 = row.get(6)?;
    let last_sample_at: Option<String> = row.get(7)?;

    Ok((|| {
        Ok(ProfileRecord {
            department,
            designation,
            profile: TrackingProfile {
                employee_id,
                tier: tier_from_str(&tier)?,
                polling_interval_secs: interval as u64,
                override_flag: override_flag != 0,
                tracking_enabled: tracking_enabled != 0,
                last_sample_at: last_sample_at.map(|s| parse_datetime(&s)).transpose()?,
            },
        })
    })())
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<QueuedAction>> {
    let id: i64 = row.get(0)?;
    let employee_id: String = row.get(1)?;
    let action_type: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let enqueued_at: String = row.get(4)?;
    let retry_count: u32 = row.get(5)?;
    let status: String = row.get(6)?;

    Ok((|| {
        Ok(QueuedAction {
            id,
            employee_id,
            action_type: ActionType::from_str(&action_type)
                .ok_or_else(|| anyhow!("unknown action type '{action_type}'"))?,
            payload: serde_json::from_str(&payload)
                .with_context(|| "failed to parse queued payload")?,
            enqueued_at: parse_datetime(&enqueued_at)?,
            retry_count,
            status: ActionStatus::from_str(&status)
                .ok_or_else(|| anyhow!("unknown action status '{status}'"))?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("engine.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn queue_ids_are_strictly_increasing() {
        let (_dir, store) = temp_store();

        let mut last_id = 0;
        for i in 0..5 {
            let outcome = store
                .enqueue_action("E1", ActionType::LocationUpdate, json!({ "seq": i }), 100)
                .await
                .unwrap();
            let stored = match outcome {
                EnqueueOutcome::Stored(action) => action,
                other => panic!("unexpected outcome: {other:?}"),
            };
            assert!(stored.id > last_id);
            last_id = stored.id;
        }

        let pending = store.pending_actions().await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|a| a.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn queued_action_round_trips_all_fields() {
        let (_dir, store) = temp_store();

        let payload = json!({ "punchType": "in", "lat": 12.97, "lng": 77.59 });
        let stored = match store
            .enqueue_action("E42", ActionType::PunchIn, payload.clone(), 100)
            .await
            .unwrap()
        {
            EnqueueOutcome::Stored(action) => action,
            other => panic!("unexpected outcome: {other:?}"),
        };

        let fetched = store.pending_actions().await.unwrap().pop().unwrap();
        assert_eq!(fetched, stored);
        assert_eq!(fetched.payload, payload);
        assert_eq!(fetched.action_type, ActionType::PunchIn);
        assert_eq!(fetched.retry_count, 0);
        assert_eq!(fetched.status, ActionStatus::Pending);

        // serde round-trip is exact too
        let serialized = serde_json::to_string(&fetched).unwrap();
        let deserialized: QueuedAction = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, fetched);
    }

    #[tokio::test]
    async fn capacity_evicts_location_updates_before_punches() {
        let (_dir, store) = temp_store();

        let first = match store
            .enqueue_action("E1", ActionType::LocationUpdate, json!({}), 2)
            .await
            .unwrap()
        {
            EnqueueOutcome::Stored(action) => action,
            other => panic!("unexpected outcome: {other:?}"),
        };
        store
            .enqueue_action("E1", ActionType::PunchIn, json!({}), 2)
            .await
            .unwrap();

        // At capacity now: a punch evicts the oldest location update.
        match store
            .enqueue_action("E1", ActionType::PunchOut, json!({}), 2)
            .await
            .unwrap()
        {
            EnqueueOutcome::Evicted { dropped_id, .. } => assert_eq!(dropped_id, first.id),
            other => panic!("expected eviction, got {other:?}"),
        }

        // Queue now holds only punches; nothing evictable is left.
        match store
            .enqueue_action("E1", ActionType::PunchIn, json!({}), 2)
            .await
            .unwrap()
        {
            EnqueueOutcome::Rejected => {}
            other => panic!("expected rejection, got {other:?}"),
        }

        let remaining = store.pending_actions().await.unwrap();
        assert!(remaining.iter().all(|a| !a.action_type.evictable()));
    }

    #[tokio::test]
    async fn record_failure_moves_to_dead_letter_at_cap() {
        let (_dir, store) = temp_store();

        let stored = match store
            .enqueue_action("E1", ActionType::PreferenceUpdate, json!({}), 10)
            .await
            .unwrap()
        {
            EnqueueOutcome::Stored(action) => action,
            other => panic!("unexpected outcome: {other:?}"),
        };

        for attempt in 1..3u32 {
            let status = store.record_failure(stored.id, 3).await.unwrap();
            assert_eq!(status, ActionStatus::Pending, "attempt {attempt}");
        }

        let status = store.record_failure(stored.id, 3).await.unwrap();
        assert_eq!(status, ActionStatus::DeadLetter);

        assert!(store.pending_actions().await.unwrap().is_empty());
        let dead = store.dead_letter_actions().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 3);
    }

    #[tokio::test]
    async fn bulk_update_matches_substring_case_insensitive() {
        let (_dir, store) = temp_store();

        for (id, dept) in [("E1", "Field Operations"), ("E2", "FIELD"), ("E3", "Sales")] {
            store
                .upsert_profile(&ProfileRecord {
                    department: dept.into(),
                    designation: "Agent".into(),
                    profile: TrackingProfile::new(id, TrackingTier::Standard, 600),
                })
                .await
                .unwrap();
        }

        let changed = store
            .bulk_update_tier("field", TrackingTier::High, 180)
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let profile = store.get_profile("E1").await.unwrap().unwrap().profile;
        assert_eq!(profile.tier, TrackingTier::High);
        assert_eq!(profile.polling_interval_secs, 180);

        // criteria that matches nothing is not an error
        let changed = store
            .bulk_update_tier("warehouse", TrackingTier::Low, 1800)
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn overridden_profiles_skip_bulk_updates() {
        let (_dir, store) = temp_store();

        store
            .upsert_profile(&ProfileRecord {
                department: "Field".into(),
                designation: "Technician".into(),
                profile: TrackingProfile::new("E9", TrackingTier::Standard, 600),
            })
            .await
            .unwrap();
        assert!(store.set_override("E9", true, 300).await.unwrap());

        let changed = store
            .bulk_update_tier("field", TrackingTier::High, 180)
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let profile = store.get_profile("E9").await.unwrap().unwrap().profile;
        assert!(profile.override_flag);
        assert_eq!(profile.polling_interval_secs, 300);
    }

    #[tokio::test]
    async fn last_known_cache_round_trips() {
        let (_dir, store) = temp_store();

        assert!(store.last_known("E1").await.unwrap().is_none());

        let sample = LocationSample::new("E1", 12.97, 77.59, 15.0, LocationSource::Gps, 90.0);
        store.put_last_known(&sample).await.unwrap();

        let cached = store.last_known("E1").await.unwrap().unwrap();
        assert_eq!(cached.lat, sample.lat);
        assert_eq!(cached.lng, sample.lng);
        assert_eq!(cached.source, LocationSource::Gps);
    }
}
