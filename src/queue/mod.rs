use std::future::Future;
use std::sync::Arc;

use log::info;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::models::{ActionStatus, ActionType, QueuedAction};
use crate::settings::QueueSettings;
use crate::store::{EnqueueOutcome, Store};

mod reconciler;

pub use reconciler::DrainReport;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Outward delivery seam to the attendance/HR backend. The engine never
/// interprets the payload; it only sees success or failure.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(
        &self,
        employee_id: &str,
        action_type: ActionType,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// Shared online/offline belief, fed by the host's network callbacks.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        let changed = *self.tx.borrow() != online;
        self.tx.send_replace(online);
        if changed {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// What happened to a submitted action.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Delivered immediately; nothing persisted.
    Dispatched,
    /// Persisted for later replay (offline or dispatch failure).
    Queued { id: i64 },
}

/// Offline queue plus sync reconciler. Every outward action goes through
/// `submit`; undeliverable ones are persisted and replayed strictly in
/// enqueue order once connectivity returns.
pub struct SyncQueue<D> {
    store: Store,
    dispatcher: D,
    connectivity: ConnectivityMonitor,
    settings: QueueSettings,
    /// One drain at a time; a force-sync during an automatic drain waits.
    drain_lock: Mutex<()>,
}

impl<D: Dispatcher> SyncQueue<D> {
    pub fn new(
        store: Store,
        dispatcher: D,
        connectivity: ConnectivityMonitor,
        settings: QueueSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            connectivity,
            settings,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub async fn submit(
        &self,
        employee_id: &str,
        action_type: ActionType,
        payload: serde_json::Value,
    ) -> Result<SubmitOutcome, EngineError> {
        if self.connectivity.is_online() {
            match self
                .dispatcher
                .dispatch(employee_id, action_type, &payload)
                .await
            {
                Ok(()) => return Ok(SubmitOutcome::Dispatched),
                Err(err) => {
                    log_warn!(
                        "Immediate dispatch of {} for {employee_id} failed ({err}), queuing",
                        action_type.as_str()
                    );
                }
            }
        }

        let outcome = self
            .store
            .enqueue_action(employee_id, action_type, payload, self.settings.capacity)
            .await
            .map_err(EngineError::Store)?;

        match outcome {
            EnqueueOutcome::Stored(action) => Ok(SubmitOutcome::Queued { id: action.id }),
            EnqueueOutcome::Evicted { dropped_id, stored } => {
                log_warn!(
                    "Queue at capacity; evicted location update #{dropped_id} to keep {}",
                    stored.action_type.as_str()
                );
                Ok(SubmitOutcome::Queued { id: stored.id })
            }
            EnqueueOutcome::Rejected => Err(EngineError::QueueCapacityExceeded {
                capacity: self.settings.capacity,
            }),
        }
    }

    /// Drain the queue now, regardless of connectivity belief. Used by the
    /// admin force-sync command and by the reconciler on reconnect.
    pub async fn force_sync(&self) -> Result<DrainReport, EngineError> {
        let _guard = self.drain_lock.lock().await;
        reconciler::drain(&self.store, &self.dispatcher, self.settings.retry_cap).await
    }

    pub async fn pending_count(&self) -> Result<u64, EngineError> {
        self.store.pending_count().await.map_err(EngineError::Store)
    }

    /// Actions past the retry cap, parked for manual review.
    pub async fn dead_letters(&self) -> Result<Vec<QueuedAction>, EngineError> {
        self.store
            .dead_letter_actions()
            .await
            .map_err(EngineError::Store)
    }

    /// Background reconciler: drains whenever connectivity flips back on.
    pub fn spawn_reconciler(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut connectivity = self.connectivity.subscribe();
        // Captured before the task is spawned: a flip landing between spawn
        // and the task's first poll must still read as a transition.
        let mut was_online = *connectivity.borrow_and_update();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow();
                        if online && !was_online {
                            match queue.force_sync().await {
                                Ok(report) => log_info!(
                                    "Reconciler drained queue: {} sent, {} failed, {} dead-lettered",
                                    report.dispatched,
                                    report.failed,
                                    report.dead_lettered
                                ),
                                Err(err) => log_warn!("Reconciler drain failed: {err}"),
                            }
                        }
                        was_online = online;
                    }
                    _ = cancel_token.cancelled() => {
                        log_info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Dispatcher whose failure set is adjustable mid-test.
    struct FakeDispatcher {
        fail_all: AtomicBool,
        fail_types: std::sync::Mutex<HashSet<ActionType>>,
        delivered: AtomicU32,
    }

    impl FakeDispatcher {
        fn succeeding() -> Self {
            Self {
                fail_all: AtomicBool::new(false),
                fail_types: std::sync::Mutex::new(HashSet::new()),
                delivered: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            let dispatcher = Self::succeeding();
            dispatcher.fail_all.store(true, Ordering::SeqCst);
            dispatcher
        }
    }

    impl Dispatcher for FakeDispatcher {
        async fn dispatch(
            &self,
            _employee_id: &str,
            action_type: ActionType,
            _payload: &serde_json::Value,
        ) -> Result<(), EngineError> {
            let fail = self.fail_all.load(Ordering::SeqCst)
                || self.fail_types.lock().unwrap().contains(&action_type);
            if fail {
                return Err(EngineError::DispatchFailed {
                    reason: "backend unreachable".into(),
                });
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue_with(
        dispatcher: FakeDispatcher,
        online: bool,
    ) -> (tempfile::TempDir, Arc<SyncQueue<FakeDispatcher>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("engine.db")).unwrap();
        let queue = Arc::new(SyncQueue::new(
            store,
            dispatcher,
            ConnectivityMonitor::new(online),
            QueueSettings {
                retry_cap: 3,
                capacity: 100,
            },
        ));
        (dir, queue)
    }

    #[tokio::test]
    async fn online_submit_dispatches_without_persisting() {
        let (_dir, queue) = queue_with(FakeDispatcher::succeeding(), true);

        let outcome = queue
            .submit("E1", ActionType::LocationUpdate, json!({ "lat": 1.0 }))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Dispatched);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_submit_persists_for_replay() {
        let (_dir, queue) = queue_with(FakeDispatcher::succeeding(), false);

        let outcome = queue
            .submit("E1", ActionType::PunchIn, json!({ "punch": "in" }))
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dispatch_failure_is_absorbed_into_the_queue() {
        let (_dir, queue) = queue_with(FakeDispatcher::failing(), true);

        let outcome = queue
            .submit("E1", ActionType::PunchOut, json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn full_success_drain_empties_queue() {
        let (_dir, queue) = queue_with(FakeDispatcher::succeeding(), false);

        for i in 0..4 {
            queue
                .submit("E1", ActionType::LocationUpdate, json!({ "seq": i }))
                .await
                .unwrap();
        }

        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.dispatched, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn full_failure_drain_increments_every_retry_count_once() {
        let (_dir, queue) = queue_with(FakeDispatcher::failing(), false);

        for i in 0..3 {
            queue
                .submit("E1", ActionType::LocationUpdate, json!({ "seq": i }))
                .await
                .unwrap();
        }

        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(queue.pending_count().await.unwrap(), 3);

        let pending = queue.store.pending_actions().await.unwrap();
        assert!(pending.iter().all(|a| a.retry_count == 1));
    }

    #[tokio::test]
    async fn stuck_item_does_not_block_the_rest() {
        let dispatcher = FakeDispatcher::succeeding();
        dispatcher
            .fail_types
            .lock()
            .unwrap()
            .insert(ActionType::PreferenceUpdate);
        let (_dir, queue) = queue_with(dispatcher, false);

        queue
            .submit("E1", ActionType::PreferenceUpdate, json!({}))
            .await
            .unwrap();
        queue
            .submit("E1", ActionType::PunchIn, json!({}))
            .await
            .unwrap();
        queue
            .submit("E1", ActionType::PunchOut, json!({}))
            .await
            .unwrap();

        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failed, 1);

        let pending = queue.store.pending_actions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_type, ActionType::PreferenceUpdate);
        assert_eq!(pending[0].retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_park_as_dead_letter() {
        let (_dir, queue) = queue_with(FakeDispatcher::failing(), false);

        queue
            .submit("E1", ActionType::PreferenceUpdate, json!({}))
            .await
            .unwrap();

        for _ in 0..2 {
            let report = queue.force_sync().await.unwrap();
            assert_eq!(report.dead_lettered, 0);
        }
        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].status, ActionStatus::DeadLetter);

        // Dead letters are parked, not retried.
        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn reconciler_drains_on_connectivity_restored() {
        // Scenario: punch-in queued while offline, connectivity returns, the
        // reconciler delivers it and the queue is empty.
        let (_dir, queue) = queue_with(FakeDispatcher::succeeding(), false);

        queue
            .submit("E7", ActionType::PunchIn, json!({ "shift": "morning" }))
            .await
            .unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let cancel = CancellationToken::new();
        let handle = queue.spawn_reconciler(cancel.clone());

        queue.connectivity().set_online(true);

        // Wait for the reconciler to observe the flip and drain.
        let mut drained = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if queue.pending_count().await.unwrap() == 0 {
                drained = true;
                break;
            }
        }
        assert!(drained, "reconciler never drained the queue");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn replay_preserves_enqueue_order() {
        let (_dir, queue) = queue_with(FakeDispatcher::succeeding(), false);

        let mut ids = Vec::new();
        for action_type in [
            ActionType::PunchIn,
            ActionType::LocationUpdate,
            ActionType::PunchOut,
        ] {
            match queue.submit("E1", action_type, json!({})).await.unwrap() {
                SubmitOutcome::Queued { id } => ids.push(id),
                other => panic!("expected queued, got {other:?}"),
            }
        }

        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "ids must follow enqueue order");

        let pending = queue.store.pending_actions().await.unwrap();
        let pending_ids: Vec<i64> = pending.iter().map(|a| a.id).collect();
        assert_eq!(pending_ids, ids);
    }
}
