use crate::error::EngineError;
use crate::models::ActionStatus;
use crate::store::Store;

use super::Dispatcher;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainReport {
    pub dispatched: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Replay pending actions strictly in enqueue (id) order.
///
/// Success removes the row; failure bumps `retry_count` in place and the
/// drain moves on, so one stuck action never blocks those behind it. Items
/// whose retries are exhausted park as dead-letter for manual review.
pub(super) async fn drain<D: Dispatcher>(
    store: &Store,
    dispatcher: &D,
    retry_cap: u32,
) -> Result<DrainReport, EngineError> {
    let pending = store.pending_actions().await.map_err(EngineError::Store)?;
    let mut report = DrainReport::default();

    for action in pending {
        match dispatcher
            .dispatch(&action.employee_id, action.action_type, &action.payload)
            .await
        {
            Ok(()) => {
                store
                    .delete_action(action.id)
                    .await
                    .map_err(EngineError::Store)?;
                report.dispatched += 1;
            }
            Err(err) => {
                let status = store
                    .record_failure(action.id, retry_cap)
                    .await
                    .map_err(EngineError::Store)?;

                if status == ActionStatus::DeadLetter {
                    log_warn!(
                        "Action #{} ({}) exhausted retries and was dead-lettered: {err}",
                        action.id,
                        action.action_type.as_str()
                    );
                    report.dead_lettered += 1;
                } else {
                    log_info!(
                        "Action #{} ({}) failed, will retry on next drain: {err}",
                        action.id,
                        action.action_type.as_str()
                    );
                    report.failed += 1;
                }
            }
        }
    }

    Ok(report)
}
