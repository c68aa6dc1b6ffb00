use thiserror::Error;

/// Which sensor a permission failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Gps,
    Bluetooth,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Gps => write!(f, "GPS"),
            SensorKind::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// Failure taxonomy for the tracking engine. Nothing here is fatal to the
/// host process: timeouts and missing signals fall through the fusion chain,
/// dispatch failures land in the offline queue, and validation failures are
/// warnings attached to the event.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Sensor access refused by the platform. Cannot be retried
    /// automatically; surfaced immediately with guidance.
    #[error("{kind} access denied; ask the employee to grant {kind} permission in device settings")]
    PermissionDenied { kind: SensorKind },

    #[error("operation timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    /// No GPS fix and no matching beacons.
    #[error("no GPS fix and no known beacons in range")]
    NoSignal,

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("dispatch to attendance backend failed: {reason}")]
    DispatchFailed { reason: String },

    /// Outside every registered geofence. Non-blocking by policy.
    #[error("outside every known geofence: {message}")]
    ValidationFailed { message: String },

    #[error("offline queue at capacity ({capacity}) with no evictable entries")]
    QueueCapacityExceeded { capacity: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Failures the scheduler answers with interval backoff rather than
    /// surfacing to the caller.
    pub fn is_backoff(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::NoSignal | EngineError::NetworkUnavailable
        )
    }
}
