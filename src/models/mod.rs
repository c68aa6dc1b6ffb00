mod action;
mod geofence;
mod profile;
mod sample;

pub use action::{ActionStatus, ActionType, QueuedAction};
pub use geofence::{GeofenceArea, GeofenceType, ValidationResult};
pub use profile::{EmployeeAttributes, TrackingProfile, TrackingTier};
pub use sample::{BeaconSignal, Capabilities, KnownBeacon, LocationSample, LocationSource};
