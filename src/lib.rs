//! Adaptive location-tracking and geofence-validation engine.
//!
//! Decides when to sample an employee's position (tier-based adaptive
//! scheduling), how to obtain one when GPS is degraded (Bluetooth beacon
//! trilateration), whether it satisfies a workplace presence rule (geofence
//! validation), and how to guarantee delivery of the resulting events over
//! intermittent connectivity (durable offline queue with ordered replay).
//!
//! The surrounding HR application (employee CRUD, dashboards, messaging) is
//! a collaborator, not part of this crate: it feeds employee attributes and
//! geofence definitions in, and consumes latest positions, overview reports,
//! and dead-letter lists out.

pub mod admin;
pub mod classifier;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod geofence;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod store;
mod utils;

pub use error::{EngineError, SensorKind};
pub use scheduler::{ProfileChangeFeed, TrackerStatus, TrackingController};
pub use settings::{EngineSettings, SettingsStore};
pub use store::Store;
