use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::RoleClassifier;
use crate::estimator::{self, CostProjection};
use crate::models::{EmployeeAttributes, QueuedAction, TrackingProfile, TrackingTier};
use crate::queue::{Dispatcher, DrainReport, SyncQueue};
use crate::scheduler::ProfileChangeFeed;
use crate::settings::SettingsStore;
use crate::store::{ProfileRecord, Store};

/// Tracking-management surface for the admin collaborator. Reads come
/// straight from the store; mutations go through the classifier so its cache
/// is invalidated in the same step.
pub struct AdminService<D> {
    store: Store,
    classifier: Arc<RoleClassifier>,
    settings: Arc<SettingsStore>,
    queue: Arc<SyncQueue<D>>,
    /// Nudged after every profile mutation so a running tracker reloads its
    /// in-memory intervals.
    changes: ProfileChangeFeed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPopulation {
    pub tier: TrackingTier,
    pub employees: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingOverview {
    pub populations: Vec<TierPopulation>,
    pub cost: CostProjection,
    pub pending_queue_depth: u64,
    pub dead_letter_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeEntry {
    pub employee_id: String,
    pub department: String,
    pub designation: String,
    pub tier: TrackingTier,
    pub polling_interval_secs: u64,
    pub tracking_enabled: bool,
    pub overridden: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePage {
    pub entries: Vec<EmployeeEntry>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub tracking_enabled: bool,
    pub polling_interval_minutes: u64,
    pub tracking_reason: Option<String>,
}

impl<D: Dispatcher> AdminService<D> {
    pub fn new(
        store: Store,
        classifier: Arc<RoleClassifier>,
        settings: Arc<SettingsStore>,
        queue: Arc<SyncQueue<D>>,
        changes: ProfileChangeFeed,
    ) -> Self {
        Self {
            store,
            classifier,
            settings,
            queue,
            changes,
        }
    }

    /// Register (or re-register) an employee with the engine: classify from
    /// attributes and persist the resulting profile.
    pub async fn register_employee(&self, attrs: &EmployeeAttributes) -> Result<TrackingProfile> {
        let tier = self.classifier.classify(attrs);
        let intervals = self.settings.current().intervals;
        let interval_secs = intervals.for_tier(tier).unwrap_or(intervals.low_secs);

        let mut profile = TrackingProfile::new(attrs.employee_id.clone(), tier, interval_secs);
        profile.override_flag = attrs.override_tier.is_some();

        self.store
            .upsert_profile(&ProfileRecord {
                department: attrs.department.clone(),
                designation: attrs.designation.clone(),
                profile: profile.clone(),
            })
            .await?;
        self.changes.mark_changed();

        Ok(profile)
    }

    /// Tier populations plus projected spend, for the overview dashboard.
    pub async fn overview(&self) -> Result<TrackingOverview> {
        let populations = self.store.tier_populations().await?;
        let settings = self.settings.current();
        let cost = estimator::project(&populations, &settings.intervals, &settings.cost);

        Ok(TrackingOverview {
            populations: populations
                .into_iter()
                .map(|(tier, employees)| TierPopulation { tier, employees })
                .collect(),
            cost,
            pending_queue_depth: self.queue.pending_count().await?,
            dead_letter_count: self.queue.dead_letters().await?.len(),
        })
    }

    pub async fn list_employees(&self, page: u64, page_size: u64) -> Result<EmployeePage> {
        let page_size = page_size.clamp(1, 200);
        let offset = page.saturating_mul(page_size);

        let records = self.store.list_profiles(offset, page_size).await?;
        let total = self.store.count_profiles().await?;

        Ok(EmployeePage {
            entries: records
                .into_iter()
                .map(|record| EmployeeEntry {
                    employee_id: record.profile.employee_id,
                    department: record.department,
                    designation: record.designation,
                    tier: record.profile.tier,
                    polling_interval_secs: record.profile.polling_interval_secs,
                    tracking_enabled: record.profile.tracking_enabled,
                    overridden: record.profile.override_flag,
                })
                .collect(),
            page,
            page_size,
            total,
        })
    }

    /// Re-derive every non-overridden profile from the default pattern rules.
    pub async fn apply_default_rules(&self) -> Result<usize> {
        let intervals = self.settings.current().intervals;
        let changed = self
            .classifier
            .apply_default_rules(&self.store, &intervals)
            .await?;
        if changed > 0 {
            self.changes.mark_changed();
        }
        Ok(changed)
    }

    /// Bulk-reclassify every profile matching `criteria` to `tier`.
    pub async fn reclassify(&self, criteria: &str, tier: TrackingTier) -> Result<usize> {
        let intervals = self.settings.current().intervals;
        let affected = self
            .classifier
            .bulk_reclassify(&self.store, criteria, tier, &intervals)
            .await?;
        if affected > 0 {
            self.changes.mark_changed();
        }
        Ok(affected)
    }

    /// Pin one employee's tracking settings, taking them out of bulk
    /// reclassification until released.
    pub async fn set_override(
        &self,
        employee_code: &str,
        request: &OverrideRequest,
    ) -> Result<TrackingProfile> {
        let interval_secs = request.polling_interval_minutes.max(1) * 60;

        let changed = self
            .store
            .set_override(employee_code, request.tracking_enabled, interval_secs)
            .await?;
        if !changed {
            return Err(anyhow!("no tracking profile for employee '{employee_code}'"));
        }

        self.classifier.invalidate(employee_code);
        self.changes.mark_changed();

        if let Some(reason) = &request.tracking_reason {
            info!("Tracking override for {employee_code}: {reason}");
        }

        self.store
            .get_profile(employee_code)
            .await?
            .map(|record| record.profile)
            .ok_or_else(|| anyhow!("profile for '{employee_code}' vanished after override"))
    }

    /// Dead-lettered actions awaiting manual review.
    pub async fn dead_letters(&self) -> Result<Vec<QueuedAction>> {
        Ok(self.queue.dead_letters().await?)
    }

    pub async fn force_sync(&self) -> Result<DrainReport> {
        Ok(self.queue.force_sync().await?)
    }
}
