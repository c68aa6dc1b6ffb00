use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use log::info;

use crate::models::{EmployeeAttributes, TrackingTier};
use crate::settings::TierIntervals;
use crate::store::Store;

/// One pattern rule: any listed needle appearing (case-insensitively) in the
/// department or designation selects the tier.
struct PatternRule {
    needles: &'static [&'static str],
    tier: TrackingTier,
}

/// Fixed priority order; first match wins. Field crews poll most often,
/// desk-bound staff least.
const DEFAULT_RULES: &[PatternRule] = &[
    PatternRule {
        needles: &["field", "technician"],
        tier: TrackingTier::High,
    },
    PatternRule {
        needles: &["sales", "mobile"],
        tier: TrackingTier::Standard,
    },
    PatternRule {
        needles: &["management", "manager"],
        tier: TrackingTier::Low,
    },
    PatternRule {
        needles: &["desk", "admin"],
        tier: TrackingTier::Low,
    },
];

/// Maps employee attributes to a tracking tier. Results are cached per
/// employee and invalidated explicitly on overrides and bulk updates; the
/// cache is never allowed to go silently stale.
pub struct RoleClassifier {
    cache: RwLock<HashMap<String, TrackingTier>>,
}

impl Default for RoleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleClassifier {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Precedence: explicit per-employee override, then pattern rules in
    /// fixed priority order, then `Standard`.
    pub fn classify(&self, attrs: &EmployeeAttributes) -> TrackingTier {
        if let Some(cached) = self.cache.read().unwrap().get(&attrs.employee_id) {
            return *cached;
        }

        let tier = Self::classify_uncached(attrs);
        self.cache
            .write()
            .unwrap()
            .insert(attrs.employee_id.clone(), tier);
        tier
    }

    fn classify_uncached(attrs: &EmployeeAttributes) -> TrackingTier {
        if let Some(tier) = attrs.override_tier {
            return tier;
        }
        Self::tier_for_role(&attrs.department, &attrs.designation)
    }

    pub fn tier_for_role(department: &str, designation: &str) -> TrackingTier {
        let department = department.to_lowercase();
        let designation = designation.to_lowercase();

        for rule in DEFAULT_RULES {
            let matched = rule
                .needles
                .iter()
                .any(|needle| department.contains(needle) || designation.contains(needle));
            if matched {
                return rule.tier;
            }
        }

        TrackingTier::Standard
    }

    pub fn invalidate(&self, employee_id: &str) {
        self.cache.write().unwrap().remove(employee_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Bulk SET-semantics reclassification of every non-overridden profile
    /// matching `criteria`. Returns the number of profiles changed and drops
    /// their cached classifications.
    pub async fn bulk_reclassify(
        &self,
        store: &Store,
        criteria: &str,
        tier: TrackingTier,
        intervals: &TierIntervals,
    ) -> Result<usize> {
        // Disabled profiles keep their last interval for when tracking resumes.
        let interval_secs = intervals.for_tier(tier).unwrap_or(intervals.low_secs);
        let changed = store.bulk_update_tier(criteria, tier, interval_secs).await?;

        if changed > 0 {
            // Cheaper to drop the whole cache than to enumerate which of the
            // matched employees were cached.
            self.invalidate_all();
            info!("Bulk reclassified {changed} profiles matching '{criteria}' to {}", tier.as_str());
        }

        Ok(changed)
    }

    /// Re-derive every non-overridden profile's tier from the pattern rules.
    /// Used by the admin "apply default rules" operation.
    pub async fn apply_default_rules(
        &self,
        store: &Store,
        intervals: &TierIntervals,
    ) -> Result<usize> {
        let mut changed = 0;
        let page_size = 200;
        let mut offset = 0;

        loop {
            let records = store.list_profiles(offset, page_size).await?;
            if records.is_empty() {
                break;
            }
            offset += records.len() as u64;

            for mut record in records {
                if record.profile.override_flag {
                    continue;
                }

                let tier = Self::tier_for_role(&record.department, &record.designation);
                let interval_secs = intervals
                    .for_tier(tier)
                    .unwrap_or(record.profile.polling_interval_secs);

                if record.profile.tier != tier
                    || record.profile.polling_interval_secs != interval_secs
                {
                    record.profile.tier = tier;
                    record.profile.polling_interval_secs = interval_secs;
                    record.profile.tracking_enabled = tier != TrackingTier::Disabled;
                    store.upsert_profile(&record).await?;
                    self.invalidate(&record.profile.employee_id);
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(id: &str, department: &str, designation: &str) -> EmployeeAttributes {
        EmployeeAttributes {
            employee_id: id.into(),
            department: department.into(),
            designation: designation.into(),
            override_tier: None,
        }
    }

    #[test]
    fn override_wins_over_rules() {
        let classifier = RoleClassifier::new();
        let mut employee = attrs("E1", "Field Operations", "Technician");
        employee.override_tier = Some(TrackingTier::Disabled);
        assert_eq!(classifier.classify(&employee), TrackingTier::Disabled);
    }

    #[test]
    fn field_beats_sales_in_priority_order() {
        // "Field Sales" matches both rule groups; field/technician is checked first.
        let classifier = RoleClassifier::new();
        assert_eq!(
            classifier.classify(&attrs("E1", "Field Sales", "Executive")),
            TrackingTier::High
        );
    }

    #[test]
    fn unmatched_roles_default_to_standard() {
        let classifier = RoleClassifier::new();
        assert_eq!(
            classifier.classify(&attrs("E1", "Research", "Scientist")),
            TrackingTier::Standard
        );
    }

    #[test]
    fn designation_matches_too() {
        let classifier = RoleClassifier::new();
        assert_eq!(
            classifier.classify(&attrs("E1", "Operations", "Service Technician")),
            TrackingTier::High
        );
        assert_eq!(
            classifier.classify(&attrs("E2", "HR", "Admin Assistant")),
            TrackingTier::Low
        );
    }

    #[test]
    fn cache_serves_until_invalidated() {
        let classifier = RoleClassifier::new();
        let employee = attrs("E1", "Desk", "Clerk");
        assert_eq!(classifier.classify(&employee), TrackingTier::Low);

        // Same id, new attributes: cached answer until invalidated.
        let moved = attrs("E1", "Field", "Technician");
        assert_eq!(classifier.classify(&moved), TrackingTier::Low);

        classifier.invalidate("E1");
        assert_eq!(classifier.classify(&moved), TrackingTier::High);
    }
}
