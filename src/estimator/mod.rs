use serde::Serialize;

use crate::models::TrackingTier;
use crate::settings::{CostParameters, TierIntervals};

/// Projected sample volume and spend for one tier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierProjection {
    pub tier: TrackingTier,
    pub employees: u64,
    pub interval_secs: u64,
    pub daily_updates_per_employee: f64,
    pub monthly_updates: f64,
}

/// Aggregated projection across all tiers. Read-only reporting for the admin
/// collaborator; nothing here writes anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostProjection {
    pub tiers: Vec<TierProjection>,
    pub total_monthly_updates: f64,
    pub monthly_cost: f64,
    /// Employees beyond the historical biometric terminal headroom, i.e. the
    /// population the location engine exists to cover. Derived from an
    /// operational constant, not a measured capacity.
    pub non_biometric_employees: u64,
}

/// Pure projection over current tier populations:
/// `daily = work_minutes / interval_minutes`,
/// `monthly = daily * working_days * employees`,
/// `cost = total_monthly / 1000 * unit_price`.
pub fn project(
    populations: &[(TrackingTier, u64)],
    intervals: &TierIntervals,
    params: &CostParameters,
) -> CostProjection {
    let mut tiers = Vec::new();
    let mut total_monthly = 0.0;
    let mut total_employees = 0u64;

    for &(tier, employees) in populations {
        total_employees += employees;

        let Some(interval_secs) = intervals.for_tier(tier) else {
            continue; // disabled tier generates no samples
        };

        let interval_minutes = interval_secs as f64 / 60.0;
        let daily = params.work_minutes_per_day as f64 / interval_minutes;
        let monthly = daily * params.working_days_per_month as f64 * employees as f64;
        total_monthly += monthly;

        tiers.push(TierProjection {
            tier,
            employees,
            interval_secs,
            daily_updates_per_employee: daily,
            monthly_updates: monthly,
        });
    }

    CostProjection {
        tiers,
        total_monthly_updates: total_monthly,
        monthly_cost: total_monthly / 1000.0 * params.unit_price_per_thousand,
        non_biometric_employees: total_employees.saturating_sub(params.max_biometric_capacity),
    }
}
