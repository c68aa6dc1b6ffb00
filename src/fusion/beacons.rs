use crate::models::{BeaconSignal, KnownBeacon};

/// RSSI below this contributes a zero signal score.
const RSSI_FLOOR_DBM: f64 = -100.0;
/// RSSI at or above this contributes a full signal score.
const RSSI_CEILING_DBM: f64 = -40.0;
/// Beyond this estimated distance a beacon contributes a zero distance score.
const MAX_USEFUL_RANGE_METERS: f64 = 30.0;
/// Accuracy cap for multi-beacon fixes.
const MAX_FUSED_ACCURACY_METERS: f64 = 100.0;
/// A lone beacon is less trustworthy than agreeing beacons at the same
/// signal strength.
const SINGLE_BEACON_CONFIDENCE_SCALE: f64 = 0.85;

/// Log-distance path-loss model: `d = 10^((tx_power - rssi) / (10 * n))`.
pub fn estimate_distance_meters(rssi: f64, tx_power_dbm: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((tx_power_dbm - rssi) / (10.0 * path_loss_exponent))
}

/// A scan hit matched to a registered beacon, with its distance estimate.
#[derive(Debug, Clone)]
pub struct BeaconObservation {
    pub beacon: KnownBeacon,
    pub rssi: f64,
    pub estimated_distance_meters: f64,
}

/// Match raw scan signals against the beacon registry by id signature.
pub fn match_known_beacons(
    signals: &[BeaconSignal],
    registry: &[KnownBeacon],
    tx_power_dbm: f64,
    path_loss_exponent: f64,
) -> Vec<BeaconObservation> {
    signals
        .iter()
        .filter_map(|signal| {
            registry
                .iter()
                .find(|known| known.beacon_id == signal.beacon_id)
                .map(|known| BeaconObservation {
                    beacon: known.clone(),
                    rssi: signal.rssi,
                    estimated_distance_meters: estimate_distance_meters(
                        signal.rssi,
                        tx_power_dbm,
                        path_loss_exponent,
                    ),
                })
        })
        .collect()
}

/// A position estimate fused from one or more beacon observations.
#[derive(Debug, Clone, Copy)]
pub struct BeaconFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    pub confidence: f64,
}

/// Fuse matched beacons into one position.
///
/// One beacon: its surveyed location, accuracy inflated by the distance
/// estimate. Several: RSSI-weighted centroid (weight `10^(rssi/10)`), accuracy
/// capped at `min(max_distance + 10, 100)`. Confidence is the mean of an
/// RSSI-normalized and a distance-normalized score, clamped to [0, 100].
pub fn fuse(observations: &[BeaconObservation]) -> Option<BeaconFix> {
    match observations {
        [] => None,
        [single] => {
            let confidence = confidence_for(observations) * SINGLE_BEACON_CONFIDENCE_SCALE;
            Some(BeaconFix {
                lat: single.beacon.lat,
                lng: single.beacon.lng,
                accuracy_meters: single.beacon.position_accuracy_meters
                    + single.estimated_distance_meters,
                confidence: confidence.clamp(0.0, 100.0),
            })
        }
        many => {
            let mut weight_sum = 0.0;
            let mut lat_sum = 0.0;
            let mut lng_sum = 0.0;
            let mut max_distance = 0f64;

            for obs in many {
                let weight = 10f64.powf(obs.rssi / 10.0);
                weight_sum += weight;
                lat_sum += obs.beacon.lat * weight;
                lng_sum += obs.beacon.lng * weight;
                max_distance = max_distance.max(obs.estimated_distance_meters);
            }

            if weight_sum <= 0.0 {
                return None;
            }

            Some(BeaconFix {
                lat: lat_sum / weight_sum,
                lng: lng_sum / weight_sum,
                accuracy_meters: (max_distance + 10.0).min(MAX_FUSED_ACCURACY_METERS),
                confidence: confidence_for(many).clamp(0.0, 100.0),
            })
        }
    }
}

fn confidence_for(observations: &[BeaconObservation]) -> f64 {
    let count = observations.len() as f64;

    let mean_rssi: f64 = observations.iter().map(|o| o.rssi).sum::<f64>() / count;
    let rssi_score = ((mean_rssi - RSSI_FLOOR_DBM) / (RSSI_CEILING_DBM - RSSI_FLOOR_DBM) * 100.0)
        .clamp(0.0, 100.0);

    let mean_distance: f64 = observations
        .iter()
        .map(|o| o.estimated_distance_meters)
        .sum::<f64>()
        / count;
    let distance_score = ((1.0 - mean_distance / MAX_USEFUL_RANGE_METERS) * 100.0).clamp(0.0, 100.0);

    (rssi_score + distance_score) / 2.0
}
