use crate::models::{GeofenceArea, LocationSample, ValidationResult};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two lat/lng points, meters.
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Check a fused sample against the registered geofences.
///
/// A sample satisfies a geofence when its distance to the center is within
/// `radius + min(accuracy, max_leniency)`; the leniency absorbs GPS error
/// without widening the nominal radius. Among satisfied geofences the nearest
/// wins. With none satisfied, the nearest geofence is still reported so the
/// caller can say "N m outside <name>". Always a warning, never a block.
pub fn validate(
    sample: &LocationSample,
    geofences: &[GeofenceArea],
    max_leniency_meters: f64,
) -> ValidationResult {
    let leniency = sample.accuracy_meters.min(max_leniency_meters).max(0.0);

    let mut nearest_valid: Option<(&GeofenceArea, f64)> = None;
    let mut nearest_any: Option<(&GeofenceArea, f64)> = None;

    for geofence in geofences {
        if geofence.radius_meters <= 0.0 {
            continue;
        }

        let distance = haversine_meters(
            sample.lat,
            sample.lng,
            geofence.center_lat,
            geofence.center_lng,
        );

        if nearest_any.map_or(true, |(_, best)| distance < best) {
            nearest_any = Some((geofence, distance));
        }

        if distance <= geofence.radius_meters + leniency
            && nearest_valid.map_or(true, |(_, best)| distance < best)
        {
            nearest_valid = Some((geofence, distance));
        }
    }

    match (nearest_valid, nearest_any) {
        (Some((geofence, distance)), _) => ValidationResult {
            sample_id: sample.id.clone(),
            geofence_id: Some(geofence.id.clone()),
            is_valid: true,
            distance_meters: Some(distance),
            message: format!("within {}", geofence.name),
        },
        (None, Some((geofence, distance))) => ValidationResult {
            sample_id: sample.id.clone(),
            geofence_id: Some(geofence.id.clone()),
            is_valid: false,
            distance_meters: Some(distance),
            message: format!(
                "{:.0} m outside {}",
                (distance - geofence.radius_meters).max(0.0),
                geofence.name
            ),
        },
        (None, None) => ValidationResult {
            sample_id: sample.id.clone(),
            geofence_id: None,
            is_valid: false,
            distance_meters: None,
            message: "no geofences registered".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeofenceType, LocationSource};

    // ~1 degree latitude ≈ 111,195 m on this sphere; offsets below are
    // derived from that.
    const METERS_PER_DEG_LAT: f64 = 111_195.0;

    fn office(id: &str, name: &str, lat: f64, lng: f64, radius: f64) -> GeofenceArea {
        GeofenceArea {
            id: id.into(),
            name: name.into(),
            center_lat: lat,
            center_lng: lng,
            radius_meters: radius,
            kind: GeofenceType::Office,
        }
    }

    fn sample_at(lat: f64, lng: f64, accuracy: f64) -> LocationSample {
        LocationSample::new("E1", lat, lng, accuracy, LocationSource::Gps, 90.0)
    }

    #[test]
    fn sample_inside_radius_is_valid() {
        // Scenario: 10 m accuracy fix, 30 m from a 50 m office geofence.
        let fence = office("g1", "Head Office", 12.9700, 77.5900, 50.0);
        let sample = sample_at(12.9700 + 30.0 / METERS_PER_DEG_LAT, 77.5900, 10.0);

        let result = validate(&sample, &[fence], 50.0);
        assert!(result.is_valid);
        assert_eq!(result.geofence_id.as_deref(), Some("g1"));
        assert!((result.distance_meters.unwrap() - 30.0).abs() < 1.0);
    }

    #[test]
    fn accuracy_leniency_absorbs_gps_error() {
        let fence = office("g1", "Head Office", 12.9700, 77.5900, 50.0);
        // 70 m out with 25 m accuracy: 50 + 25 >= 70, still valid.
        let inside = sample_at(12.9700 + 70.0 / METERS_PER_DEG_LAT, 77.5900, 25.0);
        assert!(validate(&inside, &[fence.clone()], 50.0).is_valid);

        // Same point with a tight 5 m fix is out.
        let outside = sample_at(12.9700 + 70.0 / METERS_PER_DEG_LAT, 77.5900, 5.0);
        assert!(!validate(&outside, &[fence], 50.0).is_valid);
    }

    #[test]
    fn leniency_is_capped() {
        let fence = office("g1", "Head Office", 12.9700, 77.5900, 50.0);
        // 300 m accuracy would swallow the whole city without the cap.
        let sample = sample_at(12.9700 + 120.0 / METERS_PER_DEG_LAT, 77.5900, 300.0);
        let result = validate(&sample, &[fence], 50.0);
        assert!(!result.is_valid);
    }

    #[test]
    fn nearest_valid_geofence_wins() {
        let near = office("near", "Site A", 12.9700, 77.5900, 500.0);
        let far = office("far", "Site B", 12.9750, 77.5900, 2000.0);
        let sample = sample_at(12.9701, 77.5900, 10.0);

        let result = validate(&sample, &[far, near], 50.0);
        assert!(result.is_valid);
        assert_eq!(result.geofence_id.as_deref(), Some("near"));
    }

    #[test]
    fn invalid_result_names_nearest_geofence() {
        // Scenario: 250 m from the nearest 100 m geofence.
        let fence = office("g1", "Warehouse", 12.9700, 77.5900, 100.0);
        let sample = sample_at(12.9700 + 250.0 / METERS_PER_DEG_LAT, 77.5900, 10.0);

        let result = validate(&sample, &[fence], 50.0);
        assert!(!result.is_valid);
        assert_eq!(result.geofence_id.as_deref(), Some("g1"));
        assert!((result.distance_meters.unwrap() - 250.0).abs() < 1.0);
        assert!(result.message.contains("Warehouse"));
    }

    #[test]
    fn validation_is_deterministic() {
        let fences = vec![
            office("a", "A", 12.97, 77.59, 80.0),
            office("b", "B", 12.98, 77.60, 120.0),
        ];
        let sample = sample_at(12.9705, 77.5902, 12.0);

        let first = validate(&sample, &fences, 50.0);
        for _ in 0..10 {
            let again = validate(&sample, &fences, 50.0);
            assert_eq!(again.geofence_id, first.geofence_id);
            assert_eq!(again.is_valid, first.is_valid);
            assert_eq!(again.distance_meters, first.distance_meters);
        }
    }

    #[test]
    fn empty_geofence_set_is_invalid_without_target() {
        let sample = sample_at(12.97, 77.59, 10.0);
        let result = validate(&sample, &[], 50.0);
        assert!(!result.is_valid);
        assert!(result.geofence_id.is_none());
        assert!(result.distance_meters.is_none());

        // The wire form carries an explicit null, not a coerced non-finite
        // float.
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire["distanceMeters"].is_null());
    }
}
