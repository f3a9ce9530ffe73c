use serde::{Deserialize, Serialize};

use crate::models::trip::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Distance to the pickup point under which an accepted trip auto-starts.
pub const PICKUP_ARRIVAL_METERS: f64 = 250.0;

/// Distance to the dropoff point under which the end-ride action unlocks.
pub const DROPOFF_ARRIVAL_METERS: f64 = 150.0;

/// 40 km/h, the fixed speed assumption behind ETA estimates.
pub const ASSUMED_SPEED_MPS: f64 = 11.11;

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub minutes: i64,
    pub seconds: i64,
}

pub fn eta_at_assumed_speed(distance_m: f64) -> EtaEstimate {
    let total_seconds = (distance_m.max(0.0) / ASSUMED_SPEED_MPS).round() as i64;
    EtaEstimate {
        minutes: total_seconds / 60,
        seconds: total_seconds % 60,
    }
}

#[cfg(test)]
mod tests {
    use super::{eta_at_assumed_speed, haversine_m, PICKUP_ARRIVAL_METERS};
    use crate::models::trip::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_m(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let b = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        assert_eq!(haversine_m(&a, &b), haversine_m(&b, &a));
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_m(&london, &paris);
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn same_point_is_within_pickup_threshold() {
        let p = GeoPoint {
            lat: 5.6037,
            lng: -0.1870,
        };
        assert!(haversine_m(&p, &p) <= PICKUP_ARRIVAL_METERS);
    }

    #[test]
    fn eta_reports_whole_minutes_and_seconds() {
        // 11.11 m/s for 90 seconds
        let eta = eta_at_assumed_speed(11.11 * 90.0);
        assert_eq!(eta.minutes, 1);
        assert_eq!(eta.seconds, 30);

        let zero = eta_at_assumed_speed(0.0);
        assert_eq!(zero.minutes, 0);
        assert_eq!(zero.seconds, 0);
    }
}
