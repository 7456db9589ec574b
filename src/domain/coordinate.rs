// Coordinate domain model
use serde::{Deserialize, Serialize};

/// Mean earth radius used for great-circle distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// False for NaN/infinite components or values outside the valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        great_circle_distance(self, other)
    }

    /// `lat,lng` form used in provider query strings.
    pub fn to_lat_lng(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn great_circle_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.min(1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (Coordinate::new(52.2297, 21.0122), Coordinate::new(41.8919, 12.5113)),
            (Coordinate::new(-33.8688, 151.2093), Coordinate::new(35.6762, 139.6503)),
            (Coordinate::new(0.0, 179.9), Coordinate::new(0.0, -179.9)),
        ];

        for (a, b) in pairs {
            assert_eq!(great_circle_distance(&a, &b), great_circle_distance(&b, &a));
        }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = Coordinate::new(6.5244, 3.3792);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // Warsaw to Rome is roughly 1316 km on a 6371 km sphere.
        let warsaw = Coordinate::new(52.2297, 21.0122);
        let rome = Coordinate::new(41.8919, 12.5113);
        let km = warsaw.distance_to(&rome) / 1000.0;
        assert!((km - 1316.0).abs() < 5.0, "got {km}");
    }

    #[test]
    fn test_one_thousandth_degree_of_latitude() {
        let a = Coordinate::new(10.0, 20.0);
        let b = Coordinate::new(10.001, 20.0);
        let m = a.distance_to(&b);
        assert!((m - 111.19).abs() < 0.1, "got {m}");
    }

    #[test]
    fn test_is_valid() {
        assert!(Coordinate::new(90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }
}
