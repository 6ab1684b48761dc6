//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Average speed in km/h for travel time estimation
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimated driving seconds using a road coefficient and average speed
pub fn estimated_travel_seconds(
    from: &Coordinates,
    to: &Coordinates,
    road_coefficient: f64,
    average_speed_kmh: f64,
) -> u64 {
    let road_km = haversine_distance(from, to) * road_coefficient;
    (road_km / average_speed_kmh * 3600.0) as u64
}

/// Planar squared distance in degrees; only meaningful for ranking nearby points.
pub fn squared_distance(a: &Coordinates, b: &Coordinates) -> f64 {
    let d_lat = a.lat - b.lat;
    let d_lng = a.lng - b.lng;
    d_lat * d_lat + d_lng * d_lng
}

/// Running mean of a set of coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Centroid {
    sum_lat: f64,
    sum_lng: f64,
    count: usize,
}

impl Centroid {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Coordinates>) -> Self {
        let mut centroid = Self::default();
        for point in points {
            centroid.add(point);
        }
        centroid
    }

    pub fn add(&mut self, point: &Coordinates) {
        self.sum_lat += point.lat;
        self.sum_lng += point.lng;
        self.count += 1;
    }

    /// Mean coordinate, or None when no points were added.
    pub fn center(&self) -> Option<Coordinates> {
        (self.count > 0).then(|| Coordinates {
            lat: self.sum_lat / self.count as f64,
            lng: self.sum_lng / self.count as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_denver_boulder() {
        let denver = Coordinates { lat: 39.7392, lng: -104.9903 };
        let boulder = Coordinates { lat: 40.0150, lng: -105.2705 };

        let distance = haversine_distance(&denver, &boulder);

        // Denver to Boulder is approximately 39 km
        assert!((distance - 39.0).abs() < 3.0, "got {}", distance);
    }

    #[test]
    fn test_haversine_same_point() {
        let point = Coordinates { lat: 39.0, lng: -105.0 };
        let distance = haversine_distance(&point, &point);
        assert!((distance - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_estimated_travel_seconds() {
        let from = Coordinates { lat: 39.70, lng: -105.00 };
        let to = Coordinates { lat: 39.70, lng: -104.50 };

        // ~43 km straight, ~56 km road, ~84 minutes at 40 km/h
        let seconds = estimated_travel_seconds(&from, &to, ROAD_COEFFICIENT, AVERAGE_SPEED_KMH);
        assert!(seconds > 70 * 60 && seconds < 100 * 60, "got {}", seconds);
        assert_eq!(estimated_travel_seconds(&from, &from, ROAD_COEFFICIENT, AVERAGE_SPEED_KMH), 0);
    }

    #[test]
    fn test_squared_distance() {
        let a = Coordinates { lat: 1.0, lng: 1.0 };
        let b = Coordinates { lat: 4.0, lng: 5.0 };
        assert!((squared_distance(&a, &b) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_incremental_matches_batch() {
        let points = vec![
            Coordinates { lat: 39.0, lng: -105.0 },
            Coordinates { lat: 40.0, lng: -104.0 },
        ];
        let mut centroid = Centroid::from_points(&points);
        let center = centroid.center().unwrap();
        assert!((center.lat - 39.5).abs() < 1e-9);
        assert!((center.lng + 104.5).abs() < 1e-9);

        centroid.add(&Coordinates { lat: 41.0, lng: -103.0 });
        let center = centroid.center().unwrap();
        assert!((center.lat - 40.0).abs() < 1e-9);
        assert!((center.lng + 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_centroid_has_no_center() {
        assert!(Centroid::default().center().is_none());
    }
}
