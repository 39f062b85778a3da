//! Great-circle helpers for nearest-station search.

use crate::types::Coordinates;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude
pub const KM_PER_DEGREE: f64 = 111.045;

/// Great-circle distance between two points, in kilometres
#[must_use]
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let d_lat = (b.latitude() - a.latitude()).to_radians();
    let d_lon = (b.longitude() - a.longitude()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Latitude/longitude window enclosing a circle of `radius_km` around a point.
///
/// Used as a cheap pre-filter before computing exact distances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchBox {
    /// Southern edge
    pub min_latitude: f64,
    /// Northern edge
    pub max_latitude: f64,
    /// Western edge
    pub min_longitude: f64,
    /// Eastern edge
    pub max_longitude: f64,
}

impl SearchBox {
    /// Whether `point` lies inside the window
    #[must_use]
    pub fn contains(&self, point: Coordinates) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude())
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude())
    }
}

/// Compute the search window around `center`.
///
/// A window that would cross the ±180° meridian covers every longitude
/// instead, leaving longitude to the exact distance check.
#[must_use]
pub fn search_box(center: Coordinates, radius_km: f64) -> SearchBox {
    let lat_range = radius_km / KM_PER_DEGREE;
    // Near the poles the longitude span blows up; cap it at the whole circle.
    let cos_lat = center.latitude().to_radians().cos().abs();
    let lon_range = if cos_lat < f64::EPSILON {
        180.0
    } else {
        (radius_km / (KM_PER_DEGREE * cos_lat)).min(180.0)
    };

    let (mut min_longitude, mut max_longitude) =
        (center.longitude() - lon_range, center.longitude() + lon_range);
    if min_longitude < -180.0 || max_longitude > 180.0 {
        (min_longitude, max_longitude) = (-180.0, 180.0);
    }

    SearchBox {
        min_latitude: center.latitude() - lat_range,
        max_latitude: center.latitude() + lat_range,
        min_longitude,
        max_longitude,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(lat: f64, lon: f64) -> Coordinates {
        Coordinates::new(lat, lon).unwrap()
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = at(28.61, 77.20);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn delhi_to_mumbai_is_about_1150_km() {
        let delhi = at(28.6139, 77.2090);
        let mumbai = at(19.0760, 72.8777);
        let d = haversine_km(delhi, mumbai);
        assert!((1140.0..1160.0).contains(&d), "got {d}");
    }

    #[test]
    fn box_contains_points_within_radius() {
        let center = at(28.61, 77.20);
        let window = search_box(center, 10.0);
        assert!(window.contains(at(28.65, 77.25)));
        assert!(!window.contains(at(28.80, 77.20)));
    }

    #[test]
    fn box_at_pole_spans_all_longitudes() {
        let window = search_box(at(90.0, 0.0), 10.0);
        assert!(window.contains(at(89.95, 179.0)));
    }

    #[test]
    fn box_across_the_date_line_keeps_the_far_side() {
        let center = at(-17.0, 179.99);
        let across = at(-17.0, -179.99);
        assert!(haversine_km(center, across) < 5.0);

        let window = search_box(center, 10.0);
        assert!(window.contains(across));
        assert!(!window.contains(at(-17.5, -179.99)));

        let window = search_box(across, 10.0);
        assert!(window.contains(center));
    }
}
