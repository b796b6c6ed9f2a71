use crate::domain::model::{Bounds, LatLng};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial bearing from `from` to `to`, radians clockwise from north.
pub fn bearing(from: LatLng, to: LatLng) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let d_lng = (to.lng - from.lng).to_radians();
    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    y.atan2(x)
}

/// Point reached by travelling `distance_m` along `bearing_rad`.
pub fn destination(origin: LatLng, bearing_rad: f64, distance_m: f64) -> LatLng {
    let delta = distance_m / EARTH_RADIUS_M;
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing_rad.cos()).asin();
    let lng2 = lng1
        + (bearing_rad.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    LatLng::new(lat2.to_degrees(), lng2.to_degrees())
}

/// Axis-aligned box around the points, None for an empty set.
pub fn enclosing_bounds(points: &[LatLng]) -> Option<Bounds> {
    let first = points.first()?;
    let mut bounds = Bounds {
        south_west: *first,
        north_east: *first,
    };
    for p in &points[1..] {
        bounds.south_west.lat = bounds.south_west.lat.min(p.lat);
        bounds.south_west.lng = bounds.south_west.lng.min(p.lng);
        bounds.north_east.lat = bounds.north_east.lat.max(p.lat);
        bounds.north_east.lng = bounds.north_east.lng.max(p.lng);
    }
    Some(bounds)
}
