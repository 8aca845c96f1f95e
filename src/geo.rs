//! Great-circle geometry on a spherical Earth model.
//!
//! All angles are degrees, all distances kilometres. The sphere radius is
//! the conventional mean Earth radius of 6371 km, which keeps derived
//! distances consistent with the fleet producers.

use crate::model::Position;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two positions using the haversine formula.
pub fn haversine_km(a: Position, b: Position) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Initial course from `a` towards `b`, normalised into [0, 360).
pub fn initial_bearing_deg(a: Position, b: Position) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let y = d_lng.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lng.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Destination point after travelling `distance_km` from `origin` along the
/// given initial bearing. Longitude is wrapped into (-180, 180].
pub fn translate(origin: Position, bearing_deg: f64, distance_km: f64) -> Position {
    let angular = distance_km / EARTH_RADIUS_KM;
    let bearing = bearing_deg.to_radians();
    let lat = origin.lat.to_radians();
    let lng = origin.lng.to_radians();

    let dest_lat = (lat.sin() * angular.cos() + lat.cos() * angular.sin() * bearing.cos()).asin();
    let dest_lng = lng
        + (bearing.sin() * angular.sin() * lat.cos())
            .atan2(angular.cos() - lat.sin() * dest_lat.sin());

    Position {
        lat: dest_lat.to_degrees(),
        lng: wrap_longitude(dest_lng.to_degrees()),
    }
}

fn wrap_longitude(lng: f64) -> f64 {
    let mut wrapped = (lng + 180.0) % 360.0;
    if wrapped <= 0.0 {
        wrapped += 360.0;
    }
    wrapped - 180.0
}
