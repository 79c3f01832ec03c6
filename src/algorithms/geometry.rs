//! Planar geometry and unit conversion helpers
//!
//! All angles are measured clockwise from north.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Wrap an angle in degrees to [0, 360)
pub fn wrap_360(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle in radians to [0, 2π)
pub fn wrap_2pi(rad: f64) -> f64 {
    let wrapped = rad.rem_euclid(2.0 * PI);
    if wrapped >= 2.0 * PI {
        0.0
    } else {
        wrapped
    }
}

/// Convert a bearing and range measured by the transducer into a bearing and
/// range from the GNSS antenna, in the geographic frame.
///
/// * `heading` - vessel heading, degrees
/// * `phi` - angular misalignment between transducer zero and compass zero, degrees
/// * `bearing` - bearing to the beacon relative to the transducer, degrees
/// * `range` - horizontal range to the beacon, meters
/// * `x_offset`, `y_offset` - transversal and longitudinal lever arm, meters
///
/// Returns `(absolute_bearing_deg, absolute_range_m)`.
pub fn shift_rotate(
    heading: f64,
    phi: f64,
    bearing: f64,
    range: f64,
    x_offset: f64,
    y_offset: f64,
) -> (f64, f64) {
    let theta = wrap_2pi((bearing + phi).to_radians());

    let x = x_offset + range * theta.sin();
    let y = y_offset + range * theta.cos();

    let abs_range = x.hypot(y);

    let mut raw_bearing = x.atan2(y);
    if raw_bearing < 0.0 {
        raw_bearing += 2.0 * PI;
    }

    let abs_bearing = wrap_2pi(raw_bearing + heading.to_radians()).to_degrees();
    (wrap_360(abs_bearing), abs_range)
}

/// Horizontal component of a slant range given the vertical separation of the
/// two ends. A separation larger than the range (or unknown) leaves the range
/// as is.
pub fn horizontal_projection(slant_range: f64, depth_delta: Option<f64>) -> f64 {
    match depth_delta.map(f64::abs) {
        Some(delta) if delta <= slant_range => {
            (slant_range * slant_range - delta * delta).sqrt()
        }
        _ => slant_range,
    }
}

/// Map a response code onto a physical value in `[min, max]`
pub fn decode_linear(code: u32, code_range: u32, min: f64, max: f64) -> f64 {
    code as f64 * (max - min) / code_range as f64 + min
}

/// Geographic point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl GeoPoint {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat_deg, lon_deg }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat_deg) && (-180.0..=180.0).contains(&self.lon_deg)
    }
}

// Small-area tangent plane, good to a few centimeters over a few kilometers
const METERS_PER_DEG_LAT: f64 = 111_132.0;
const METERS_PER_DEG_LON_EQ: f64 = 111_320.0;

/// Convert a geographic point to east/north meters relative to `origin`
pub fn geodetic_to_local(point: &GeoPoint, origin: &GeoPoint) -> (f64, f64) {
    let meters_per_deg_lon = METERS_PER_DEG_LON_EQ * origin.lat_deg.to_radians().cos();

    let east = (point.lon_deg - origin.lon_deg) * meters_per_deg_lon;
    let north = (point.lat_deg - origin.lat_deg) * METERS_PER_DEG_LAT;
    (east, north)
}

/// Inverse of [`geodetic_to_local`]
pub fn local_to_geodetic(east: f64, north: f64, origin: &GeoPoint) -> GeoPoint {
    let meters_per_deg_lon = METERS_PER_DEG_LON_EQ * origin.lat_deg.to_radians().cos();

    GeoPoint {
        lat_deg: origin.lat_deg + north / METERS_PER_DEG_LAT,
        lon_deg: origin.lon_deg + east / meters_per_deg_lon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wrap() {
        assert_relative_eq!(wrap_360(370.0), 10.0);
        assert_relative_eq!(wrap_360(-10.0), 350.0);
        assert_relative_eq!(wrap_360(360.0), 0.0);
        assert_relative_eq!(wrap_2pi(-PI / 2.0), 1.5 * PI);
    }

    #[test]
    fn test_shift_rotate_identity() {
        let (bearing, range) = shift_rotate(0.0, 0.0, 30.0, 100.0, 0.0, 0.0);
        assert_relative_eq!(bearing, 30.0, epsilon = 1e-9);
        assert_relative_eq!(range, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shift_rotate_heading_and_misalignment() {
        // Heading and misalignment simply add up without lever arm
        let (bearing, range) = shift_rotate(350.0, 5.0, 10.0, 50.0, 0.0, 0.0);
        assert_relative_eq!(bearing, 5.0, epsilon = 1e-9);
        assert_relative_eq!(range, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shift_rotate_lever_arm() {
        // Beacon dead ahead with a 10 m longitudinal lever arm
        let (bearing, range) = shift_rotate(90.0, 0.0, 0.0, 100.0, 0.0, 10.0);
        assert_relative_eq!(bearing, 90.0, epsilon = 1e-9);
        assert_relative_eq!(range, 110.0, epsilon = 1e-9);

        // Beacon abeam to starboard
        let (bearing, range) = shift_rotate(0.0, 0.0, 90.0, 30.0, 0.0, 40.0);
        assert_relative_eq!(range, 50.0, epsilon = 1e-9);
        assert_relative_eq!(bearing, (30.0f64).atan2(40.0).to_degrees(), epsilon = 1e-9);
    }

    #[test]
    fn test_horizontal_projection() {
        assert_relative_eq!(horizontal_projection(100.0, Some(60.0)), 80.0, epsilon = 1e-9);
        assert_relative_eq!(horizontal_projection(100.0, Some(-60.0)), 80.0, epsilon = 1e-9);
        assert_relative_eq!(horizontal_projection(100.0, Some(120.0)), 100.0);
        assert_relative_eq!(horizontal_projection(100.0, None), 100.0);
    }

    #[test]
    fn test_decode_linear() {
        assert_relative_eq!(decode_linear(0, 8000, 5.0, 30.0), 5.0);
        assert_relative_eq!(decode_linear(8000, 8000, 5.0, 30.0), 30.0);
        assert_relative_eq!(decode_linear(4000, 8000, 5.0, 30.0), 17.5);
    }

    #[test]
    fn test_local_frame_roundtrip() {
        let origin = GeoPoint::new(44.5, 33.5);
        let point = GeoPoint::new(44.501, 33.502);
        let (east, north) = geodetic_to_local(&point, &origin);
        assert!(east > 150.0 && east < 165.0);
        assert_relative_eq!(north, 111.132, epsilon = 1e-6);

        let back = local_to_geodetic(east, north, &origin);
        assert_relative_eq!(back.lat_deg, point.lat_deg, epsilon = 1e-9);
        assert_relative_eq!(back.lon_deg, point.lon_deg, epsilon = 1e-9);
    }
}
