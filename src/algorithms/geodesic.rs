//! Direct geodesic problem on the WGS84 ellipsoid
//!
//! Vincenty's iterative solution is used first. When it does not converge
//! within its iteration budget the position is taken from a great-circle
//! (haversine) solution on a sphere with the ellipsoid's semi-major axis.

use crate::algorithms::geometry::wrap_2pi;
use crate::core::{WGS84_FLATTENING, WGS84_SEMI_MAJOR_AXIS};
use std::f64::consts::PI;

/// Default convergence threshold on σ (radians)
pub const VINCENTY_DEFAULT_EPSILON: f64 = 1e-12;
/// Default iteration budget
pub const VINCENTY_DEFAULT_ITERATIONS: usize = 200;

/// Reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters)
    pub semi_major_axis: f64,
    /// Flattening factor
    pub flattening: f64,
}

impl Ellipsoid {
    pub fn wgs84() -> Self {
        Self {
            semi_major_axis: WGS84_SEMI_MAJOR_AXIS,
            flattening: WGS84_FLATTENING,
        }
    }

    pub fn semi_minor_axis(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.flattening)
    }
}

/// Output of the Vincenty direct solver, angles in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VincentySolution {
    pub lat_rad: f64,
    pub lon_rad: f64,
    /// Forward azimuth of the geodesic at the destination
    pub final_azimuth_rad: f64,
    pub iterations: usize,
}

/// Solve the direct problem with Vincenty's formulae.
///
/// Returns `None` if σ has not converged to `epsilon` after `iteration_limit`
/// refinements.
pub fn vincenty_direct(
    lat_rad: f64,
    lon_rad: f64,
    azimuth_rad: f64,
    distance_m: f64,
    ellipsoid: &Ellipsoid,
    epsilon: f64,
    iteration_limit: usize,
) -> Option<VincentySolution> {
    let a = ellipsoid.semi_major_axis;
    let f = ellipsoid.flattening;
    let b = ellipsoid.semi_minor_axis();

    let (sin_alpha1, cos_alpha1) = azimuth_rad.sin_cos();

    let tan_u1 = (1.0 - f) * lat_rad.tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);

    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let sigma0 = distance_m / (b * big_a);
    let mut sigma = sigma0;
    let mut iterations = 0;

    let (sin_sigma, cos_sigma, cos_2sigma_m) = loop {
        let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let (sin_sigma, cos_sigma) = sigma.sin_cos();

        let delta_sigma = big_b
            * sin_sigma
            * (cos_2sigma_m
                + big_b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)
                        - big_b / 6.0
                            * cos_2sigma_m
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sigma_m * cos_2sigma_m)));

        let next_sigma = sigma0 + delta_sigma;
        if (next_sigma - sigma).abs() <= epsilon {
            break (sin_sigma, cos_sigma, cos_2sigma_m);
        }

        if iterations >= iteration_limit {
            return None;
        }
        iterations += 1;
        sigma = next_sigma;
    };

    let x = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + x * x).sqrt());

    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

    let lon2 = wrap_pi(lon_rad + l);
    let final_azimuth = sin_alpha.atan2(-x);

    Some(VincentySolution {
        lat_rad: lat2,
        lon_rad: lon2,
        final_azimuth_rad: wrap_2pi(final_azimuth),
        iterations,
    })
}

/// Great-circle destination on a sphere of the given radius. Always succeeds.
pub fn haversine_direct(
    lat_rad: f64,
    lon_rad: f64,
    distance_m: f64,
    azimuth_rad: f64,
    radius_m: f64,
) -> (f64, f64) {
    let delta = distance_m / radius_m;
    let (sin_lat1, cos_lat1) = lat_rad.sin_cos();
    let (sin_delta, cos_delta) = delta.sin_cos();

    let lat2 = (sin_lat1 * cos_delta + cos_lat1 * sin_delta * azimuth_rad.cos()).asin();
    let lon2 = lon_rad
        + (azimuth_rad.sin() * sin_delta * cos_lat1).atan2(cos_delta - sin_lat1 * lat2.sin());

    (lat2, wrap_pi(lon2))
}

/// Result of projecting a position along a bearing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicFix {
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Bearing from the destination back towards the origin, degrees
    pub reverse_azimuth_deg: f64,
    /// True when the spherical fallback produced the fix
    pub approximate: bool,
}

/// Project `(lat, lon)` along `bearing_deg` for `distance_m` on WGS84
pub fn geodesic_project(lat_deg: f64, lon_deg: f64, bearing_deg: f64, distance_m: f64) -> GeodesicFix {
    geodesic_project_with(
        lat_deg,
        lon_deg,
        bearing_deg,
        distance_m,
        VINCENTY_DEFAULT_EPSILON,
        VINCENTY_DEFAULT_ITERATIONS,
    )
}

/// [`geodesic_project`] with an explicit convergence budget
pub fn geodesic_project_with(
    lat_deg: f64,
    lon_deg: f64,
    bearing_deg: f64,
    distance_m: f64,
    epsilon: f64,
    iteration_limit: usize,
) -> GeodesicFix {
    let ellipsoid = Ellipsoid::wgs84();
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let azimuth = bearing_deg.to_radians();

    match vincenty_direct(lat, lon, azimuth, distance_m, &ellipsoid, epsilon, iteration_limit) {
        Some(solution) => GeodesicFix {
            lat_deg: solution.lat_rad.to_degrees(),
            lon_deg: solution.lon_rad.to_degrees(),
            reverse_azimuth_deg: wrap_2pi(solution.final_azimuth_rad + PI).to_degrees(),
            approximate: false,
        },
        None => {
            let (lat2, lon2) =
                haversine_direct(lat, lon, distance_m, azimuth, ellipsoid.semi_major_axis);
            GeodesicFix {
                lat_deg: lat2.to_degrees(),
                lon_deg: lon2.to_degrees(),
                reverse_azimuth_deg: wrap_2pi(azimuth + PI).to_degrees(),
                approximate: true,
            }
        }
    }
}

/// Wrap radians to [-π, π)
fn wrap_pi(rad: f64) -> f64 {
    (rad + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_equator_eastwards() {
        // One degree of longitude on the equator is exactly a * π / 180
        let distance = WGS84_SEMI_MAJOR_AXIS * PI / 180.0;
        let fix = geodesic_project(0.0, 0.0, 90.0, distance);
        assert!(!fix.approximate);
        assert_relative_eq!(fix.lat_deg, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fix.lon_deg, 1.0, epsilon = 1e-9);
        assert_relative_eq!(fix.reverse_azimuth_deg, 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_meridian_arc() {
        // Meridian arc from the equator to 1°N on WGS84
        let fix = geodesic_project(0.0, 0.0, 0.0, 110_574.3886);
        assert!(!fix.approximate);
        assert_relative_eq!(fix.lat_deg, 1.0, epsilon = 1e-6);
        assert_relative_eq!(fix.lon_deg, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_short_range_matches_sphere() {
        let fix = geodesic_project(44.6, 33.5, 45.0, 500.0);
        let (lat, lon) = haversine_direct(
            44.6f64.to_radians(),
            33.5f64.to_radians(),
            500.0,
            45.0f64.to_radians(),
            WGS84_SEMI_MAJOR_AXIS,
        );
        // Ellipsoid and sphere agree to a couple of meters at this range
        assert_relative_eq!(fix.lat_deg, lat.to_degrees(), epsilon = 2e-5);
        assert_relative_eq!(fix.lon_deg, lon.to_degrees(), epsilon = 2e-5);
    }

    #[test]
    fn test_fallback_reports_reciprocal_bearing() {
        // An empty iteration budget forces the spherical fallback
        let fix = geodesic_project_with(44.6, 33.5, 45.0, 2000.0, 1e-12, 0);
        assert!(fix.approximate);
        assert_relative_eq!(fix.reverse_azimuth_deg, 225.0, epsilon = 1e-9);
        assert!(fix.lat_deg > 44.6);
        assert!(fix.lon_deg > 33.5);
    }

    #[test]
    fn test_zero_distance() {
        let fix = geodesic_project(10.0, 20.0, 123.0, 0.0);
        assert_relative_eq!(fix.lat_deg, 10.0, epsilon = 1e-12);
        assert_relative_eq!(fix.lon_deg, 20.0, epsilon = 1e-12);
    }
}
