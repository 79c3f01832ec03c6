//! Geometry, geodesy and trilateration numerics

pub mod geometry;
pub mod geodesic;
pub mod multilateration;

pub use geometry::{
    decode_linear, geodetic_to_local, horizontal_projection, local_to_geodetic, shift_rotate, wrap_2pi, wrap_360,
    GeoPoint,
};
pub use geodesic::{geodesic_project, GeodesicFix};
pub use multilateration::{solve_ranges_2d, RangePoint, RangeSolution, SolverSettings};
