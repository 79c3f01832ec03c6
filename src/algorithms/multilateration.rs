//! Range trilateration in the horizontal plane
//!
//! Solves for X/Y given a fixed Z and ranges to three or more known points,
//! using Levenberg-Marquardt on the sum of squared range residuals.

use nalgebra::{Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Known point with a measured range to the unknown position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Measured range (meters)
    pub range: f64,
}

impl RangePoint {
    pub fn new(x: f64, y: f64, z: f64, range: f64) -> Self {
        Self { x, y, z, range }
    }

    fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// Solver tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Maximum number of LM iterations
    pub max_iterations: usize,
    /// Stop once an accepted step is shorter than this (meters)
    pub precision_threshold: f64,
    /// Initial damping factor
    pub damping: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            precision_threshold: 1e-8,
            damping: 1.0,
        }
    }
}

/// Output of [`solve_ranges_2d`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSolution {
    pub x: f64,
    pub y: f64,
    /// RMS of the range residuals at the solution (meters)
    pub residual: f64,
    pub iterations: usize,
}

/// Solve for the horizontal position at depth `initial.z`.
///
/// The iteration always returns its best estimate; there is no failure mode.
/// Callers decide what a large residual means.
pub fn solve_ranges_2d(
    points: &[RangePoint],
    initial: Vector3<f64>,
    settings: &SolverSettings,
) -> RangeSolution {
    let z = initial.z;
    let mut estimate = Vector2::new(initial.x, initial.y);

    if points.is_empty() {
        return RangeSolution {
            x: estimate.x,
            y: estimate.y,
            residual: 0.0,
            iterations: 0,
        };
    }

    let mut lambda = settings.damping.max(1e-12);
    let mut nu = 2.0;
    let mut cost = sum_squared_residuals(points, &estimate, z);
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;

        let (jt_j, jt_r) = normal_equations(points, &estimate, z);

        let mut augmented = jt_j;
        augmented[(0, 0)] += lambda;
        augmented[(1, 1)] += lambda;

        let step = match augmented.try_inverse() {
            Some(inverse) => -(inverse * jt_r),
            None => break,
        };

        let candidate = estimate + step;
        let candidate_cost = sum_squared_residuals(points, &candidate, z);

        if candidate_cost < cost {
            estimate = candidate;
            cost = candidate_cost;
            lambda = (lambda / nu).max(1e-12);
            nu = 2.0;

            if step.norm() < settings.precision_threshold {
                break;
            }
        } else {
            lambda *= nu;
            nu = (nu * 2.0).min(16.0);

            // Damping this large means no descent direction is left
            if lambda > 1e12 {
                break;
            }
        }
    }

    RangeSolution {
        x: estimate.x,
        y: estimate.y,
        residual: (cost / points.len() as f64).sqrt(),
        iterations,
    }
}

/// Accumulate JᵀJ and Jᵀr for residuals r = predicted - measured
fn normal_equations(points: &[RangePoint], estimate: &Vector2<f64>, z: f64) -> (Matrix2<f64>, Vector2<f64>) {
    let position = Vector3::new(estimate.x, estimate.y, z);
    let mut jt_j = Matrix2::zeros();
    let mut jt_r = Vector2::zeros();

    for point in points {
        let diff = position - point.position();
        let predicted = diff.norm();
        if predicted < 1e-10 {
            continue;
        }

        let row = Vector2::new(diff.x / predicted, diff.y / predicted);
        let residual = predicted - point.range;

        jt_j += row * row.transpose();
        jt_r += row * residual;
    }

    (jt_j, jt_r)
}

fn sum_squared_residuals(points: &[RangePoint], estimate: &Vector2<f64>, z: f64) -> f64 {
    let position = Vector3::new(estimate.x, estimate.y, z);
    points
        .iter()
        .map(|point| {
            let residual = (position - point.position()).norm() - point.range;
            residual * residual
        })
        .sum()
}

/// Mean X/Y of the points, used as a neutral starting guess
pub fn centroid(points: &[RangePoint]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some((sx / n, sy / n))
}
