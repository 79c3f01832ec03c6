//! Track filters for USBL beacon fixes
//!
//! Fixes first pass through [`TrackOutlierFilter`], which drops jumps no real
//! beacon could make, and then through [`TrackSmoother`], a short moving
//! average over latitude, longitude and depth.

use nalgebra::Vector3;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const METERS_PER_DEG_LAT: f64 = 111_132.0;
const METERS_PER_DEG_LON_EQ: f64 = 111_320.0;

/// Geographic fix of a beacon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub depth_m: f64,
}

impl TrackPoint {
    pub fn new(lat_deg: f64, lon_deg: f64, depth_m: f64) -> Self {
        Self { lat_deg, lon_deg, depth_m }
    }

    /// Horizontal distance to another point (m), flat-earth approximation
    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        let mid_lat = ((self.lat_deg + other.lat_deg) / 2.0).to_radians();
        let north = (other.lat_deg - self.lat_deg) * METERS_PER_DEG_LAT;
        let east = (other.lon_deg - self.lon_deg) * METERS_PER_DEG_LON_EQ * mid_lat.cos();
        north.hypot(east)
    }

    fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.lat_deg, self.lon_deg, self.depth_m)
    }

    fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Rejects fixes that moved further from the last accepted fix than the
/// beacon could plausibly travel. The most recent `window` accepted fixes
/// are kept.
#[derive(Debug, Clone)]
pub struct TrackOutlierFilter {
    /// Accepted fixes kept, and consecutive rejections after which the
    /// filter restarts on the new fix
    pub window: usize,
    /// Highest plausible beacon speed (m/s)
    pub threshold_mps: f64,
    /// Distance always tolerated regardless of elapsed time (m)
    pub gate_m: f64,
    accepted: VecDeque<(TrackPoint, Instant)>,
    consecutive_rejections: usize,
}

impl TrackOutlierFilter {
    pub fn new(window: usize, threshold_mps: f64, gate_m: f64) -> Self {
        let window = window.max(1);
        Self {
            window,
            threshold_mps,
            gate_m,
            accepted: VecDeque::with_capacity(window),
            consecutive_rejections: 0,
        }
    }

    /// Feed a fix. Returns the fix if accepted, `None` if it was rejected.
    pub fn process(&mut self, point: TrackPoint, at: Instant) -> Option<TrackPoint> {
        let (last, last_at) = match self.accepted.back() {
            Some(&entry) => entry,
            None => return Some(self.accept(point, at)),
        };

        let elapsed = at.saturating_duration_since(last_at).as_secs_f64();
        let allowed = self.gate_m + self.threshold_mps * elapsed;

        if last.distance_to(&point) <= allowed {
            return Some(self.accept(point, at));
        }

        self.consecutive_rejections += 1;
        if self.consecutive_rejections >= self.window {
            // The beacon has really moved (or the reference was the outlier)
            self.accepted.clear();
            return Some(self.accept(point, at));
        }

        None
    }

    pub fn consecutive_rejections(&self) -> usize {
        self.consecutive_rejections
    }

    /// Accepted fixes, oldest first
    pub fn accepted(&self) -> impl Iterator<Item = &TrackPoint> {
        self.accepted.iter().map(|(point, _)| point)
    }

    fn accept(&mut self, point: TrackPoint, at: Instant) -> TrackPoint {
        self.accepted.push_back((point, at));
        while self.accepted.len() > self.window {
            self.accepted.pop_front();
        }
        self.consecutive_rejections = 0;
        point
    }
}

/// Moving average over the most recent fixes
#[derive(Debug, Clone)]
pub struct TrackSmoother {
    /// Number of fixes averaged
    pub window: usize,
    /// Gap after which history is discarded
    pub max_gap: Duration,
    samples: VecDeque<Vector3<f64>>,
    last_update: Option<Instant>,
}

impl TrackSmoother {
    pub fn new(window: usize, max_gap: Duration) -> Self {
        let window = window.max(1);
        Self {
            window,
            max_gap,
            samples: VecDeque::with_capacity(window),
            last_update: None,
        }
    }

    /// Feed a fix and get the smoothed fix back
    pub fn process(&mut self, point: TrackPoint, at: Instant) -> TrackPoint {
        if let Some(last) = self.last_update {
            if at.saturating_duration_since(last) > self.max_gap {
                self.samples.clear();
            }
        }
        self.last_update = Some(at);

        self.samples.push_back(point.as_vector());
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }

        let sum: Vector3<f64> = self.samples.iter().sum();
        TrackPoint::from_vector(&(sum / self.samples.len() as f64))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
