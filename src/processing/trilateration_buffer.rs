//! Freshness-windowed range points for LBL positioning

use crate::algorithms::multilateration::RangePoint;
use crate::core::BeaconAddress;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default age after which a point no longer takes part in a solution
pub const DEFAULT_MAX_POINT_AGE: Duration = Duration::from_secs(10);
/// Default number of fresh points needed for a solution
pub const DEFAULT_MIN_POINTS: usize = 3;

/// Range point stamped with the time it was measured
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedRangePoint {
    pub address: BeaconAddress,
    pub point: RangePoint,
    pub timestamp: Instant,
}

impl TimedRangePoint {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

/// Latest range point per beacon. Points are never pruned on insert; stale
/// ones are skipped when read.
#[derive(Debug, Clone)]
pub struct TrilaterationBuffer {
    points: BTreeMap<BeaconAddress, TimedRangePoint>,
    max_age: Duration,
    min_points: usize,
}

impl Default for TrilaterationBuffer {
    fn default() -> Self {
        Self {
            points: BTreeMap::new(),
            max_age: DEFAULT_MAX_POINT_AGE,
            min_points: DEFAULT_MIN_POINTS,
        }
    }
}

impl TrilaterationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_age: Duration, min_points: usize) -> Self {
        Self {
            max_age,
            min_points,
            ..Self::default()
        }
    }

    /// Replace the point for `address`
    pub fn update_point(&mut self, address: BeaconAddress, point: RangePoint, now: Instant) {
        self.points.insert(
            address,
            TimedRangePoint {
                address,
                point,
                timestamp: now,
            },
        );
    }

    /// Points young enough to be used, ordered by address
    pub fn valid_points(&self, now: Instant) -> Vec<RangePoint> {
        self.points
            .values()
            .filter(|p| p.age(now) <= self.max_age)
            .map(|p| p.point)
            .collect()
    }

    pub fn can_form_navigation_base(&self, now: Instant) -> bool {
        self.points
            .values()
            .filter(|p| p.age(now) <= self.max_age)
            .count()
            >= self.min_points
    }

    pub fn remove_point(&mut self, address: BeaconAddress) -> bool {
        self.points.remove(&address).is_some()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::core::Clock;

    fn fill(buffer: &mut TrilaterationBuffer, now: Instant) {
        buffer.update_point(BeaconAddress::Addr1, RangePoint::new(0.0, 0.0, 30.0, 120.0), now);
        buffer.update_point(BeaconAddress::Addr2, RangePoint::new(200.0, 0.0, 30.0, 110.0), now);
        buffer.update_point(BeaconAddress::Addr3, RangePoint::new(0.0, 200.0, 30.0, 150.0), now);
    }

    #[test]
    fn test_navigation_base_within_window() {
        let clock = ManualClock::new();
        let mut buffer = TrilaterationBuffer::new();
        fill(&mut buffer, clock.now());

        assert!(buffer.can_form_navigation_base(clock.now()));
        assert_eq!(buffer.valid_points(clock.now()).len(), 3);
    }

    #[test]
    fn test_points_expire() {
        let clock = ManualClock::new();
        let mut buffer = TrilaterationBuffer::new();
        fill(&mut buffer, clock.now());

        clock.advance(Duration::from_secs(11));
        assert!(!buffer.can_form_navigation_base(clock.now()));
        assert!(buffer.valid_points(clock.now()).is_empty());
        // Expired points are still held until replaced or removed
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_update_replaces_point() {
        let clock = ManualClock::new();
        let mut buffer = TrilaterationBuffer::new();
        fill(&mut buffer, clock.now());

        clock.advance(Duration::from_secs(8));
        buffer.update_point(BeaconAddress::Addr2, RangePoint::new(200.0, 0.0, 30.0, 99.0), clock.now());
        clock.advance(Duration::from_secs(4));

        let valid = buffer.valid_points(clock.now());
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].range, 99.0);
        assert!(!buffer.can_form_navigation_base(clock.now()));
    }

    #[test]
    fn test_remove_and_clear() {
        let clock = ManualClock::new();
        let mut buffer = TrilaterationBuffer::with_limits(Duration::from_secs(10), 2);
        fill(&mut buffer, clock.now());

        assert!(buffer.remove_point(BeaconAddress::Addr1));
        assert!(!buffer.remove_point(BeaconAddress::Addr1));
        assert!(buffer.can_form_navigation_base(clock.now()));

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
