//! Timestamped values with a validity horizon
//!
//! Every quantity the combiner tracks, for the vessel or for a beacon, is a
//! [`StalenessValue`]. Reading time goes through a [`Clock`] so the watchdog and
//! aging logic can be driven deterministically in tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of monotonic time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, step: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += step;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + *offset
    }
}

/// A value together with the moment it was last written
#[derive(Debug, Clone)]
pub struct StalenessValue<T> {
    name: &'static str,
    sample: Option<(T, Instant)>,
    max_age: Duration,
    ignore_age: bool,
    formatter: fn(&T) -> String,
}

impl<T> StalenessValue<T> {
    /// Create an uninitialized value with the given horizon
    pub fn new(name: &'static str, max_age: Duration, formatter: fn(&T) -> String) -> Self {
        Self {
            name,
            sample: None,
            max_age,
            ignore_age: false,
            formatter,
        }
    }

    /// Suppress staleness for this value: it stays fresh once written and
    /// serializes without an age column
    pub fn ignoring_age(mut self) -> Self {
        self.ignore_age = true;
        self
    }

    pub fn set(&mut self, value: T, now: Instant) {
        self.sample = Some((value, now));
    }

    /// Forget the value entirely
    pub fn reset(&mut self) {
        self.sample = None;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ignore_age(&self) -> bool {
        self.ignore_age
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn is_initialized(&self) -> bool {
        self.sample.is_some()
    }

    /// Last written value regardless of its age
    pub fn get(&self) -> Option<&T> {
        self.sample.as_ref().map(|(value, _)| value)
    }

    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.sample
            .as_ref()
            .map(|(_, stamp)| now.saturating_duration_since(*stamp))
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.age(now) {
            Some(age) => self.ignore_age || age <= self.max_age,
            None => false,
        }
    }

    /// Value only if it is still within its horizon
    pub fn fresh(&self, now: Instant) -> Option<&T> {
        if self.is_fresh(now) {
            self.get()
        } else {
            None
        }
    }

    /// Append the column names for this value
    pub fn describe_into(&self, columns: &mut Vec<String>) {
        columns.push(self.name.to_string());
        if !self.ignore_age {
            columns.push("age".to_string());
        }
    }

    /// Append the rendered columns for this value; always as many as
    /// `describe_into` produces
    pub fn render_into(&self, columns: &mut Vec<String>, now: Instant) {
        let fresh = self.fresh(now);
        match fresh {
            Some(value) => {
                columns.push((self.formatter)(value));
                if !self.ignore_age {
                    let age = self.age(now).unwrap_or_default();
                    columns.push(format!("{:.1}", age.as_secs_f64()));
                }
            }
            None => {
                columns.push(String::new());
                if !self.ignore_age {
                    columns.push(String::new());
                }
            }
        }
    }
}

impl<T: Copy> StalenessValue<T> {
    /// Copy of the fresh value
    pub fn fresh_copy(&self, now: Instant) -> Option<T> {
        self.fresh(now).copied()
    }
}

/// Fixed-decimal formatters used across the output lines
pub mod formats {
    pub fn decimals1(v: &f64) -> String {
        format!("{:.1}", v)
    }

    pub fn decimals3(v: &f64) -> String {
        format!("{:.3}", v)
    }

    pub fn decimals4(v: &f64) -> String {
        format!("{:.4}", v)
    }

    pub fn latlon(v: &f64) -> String {
        format!("{:.6}", v)
    }

    pub fn text(v: &String) -> String {
        v.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_value() {
        let clock = ManualClock::new();
        let value: StalenessValue<f64> =
            StalenessValue::new("depth_m", Duration::from_secs(10), formats::decimals1);
        assert!(!value.is_initialized());
        assert!(!value.is_fresh(clock.now()));
        assert!(value.get().is_none());
    }

    #[test]
    fn test_value_goes_stale() {
        let clock = ManualClock::new();
        let mut value = StalenessValue::new("depth_m", Duration::from_secs(10), formats::decimals1);
        value.set(12.5, clock.now());
        assert!(value.is_fresh(clock.now()));

        clock.advance(Duration::from_secs(10));
        assert!(value.is_fresh(clock.now()));

        clock.advance(Duration::from_millis(1));
        assert!(!value.is_fresh(clock.now()));
        // Stale values keep their last reading
        assert_eq!(value.get(), Some(&12.5));
    }

    #[test]
    fn test_ignore_age_stays_fresh() {
        let clock = ManualClock::new();
        let mut value =
            StalenessValue::new("lat_deg", Duration::from_secs(1), formats::latlon).ignoring_age();
        value.set(48.5, clock.now());
        clock.advance(Duration::from_secs(3600));
        assert!(value.is_fresh(clock.now()));
    }

    #[test]
    fn test_render_matches_description() {
        let clock = ManualClock::new();
        let mut aged = StalenessValue::new("msr_db", Duration::from_secs(32), formats::decimals1);
        let plain =
            StalenessValue::<f64>::new("ptime_s", Duration::from_secs(32), formats::decimals4).ignoring_age();

        let mut names = Vec::new();
        aged.describe_into(&mut names);
        plain.describe_into(&mut names);
        assert_eq!(names, vec!["msr_db", "age", "ptime_s"]);

        let mut empty = Vec::new();
        aged.render_into(&mut empty, clock.now());
        plain.render_into(&mut empty, clock.now());
        assert_eq!(empty, vec!["", "", ""]);

        aged.set(-42.0, clock.now());
        clock.advance(Duration::from_millis(1500));
        let mut filled = Vec::new();
        aged.render_into(&mut filled, clock.now());
        assert_eq!(filled, vec!["-42.0", "1.5"]);
    }

    #[test]
    fn test_reset_clears_value() {
        let clock = ManualClock::new();
        let mut value = StalenessValue::new("x_m", Duration::from_secs(10), formats::decimals3);
        value.set(1.0, clock.now());
        value.reset();
        assert!(!value.is_initialized());
    }
}
