//! Polling protocol state and the stall watchdog

use std::time::{Duration, Instant};

/// Where the interrogator's polling cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingState {
    Stopped,
    /// Start requested, not yet confirmed by the device
    Starting,
    Active,
}

/// Polling state machine plus the timestamp of the last remote activity
#[derive(Debug, Clone)]
pub struct PollingMonitor {
    state: PollingState,
    confirmed: bool,
    last_activity: Instant,
    timeout: Duration,
}

impl PollingMonitor {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            state: PollingState::Stopped,
            confirmed: false,
            last_activity: now,
            timeout,
        }
    }

    pub fn state(&self) -> PollingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == PollingState::Active
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A start request went out; wait for the device to confirm it
    pub fn request_start(&mut self, now: Instant) {
        if self.state == PollingState::Stopped {
            self.state = PollingState::Starting;
        }
        self.confirmed = false;
        self.last_activity = now;
    }

    /// The device reported polling with the given mask
    pub fn polling_started(&mut self, address_mask: u16, now: Instant) {
        if address_mask == 0 {
            self.state = PollingState::Stopped;
            self.confirmed = false;
        } else {
            self.state = PollingState::Active;
            self.confirmed = true;
            self.last_activity = now;
        }
    }

    /// Link went away or polling was stopped on request
    pub fn stop(&mut self) {
        self.state = PollingState::Stopped;
        self.confirmed = false;
    }

    /// A remote timeout or response was observed
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Returns true when confirmed polling has been silent for longer than
    /// the timeout. The confirmed flag is cleared so the watchdog fires once
    /// per stall.
    pub fn check_watchdog(&mut self, now: Instant) -> bool {
        if self.is_active() && self.confirmed && self.silence(now) > self.timeout {
            self.confirmed = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_start_and_confirm() {
        let t0 = Instant::now();
        let mut monitor = PollingMonitor::new(TIMEOUT, t0);
        assert_eq!(monitor.state(), PollingState::Stopped);

        monitor.request_start(t0);
        assert_eq!(monitor.state(), PollingState::Starting);
        assert!(!monitor.is_confirmed());

        monitor.polling_started(0b11, t0);
        assert!(monitor.is_active());
        assert!(monitor.is_confirmed());
    }

    #[test]
    fn test_zero_mask_stops() {
        let t0 = Instant::now();
        let mut monitor = PollingMonitor::new(TIMEOUT, t0);
        monitor.polling_started(1, t0);

        monitor.polling_started(0, t0);
        assert_eq!(monitor.state(), PollingState::Stopped);
        assert!(!monitor.is_confirmed());
    }

    #[test]
    fn test_watchdog_fires_once() {
        let t0 = Instant::now();
        let mut monitor = PollingMonitor::new(TIMEOUT, t0);
        monitor.polling_started(1, t0);

        assert!(!monitor.check_watchdog(t0 + Duration::from_secs(5)));
        assert!(monitor.check_watchdog(t0 + Duration::from_millis(5001)));
        assert!(!monitor.is_confirmed());
        assert!(!monitor.check_watchdog(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn test_activity_postpones_watchdog() {
        let t0 = Instant::now();
        let mut monitor = PollingMonitor::new(TIMEOUT, t0);
        monitor.polling_started(1, t0);

        monitor.touch(t0 + Duration::from_secs(4));
        assert!(!monitor.check_watchdog(t0 + Duration::from_secs(8)));
        assert!(monitor.check_watchdog(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_unconfirmed_polling_is_not_watched() {
        let t0 = Instant::now();
        let mut monitor = PollingMonitor::new(TIMEOUT, t0);
        monitor.request_start(t0);
        assert!(!monitor.check_watchdog(t0 + Duration::from_secs(60)));
    }
}
