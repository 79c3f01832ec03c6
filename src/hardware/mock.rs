//! In-memory links and sinks for tests and the bench console
//!
//! Each mock is a cheap handle around shared state, so a test keeps a clone
//! to inspect what the combiner asked for after handing the original over.

use crate::core::{BeaconAddress, RequestCode};
use crate::hardware::{CommError, CommResult, DeviceLink, InterrogatorLink, LineSink};
use crate::utils::config::DEFAULT_BAUD_RATE;
use std::sync::{Arc, Mutex, MutexGuard};

/// A query recorded by [`MockInterrogator`]
#[derive(Debug, Clone, PartialEq)]
pub enum InterrogatorCall {
    Start,
    Stop,
    StartPolling {
        address_mask: u16,
        salinity_psu: f64,
        max_distance_m: f64,
    },
    StopPolling,
    UserData {
        address: BeaconAddress,
        code: RequestCode,
    },
    QueryLocalAddress,
    SetLocalAddress(BeaconAddress),
}

#[derive(Debug)]
struct LinkState<C> {
    active: bool,
    detected: bool,
    failing: bool,
    preferred_port: Option<String>,
    baud_rate: u32,
    calls: Vec<C>,
}

fn lock<C>(state: &Arc<Mutex<LinkState<C>>>) -> MutexGuard<'_, LinkState<C>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock acoustic interrogator
#[derive(Debug, Clone)]
pub struct MockInterrogator {
    state: Arc<Mutex<LinkState<InterrogatorCall>>>,
}

impl Default for MockInterrogator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInterrogator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                active: false,
                detected: false,
                failing: false,
                preferred_port: None,
                baud_rate: DEFAULT_BAUD_RATE,
                calls: Vec::new(),
            })),
        }
    }

    /// Make every subsequent call fail with a transport error
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn set_detected(&self, detected: bool) {
        lock(&self.state).detected = detected;
    }

    /// Everything the combiner asked for so far
    pub fn calls(&self) -> Vec<InterrogatorCall> {
        lock(&self.state).calls.clone()
    }

    /// Only the start-polling requests, as (mask, salinity, max distance)
    pub fn start_polling_calls(&self) -> Vec<(u16, f64, f64)> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                InterrogatorCall::StartPolling {
                    address_mask,
                    salinity_psu,
                    max_distance_m,
                } => Some((*address_mask, *salinity_psu, *max_distance_m)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn record(&self, call: InterrogatorCall) -> CommResult<()> {
        let mut state = lock(&self.state);
        if state.failing {
            return Err(CommError::Io {
                operation: format!("{:?}", call),
                details: "simulated failure".to_string(),
            });
        }
        state.calls.push(call);
        Ok(())
    }
}

impl DeviceLink for MockInterrogator {
    fn start(&mut self) -> CommResult<()> {
        self.record(InterrogatorCall::Start)?;
        lock(&self.state).active = true;
        Ok(())
    }

    fn stop(&mut self) -> CommResult<()> {
        self.record(InterrogatorCall::Stop)?;
        lock(&self.state).active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    fn is_detected(&self) -> bool {
        lock(&self.state).detected
    }

    fn set_preferred_port(&mut self, port: Option<String>) {
        lock(&self.state).preferred_port = port;
    }

    fn preferred_port(&self) -> Option<String> {
        lock(&self.state).preferred_port.clone()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) {
        lock(&self.state).baud_rate = baud_rate;
    }

    fn baud_rate(&self) -> u32 {
        lock(&self.state).baud_rate
    }
}

impl InterrogatorLink for MockInterrogator {
    fn query_start_polling(&mut self, address_mask: u16, salinity_psu: f64, max_distance_m: f64) -> CommResult<()> {
        self.record(InterrogatorCall::StartPolling {
            address_mask,
            salinity_psu,
            max_distance_m,
        })
    }

    fn query_stop_polling(&mut self) -> CommResult<()> {
        self.record(InterrogatorCall::StopPolling)
    }

    fn query_user_data(&mut self, address: BeaconAddress, code: RequestCode) -> CommResult<()> {
        self.record(InterrogatorCall::UserData { address, code })
    }

    fn query_local_address(&mut self) -> CommResult<()> {
        self.record(InterrogatorCall::QueryLocalAddress)
    }

    fn set_local_address(&mut self, address: BeaconAddress) -> CommResult<()> {
        self.record(InterrogatorCall::SetLocalAddress(address))
    }
}

/// Lifecycle call recorded by [`MockAuxLink`]
#[derive(Debug, Clone, PartialEq)]
pub enum AuxCall {
    /// Started with the given preferred port
    Start(Option<String>),
    Stop,
}

/// Mock GNSS receiver or compass
#[derive(Debug, Clone)]
pub struct MockAuxLink {
    state: Arc<Mutex<LinkState<AuxCall>>>,
}

impl Default for MockAuxLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuxLink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                active: false,
                detected: false,
                failing: false,
                preferred_port: None,
                baud_rate: DEFAULT_BAUD_RATE,
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_detected(&self, detected: bool) {
        lock(&self.state).detected = detected;
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn calls(&self) -> Vec<AuxCall> {
        lock(&self.state).calls.clone()
    }

    pub fn start_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, AuxCall::Start(_)))
            .count()
    }
}

impl DeviceLink for MockAuxLink {
    fn start(&mut self) -> CommResult<()> {
        let mut state = lock(&self.state);
        if state.failing {
            return Err(CommError::NotConnected {
                link: "aux".to_string(),
            });
        }
        let port = state.preferred_port.clone();
        state.calls.push(AuxCall::Start(port));
        state.active = true;
        Ok(())
    }

    fn stop(&mut self) -> CommResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(AuxCall::Stop);
        state.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    fn is_detected(&self) -> bool {
        lock(&self.state).detected
    }

    fn set_preferred_port(&mut self, port: Option<String>) {
        lock(&self.state).preferred_port = port;
    }

    fn preferred_port(&self) -> Option<String> {
        lock(&self.state).preferred_port.clone()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) {
        lock(&self.state).baud_rate = baud_rate;
    }

    fn baud_rate(&self) -> u32 {
        lock(&self.state).baud_rate
    }
}

#[derive(Debug, Default)]
struct SinkState {
    open: bool,
    failing: bool,
    lines: Vec<String>,
}

/// Sink that keeps every line it is given
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    name: String,
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lines(&self) -> Vec<String> {
        self.state().lines.clone()
    }

    /// Lines starting with `prefix`
    pub fn lines_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state()
            .lines
            .iter()
            .filter(|line| line.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.state().lines.clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }
}

impl LineSink for MemorySink {
    fn open(&mut self) -> CommResult<()> {
        self.state().open = true;
        Ok(())
    }

    fn close(&mut self) -> CommResult<()> {
        self.state().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn send_line(&mut self, line: &str) -> CommResult<()> {
        let mut state = self.state();
        if !state.open {
            return Err(CommError::NotConnected { link: self.name.clone() });
        }
        if state.failing {
            return Err(CommError::Io {
                operation: "send".to_string(),
                details: "simulated failure".to_string(),
            });
        }
        state.lines.push(line.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrogator_records_calls() {
        let mock = MockInterrogator::new();
        let mut link = mock.clone();

        link.start().unwrap();
        link.query_start_polling(0b101, 35.0, 1000.0).unwrap();
        link.query_user_data(BeaconAddress::Addr3, RequestCode::UserData(7)).unwrap();

        assert!(mock.is_active());
        assert_eq!(mock.start_polling_calls(), vec![(0b101, 35.0, 1000.0)]);
        assert_eq!(mock.calls().len(), 3);
    }

    #[test]
    fn test_interrogator_failure() {
        let mock = MockInterrogator::new();
        let mut link = mock.clone();
        mock.set_failing(true);

        assert!(link.query_stop_polling().is_err());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_aux_link_remembers_port() {
        let mock = MockAuxLink::new();
        let mut link = mock.clone();
        link.set_preferred_port(Some("/dev/ttyUSB1".to_string()));
        link.start().unwrap();

        assert_eq!(mock.calls(), vec![AuxCall::Start(Some("/dev/ttyUSB1".to_string()))]);
        assert_eq!(mock.start_count(), 1);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new("out");
        let mut handle = sink.clone();

        assert!(handle.send_line("dropped").is_err());
        handle.open().unwrap();
        handle.send_line("@AZMLOC,1").unwrap();
        handle.send_line("@AZMREM,1,").unwrap();

        assert_eq!(sink.lines_with_prefix("@AZMREM").len(), 1);
        assert_eq!(sink.lines().len(), 2);
    }
}
