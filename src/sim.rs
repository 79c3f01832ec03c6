//! Simulated devices for the bench console
//!
//! Plays the part of the interrogator, GNSS receiver and compass: a vessel
//! drifting slowly north-east with responders circling it. The simulator
//! watches what the combiner asked the mock interrogator for and answers
//! the way a real base station would.

use acoustic_combiner::core::{BeaconAddress, DeviceType, RequestCode, ResponseCode, SPEED_OF_SOUND_WATER};
use acoustic_combiner::hardware::mock::InterrogatorCall;
use acoustic_combiner::hardware::{
    CompassEvent, DeviceInfo, DeviceLink, GnssEvent, InterrogatorEvent, MockAuxLink, MockInterrogator, NavigationReport,
};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// One event from any simulated device
#[derive(Debug)]
pub enum SimEvent {
    Interrogator(InterrogatorEvent),
    Gnss(GnssEvent),
    Compass(CompassEvent),
}

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub device_type: DeviceType,
    pub start_lat_deg: f64,
    pub start_lon_deg: f64,
    pub period: Duration,
}

/// Handles to the mocks the combiner was built with
pub struct SimDevices {
    pub interrogator: MockInterrogator,
    pub gnss: MockAuxLink,
    pub compass: MockAuxLink,
}

const METERS_PER_DEG: f64 = 111_132.0;

struct Simulator {
    settings: SimSettings,
    devices: SimDevices,
    events: Sender<SimEvent>,
    step: u64,
    detected: bool,
    polling_mask: u16,
    handled_calls: usize,
}

impl Simulator {
    fn send(&self, event: SimEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// React to the queries issued since the last step
    fn follow_queries(&mut self) -> bool {
        let calls = self.devices.interrogator.calls();
        let fresh = calls.get(self.handled_calls..).unwrap_or_default().to_vec();
        self.handled_calls = calls.len();

        for call in fresh {
            let reply = match call {
                InterrogatorCall::StartPolling {
                    address_mask,
                    salinity_psu,
                    max_distance_m,
                } => {
                    self.polling_mask = address_mask;
                    Some(InterrogatorEvent::PollingStarted {
                        address_mask,
                        salinity_psu,
                        sound_speed_mps: None,
                        max_distance_m,
                    })
                }
                InterrogatorCall::StopPolling => {
                    self.polling_mask = 0;
                    None
                }
                InterrogatorCall::QueryLocalAddress => Some(InterrogatorEvent::LocalAddress(BeaconAddress::Addr1)),
                InterrogatorCall::UserData { address, code } => {
                    let report = NavigationReport::remote_response(address, code, ResponseCode::Value(1234))
                        .with_slant_range(self.range_to(address));
                    Some(InterrogatorEvent::Report(report))
                }
                InterrogatorCall::Stop => {
                    self.detected = false;
                    self.polling_mask = 0;
                    None
                }
                InterrogatorCall::Start | InterrogatorCall::SetLocalAddress(_) => None,
            };

            if let Some(event) = reply {
                if !self.send(SimEvent::Interrogator(event)) {
                    return false;
                }
            }
        }
        true
    }

    fn vessel_position(&self) -> (f64, f64) {
        let drift_m = self.step as f64 * 0.5;
        (
            self.settings.start_lat_deg + drift_m / METERS_PER_DEG,
            self.settings.start_lon_deg + drift_m / METERS_PER_DEG,
        )
    }

    fn range_to(&self, address: BeaconAddress) -> f64 {
        80.0 + 20.0 * address.number().unwrap_or(1) as f64
    }

    fn azimuth_to(&self, address: BeaconAddress) -> f64 {
        let phase = address.number().unwrap_or(1) as f64 * 45.0;
        (phase + self.step as f64 * 3.0) % 360.0
    }

    fn run_step(&mut self) -> bool {
        if !self.follow_queries() {
            return false;
        }

        if !self.devices.interrogator.is_active() {
            return true;
        }

        if !self.detected {
            self.detected = true;
            self.devices.interrogator.set_detected(true);
            self.devices.gnss.set_detected(true);
            self.devices.compass.set_detected(true);
            let info = DeviceInfo {
                device_type: self.settings.device_type,
                serial_number: "SIM-0001".to_string(),
                version: "1.0".to_string(),
            };
            return self.send(SimEvent::Interrogator(InterrogatorEvent::DetectedChanged(true)))
                && self.send(SimEvent::Gnss(GnssEvent::DetectedChanged(true)))
                && self.send(SimEvent::Interrogator(InterrogatorEvent::DeviceInfoChanged(Some(info))));
        }

        let (lat, lon) = self.vessel_position();
        let fix = GnssEvent::Location {
            lat_deg: lat,
            lon_deg: lon,
            course_deg: Some(45.0),
            speed_kmh: Some(1.8),
        };
        if !self.send(SimEvent::Gnss(fix)) || !self.send(SimEvent::Compass(CompassEvent::Heading(45.0))) {
            return false;
        }

        // One responder per cycle, round robin over the polled mask
        let polled: Vec<BeaconAddress> = BeaconAddress::ALL
            .into_iter()
            .filter(|a| self.polling_mask & a.mask_bit() != 0)
            .collect();
        if polled.is_empty() {
            return true;
        }
        let address = polled[self.step as usize % polled.len()];

        let depth = 20.0 + address.number().unwrap_or(1) as f64;
        let range = self.range_to(address);
        let measured = if self.step % 7 == 6 {
            NavigationReport::remote_timeout(address)
        } else {
            NavigationReport::remote_response(address, RequestCode::Depth, ResponseCode::Value(0))
                .with_propagation_time(range / SPEED_OF_SOUND_WATER)
                .with_slant_range(range)
                .with_angles(self.azimuth_to(address), Some(-15.0))
                .with_signal(-12.0)
                .with_remote_depth(depth)
        };
        let report = measured
            .with_environment(14.0, 1013.25 + 250.0)
            .with_attitude(0.5, -1.0);

        debug!("Simulated report for {address}");
        self.send(SimEvent::Interrogator(InterrogatorEvent::Report(report)))
    }
}

/// Run the simulator on its own thread until the receiving side goes away
pub fn spawn(
    settings: SimSettings,
    devices: SimDevices,
    events: Sender<SimEvent>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("simulator".to_string()).spawn(move || {
        let period = settings.period;
        let mut sim = Simulator {
            settings,
            devices,
            events,
            step: 0,
            detected: false,
            polling_mask: 0,
            handled_calls: 0,
        };

        while sim.run_step() {
            sim.step += 1;
            thread::sleep(period);
        }
    })
}
