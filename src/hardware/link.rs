//! Device link traits and the events they deliver
//!
//! The combiner never parses device protocols itself. Each device (the
//! acoustic interrogator, the GNSS receiver and the magnetic compass) is
//! reached through a link that owns its port, decodes its sentences and
//! delivers typed events from its own thread.
//!
//! Links must not call back into the combiner from inside their trait
//! methods; events are delivered asynchronously.

use crate::core::{BeaconAddress, DeviceType, ReportStatus, RequestCode, ResponseCode};
use crate::hardware::CommResult;

/// Lifecycle shared by every device link
pub trait DeviceLink: Send {
    /// Open the port and begin listening (and detecting the device)
    fn start(&mut self) -> CommResult<()>;

    /// Close the port
    fn stop(&mut self) -> CommResult<()>;

    /// Whether the port is open
    fn is_active(&self) -> bool;

    /// Whether the expected device has been recognised on the port
    fn is_detected(&self) -> bool;

    /// Port to try first on the next start; `None` means auto-detect
    fn set_preferred_port(&mut self, port: Option<String>);

    fn preferred_port(&self) -> Option<String>;

    /// Serial speed used on the next start
    fn set_baud_rate(&mut self, baud_rate: u32);

    fn baud_rate(&self) -> u32;
}

/// Queries understood by the acoustic interrogator
pub trait InterrogatorLink: DeviceLink {
    /// Start polling the responders in `address_mask` (bit 0 = address 1).
    /// A zero mask pauses polling.
    fn query_start_polling(&mut self, address_mask: u16, salinity_psu: f64, max_distance_m: f64) -> CommResult<()>;

    fn query_stop_polling(&mut self) -> CommResult<()>;

    /// Ask a responder for a user-defined value
    fn query_user_data(&mut self, address: BeaconAddress, code: RequestCode) -> CommResult<()>;

    /// Ask a directly connected responder for its address
    fn query_local_address(&mut self) -> CommResult<()>;

    /// Change the address of a directly connected responder
    fn set_local_address(&mut self, address: BeaconAddress) -> CommResult<()>;
}

/// Identification reported by the interrogator
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub serial_number: String,
    pub version: String,
}

/// Which query an acknowledgement refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Start/stop polling
    Polling,
    UserData,
    LocalAddress,
}

/// One interrogator report. Every measurement is optional; fields not
/// carried by this cycle are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationReport {
    pub status: ReportStatus,
    pub address: BeaconAddress,
    pub request: RequestCode,
    pub response: ResponseCode,
    /// One-way propagation time (s)
    pub propagation_time_s: Option<f64>,
    pub slant_range_m: Option<f64>,
    pub slant_range_projection_m: Option<f64>,
    /// Horizontal angle to the responder relative to the antenna (°)
    pub azimuth_deg: Option<f64>,
    /// Vertical angle to the responder (°)
    pub elevation_deg: Option<f64>,
    /// Signal strength (dB)
    pub msr_db: Option<f64>,
    pub remote_depth_m: Option<f64>,
    /// Environmental channels measured at the antenna
    pub local_temperature_c: Option<f64>,
    pub local_pressure_mbar: Option<f64>,
    pub local_pitch_deg: Option<f64>,
    pub local_roll_deg: Option<f64>,
}

impl NavigationReport {
    pub fn new(status: ReportStatus, address: BeaconAddress) -> Self {
        Self {
            status,
            address,
            request: RequestCode::Invalid,
            response: ResponseCode::Invalid,
            propagation_time_s: None,
            slant_range_m: None,
            slant_range_projection_m: None,
            azimuth_deg: None,
            elevation_deg: None,
            msr_db: None,
            remote_depth_m: None,
            local_temperature_c: None,
            local_pressure_mbar: None,
            local_pitch_deg: None,
            local_roll_deg: None,
        }
    }

    /// Report carrying only the antenna's own environment
    pub fn local() -> Self {
        Self::new(ReportStatus::Local, BeaconAddress::Invalid)
    }

    pub fn remote_timeout(address: BeaconAddress) -> Self {
        Self::new(ReportStatus::RemoteTimeout, address)
    }

    pub fn remote_response(address: BeaconAddress, request: RequestCode, response: ResponseCode) -> Self {
        Self {
            request,
            response,
            ..Self::new(ReportStatus::RemoteResponse, address)
        }
    }

    pub fn with_propagation_time(mut self, seconds: f64) -> Self {
        self.propagation_time_s = Some(seconds);
        self
    }

    pub fn with_slant_range(mut self, meters: f64) -> Self {
        self.slant_range_m = Some(meters);
        self
    }

    pub fn with_projection(mut self, meters: f64) -> Self {
        self.slant_range_projection_m = Some(meters);
        self
    }

    pub fn with_angles(mut self, azimuth_deg: f64, elevation_deg: Option<f64>) -> Self {
        self.azimuth_deg = Some(azimuth_deg);
        self.elevation_deg = elevation_deg;
        self
    }

    pub fn with_signal(mut self, msr_db: f64) -> Self {
        self.msr_db = Some(msr_db);
        self
    }

    pub fn with_remote_depth(mut self, meters: f64) -> Self {
        self.remote_depth_m = Some(meters);
        self
    }

    pub fn with_environment(mut self, temperature_c: f64, pressure_mbar: f64) -> Self {
        self.local_temperature_c = Some(temperature_c);
        self.local_pressure_mbar = Some(pressure_mbar);
        self
    }

    pub fn with_attitude(mut self, pitch_deg: f64, roll_deg: f64) -> Self {
        self.local_pitch_deg = Some(pitch_deg);
        self.local_roll_deg = Some(roll_deg);
        self
    }
}

/// Events delivered by the interrogator link
#[derive(Debug, Clone, PartialEq)]
pub enum InterrogatorEvent {
    DetectedChanged(bool),
    ActiveChanged(bool),
    /// Device info became valid (`Some`) or was lost (`None`)
    DeviceInfoChanged(Option<DeviceInfo>),
    /// Acknowledgement of a query; `result` is the device's result code
    Ack { query: QueryKind, ok: bool, result: String },
    /// The device reports the polling parameters now in force
    PollingStarted {
        address_mask: u16,
        salinity_psu: f64,
        /// `None` when the device computes it automatically
        sound_speed_mps: Option<f64>,
        max_distance_m: f64,
    },
    Report(NavigationReport),
    /// Reply to a local address query
    LocalAddress(BeaconAddress),
    /// Raw line traffic, for diagnostics
    Log(String),
}

/// Events delivered by the GNSS link
#[derive(Debug, Clone, PartialEq)]
pub enum GnssEvent {
    DetectedChanged(bool),
    Location {
        lat_deg: f64,
        lon_deg: f64,
        course_deg: Option<f64>,
        /// Ground speed as reported by the receiver (km/h)
        speed_kmh: Option<f64>,
    },
    Heading(f64),
    Log(String),
}

/// Events delivered by the compass link
#[derive(Debug, Clone, PartialEq)]
pub enum CompassEvent {
    DetectedChanged(bool),
    Heading(f64),
    Log(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_builders() {
        let report = NavigationReport::remote_response(
            BeaconAddress::Addr2,
            RequestCode::Depth,
            ResponseCode::Value(120),
        )
        .with_slant_range(250.0)
        .with_angles(45.0, Some(-10.0));

        assert_eq!(report.status, ReportStatus::RemoteResponse);
        assert_eq!(report.slant_range_m, Some(250.0));
        assert_eq!(report.azimuth_deg, Some(45.0));
        assert!(report.propagation_time_s.is_none());
        assert!(report.local_pressure_mbar.is_none());
    }

    #[test]
    fn test_timeout_report_has_no_codes() {
        let report = NavigationReport::remote_timeout(BeaconAddress::Addr5);
        assert_eq!(report.request, RequestCode::Invalid);
        assert_eq!(report.response, ResponseCode::Invalid);
    }
}
