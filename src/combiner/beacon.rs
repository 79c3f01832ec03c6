//! Per-responder state aggregate

use crate::combiner::nmea::{fix_triplet, NmeaFix};
use crate::core::staleness::formats;
use crate::core::{BeaconAddress, StalenessValue};
use crate::hardware::{CommError, CommResult, LineSink};
use crate::processing::{TrackOutlierFilter, TrackSmoother};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

/// Tag opening every beacon line
pub const BEACON_TAG: &str = "@AZMREM";

const MEASUREMENT_MAX_AGE: Duration = Duration::from_secs(32);
const TELEMETRY_MAX_AGE: Duration = Duration::from_secs(300);
const COORDINATE_MAX_AGE: Duration = Duration::from_secs(100_000);

/// Everything known about one remote responder
pub struct BeaconState {
    address: BeaconAddress,

    pub slant_range_m: StalenessValue<f64>,
    /// Horizontal angle relative to the antenna
    pub azimuth_deg: StalenessValue<f64>,
    pub ptime_s: StalenessValue<f64>,
    pub msr_db: StalenessValue<f64>,
    pub depth_m: StalenessValue<f64>,
    pub srange_projection_m: StalenessValue<f64>,
    /// Distance from the GNSS antenna
    pub adistance_m: StalenessValue<f64>,
    /// Absolute bearing from the GNSS antenna
    pub aazimuth_deg: StalenessValue<f64>,
    pub elevation_deg: StalenessValue<f64>,
    pub vcc_v: StalenessValue<f64>,
    pub water_temp_c: StalenessValue<f64>,
    pub lat_deg: StalenessValue<f64>,
    pub lon_deg: StalenessValue<f64>,
    /// Bearing from the responder back to the vessel
    pub razimuth_deg: StalenessValue<f64>,
    pub message: StalenessValue<String>,
    /// Known position in the LBL local frame
    pub x_m: StalenessValue<f64>,
    pub y_m: StalenessValue<f64>,
    pub z_m: StalenessValue<f64>,
    /// Residual of the LBL solution this responder last triggered
    pub rerr_m: StalenessValue<f64>,

    pub is_timeout: bool,
    pub successes: u32,
    pub timeouts: u32,

    /// Created on the first USBL fix and kept afterwards
    pub outlier_filter: Option<TrackOutlierFilter>,
    pub smoother: Option<TrackSmoother>,

    channel: Option<Box<dyn LineSink>>,
}

/// Copy of a beacon's last known values
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconSnapshot {
    pub address: BeaconAddress,
    pub slant_range_m: Option<f64>,
    pub azimuth_deg: Option<f64>,
    pub srange_projection_m: Option<f64>,
    pub ptime_s: Option<f64>,
    pub depth_m: Option<f64>,
    pub lat_deg: Option<f64>,
    pub lon_deg: Option<f64>,
    pub razimuth_deg: Option<f64>,
    pub vcc_v: Option<f64>,
    pub water_temp_c: Option<f64>,
    pub message: Option<String>,
    pub x_m: Option<f64>,
    pub y_m: Option<f64>,
    pub z_m: Option<f64>,
    pub is_timeout: bool,
    pub successes: u32,
    pub timeouts: u32,
}

impl BeaconState {
    pub fn new(address: BeaconAddress) -> Self {
        let measurement = |name, fmt| StalenessValue::new(name, MEASUREMENT_MAX_AGE, fmt);
        let telemetry = |name| StalenessValue::new(name, TELEMETRY_MAX_AGE, formats::decimals1);

        Self {
            address,
            slant_range_m: measurement("slant_range_m", formats::decimals1).ignoring_age(),
            azimuth_deg: measurement("azimuth_deg", formats::decimals1).ignoring_age(),
            ptime_s: measurement("ptime_s", formats::decimals4).ignoring_age(),
            msr_db: measurement("msr_db", formats::decimals1),
            depth_m: measurement("depth_m", formats::decimals1),
            srange_projection_m: measurement("srange_projection_m", formats::decimals1),
            adistance_m: measurement("adistance_m", formats::decimals1),
            aazimuth_deg: measurement("aazimuth_deg", formats::decimals1),
            elevation_deg: measurement("elevation_deg", formats::decimals1),
            vcc_v: telemetry("vcc_v"),
            water_temp_c: telemetry("water_temp_c"),
            lat_deg: measurement("lat_deg", formats::latlon).ignoring_age(),
            lon_deg: measurement("lon_deg", formats::latlon),
            razimuth_deg: measurement("razimuth_deg", formats::decimals1),
            message: StalenessValue::new("message", MEASUREMENT_MAX_AGE, formats::text),
            x_m: StalenessValue::new("x_m", COORDINATE_MAX_AGE, formats::decimals3).ignoring_age(),
            y_m: StalenessValue::new("y_m", COORDINATE_MAX_AGE, formats::decimals3).ignoring_age(),
            z_m: StalenessValue::new("z_m", COORDINATE_MAX_AGE, formats::decimals1).ignoring_age(),
            rerr_m: measurement("rerr_m", formats::decimals3),
            is_timeout: false,
            successes: 0,
            timeouts: 0,
            outlier_filter: None,
            smoother: None,
            channel: None,
        }
    }

    pub fn address(&self) -> BeaconAddress {
        self.address
    }

    pub fn total_requests(&self) -> u32 {
        self.successes + self.timeouts
    }

    /// Share of answered requests, e.g. `66.7% (2/3)`
    pub fn success_statistics(&self) -> String {
        let total = self.total_requests();
        if total == 0 {
            return "- - -".to_string();
        }
        format!(
            "{:.1}% ({}/{})",
            100.0 * self.successes as f64 / total as f64,
            self.successes,
            total
        )
    }

    fn numeric_head(&self) -> [&StalenessValue<f64>; 14] {
        [
            &self.slant_range_m,
            &self.azimuth_deg,
            &self.ptime_s,
            &self.msr_db,
            &self.depth_m,
            &self.srange_projection_m,
            &self.adistance_m,
            &self.aazimuth_deg,
            &self.elevation_deg,
            &self.vcc_v,
            &self.water_temp_c,
            &self.lat_deg,
            &self.lon_deg,
            &self.razimuth_deg,
        ]
    }

    fn numeric_tail(&self) -> [&StalenessValue<f64>; 4] {
        [&self.x_m, &self.y_m, &self.z_m, &self.rerr_m]
    }

    /// Column names matching [`BeaconState::to_line`]
    pub fn header_line(&self) -> String {
        let mut columns = vec![BEACON_TAG.to_string(), "rem_addr".to_string()];
        for field in self.numeric_head() {
            field.describe_into(&mut columns);
        }
        self.message.describe_into(&mut columns);
        for field in self.numeric_tail() {
            field.describe_into(&mut columns);
        }
        columns.push("is_timeout".to_string());
        columns.join(",")
    }

    pub fn to_line(&self, now: Instant) -> String {
        let mut columns = vec![BEACON_TAG.to_string(), self.address.to_string()];
        for field in self.numeric_head() {
            field.render_into(&mut columns, now);
        }
        self.message.render_into(&mut columns, now);
        for field in self.numeric_tail() {
            field.render_into(&mut columns, now);
        }
        columns.push(self.is_timeout.to_string());
        columns.join(",")
    }

    /// RMC/GGA/MTW sentences describing this responder
    pub fn nmea_triplet(&self, now: Instant, at: DateTime<Utc>) -> String {
        let position = match (self.lat_deg.fresh_copy(now), self.lon_deg.fresh_copy(now)) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };
        let fix = NmeaFix {
            position,
            depth_m: self.depth_m.fresh_copy(now),
            water_temp_c: self.water_temp_c.fresh_copy(now),
        };
        fix_triplet(&fix, at)
    }

    pub fn snapshot(&self) -> BeaconSnapshot {
        BeaconSnapshot {
            address: self.address,
            slant_range_m: self.slant_range_m.get().copied(),
            azimuth_deg: self.azimuth_deg.get().copied(),
            srange_projection_m: self.srange_projection_m.get().copied(),
            ptime_s: self.ptime_s.get().copied(),
            depth_m: self.depth_m.get().copied(),
            lat_deg: self.lat_deg.get().copied(),
            lon_deg: self.lon_deg.get().copied(),
            razimuth_deg: self.razimuth_deg.get().copied(),
            vcc_v: self.vcc_v.get().copied(),
            water_temp_c: self.water_temp_c.get().copied(),
            message: self.message.get().cloned(),
            x_m: self.x_m.get().copied(),
            y_m: self.y_m.get().copied(),
            z_m: self.z_m.get().copied(),
            is_timeout: self.is_timeout,
            successes: self.successes,
            timeouts: self.timeouts,
        }
    }

    /// Attach a private output channel, replacing any previous one
    pub fn set_channel(&mut self, channel: Box<dyn LineSink>) {
        self.channel = Some(channel);
    }

    pub fn clear_channel(&mut self) -> bool {
        self.channel.take().is_some()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel_description(&self) -> Option<String> {
        self.channel.as_ref().map(|c| c.describe())
    }

    pub fn send_to_channel(&mut self, text: &str) -> CommResult<()> {
        match self.channel.as_mut() {
            Some(channel) => channel.send_line(text),
            None => Err(CommError::NotConnected {
                link: format!("beacon {} channel", self.address),
            }),
        }
    }
}

impl fmt::Debug for BeaconState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeaconState")
            .field("address", &self.address)
            .field("is_timeout", &self.is_timeout)
            .field("successes", &self.successes)
            .field("timeouts", &self.timeouts)
            .field("channel", &self.channel_description())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Clock, ManualClock};
    use crate::hardware::MemorySink;
    use chrono::TimeZone;

    #[test]
    fn test_fresh_beacon_header_matches_values() {
        let clock = ManualClock::new();
        let beacon = BeaconState::new(BeaconAddress::Addr1);

        let header = beacon.header_line();
        let line = beacon.to_line(clock.now());
        assert_eq!(header.split(',').count(), line.split(',').count());

        assert!(header.starts_with("@AZMREM,rem_addr,slant_range_m,azimuth_deg,ptime_s,msr_db,age,"));
        assert!(header.ends_with(",message,age,x_m,y_m,z_m,rerr_m,age,is_timeout"));
        assert!(line.starts_with("@AZMREM,1,"));
        assert!(line.ends_with(",false"));
    }

    #[test]
    fn test_populated_line_keeps_width() {
        let clock = ManualClock::new();
        let mut beacon = BeaconState::new(BeaconAddress::Addr12);
        let now = clock.now();
        beacon.slant_range_m.set(312.44, now);
        beacon.ptime_s.set(0.20833, now);
        beacon.msr_db.set(-41.0, now);
        beacon.message.set("ERR BAT LOW".to_string(), now);
        beacon.x_m.set(10.0, now);
        beacon.is_timeout = true;

        let line = beacon.to_line(now);
        assert_eq!(line.split(',').count(), beacon.header_line().split(',').count());
        assert!(line.starts_with("@AZMREM,12,312.4,,0.2083,-41.0,0.0,"));
        assert!(line.contains(",ERR BAT LOW,0.0,10.000,"));
        assert!(line.ends_with(",true"));
    }

    #[test]
    fn test_success_statistics() {
        let mut beacon = BeaconState::new(BeaconAddress::Addr3);
        assert_eq!(beacon.success_statistics(), "- - -");

        beacon.successes = 2;
        beacon.timeouts = 1;
        assert_eq!(beacon.success_statistics(), "66.7% (2/3)");
    }

    #[test]
    fn test_channel_lifecycle() {
        let mut beacon = BeaconState::new(BeaconAddress::Addr2);
        assert!(beacon.send_to_channel("x").is_err());

        let sink = MemorySink::new("iudp");
        let mut handle = sink.clone();
        handle.open().unwrap();
        beacon.set_channel(Box::new(handle));
        assert!(beacon.has_channel());

        beacon.send_to_channel("$GNMTW,,C*4F\r\n").unwrap();
        assert_eq!(sink.lines().len(), 1);

        assert!(beacon.clear_channel());
        assert!(!beacon.clear_channel());
    }

    #[test]
    fn test_nmea_triplet_uses_beacon_position() {
        let clock = ManualClock::new();
        let mut beacon = BeaconState::new(BeaconAddress::Addr1);
        beacon.lat_deg.set(44.5, clock.now());
        beacon.lon_deg.set(33.25, clock.now());
        beacon.depth_m.set(20.0, clock.now());

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let text = beacon.nmea_triplet(clock.now(), at);
        assert!(text.contains(",A,4430.0000,N,03315.0000,E,"));
        assert!(text.contains(",-20.0,M,"));

        // Longitude ages out after 32 s; the fix becomes invalid
        clock.advance(Duration::from_secs(40));
        let text = beacon.nmea_triplet(clock.now(), at);
        assert!(text.starts_with("$GNRMC,000000.00,V,"));
    }
}
