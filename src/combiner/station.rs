//! The vessel's own state: environment, attitude, navigation and the LBL fix

use crate::combiner::nmea::NmeaFix;
use crate::core::staleness::formats;
use crate::core::StalenessValue;
use std::time::{Duration, Instant};

/// Tag opening every station line
pub const STATION_TAG: &str = "@AZMLOC";

const STATION_MAX_AGE: Duration = Duration::from_secs(10);

/// Locally measured and derived values of the host vessel
#[derive(Debug, Clone)]
pub struct StationLocals {
    pub pressure_mbar: StalenessValue<f64>,
    /// Derived from pressure, temperature and salinity only
    pub depth_m: StalenessValue<f64>,
    pub water_temp_c: StalenessValue<f64>,
    pub pitch_deg: StalenessValue<f64>,
    pub roll_deg: StalenessValue<f64>,
    pub lat_deg: StalenessValue<f64>,
    pub lon_deg: StalenessValue<f64>,
    pub course_deg: StalenessValue<f64>,
    pub speed_mps: StalenessValue<f64>,
    pub heading_deg: StalenessValue<f64>,
    /// LBL solution in the reference beacons' local frame
    pub x_m: StalenessValue<f64>,
    pub y_m: StalenessValue<f64>,
    pub z_m: StalenessValue<f64>,
    /// RMS range residual of the last LBL solution
    pub rerr_m: StalenessValue<f64>,
}

impl Default for StationLocals {
    fn default() -> Self {
        Self::new()
    }
}

impl StationLocals {
    pub fn new() -> Self {
        let value = |name| StalenessValue::new(name, STATION_MAX_AGE, formats::decimals1);
        let metric = |name| StalenessValue::new(name, STATION_MAX_AGE, formats::decimals3);
        let coordinate = |name| StalenessValue::new(name, STATION_MAX_AGE, formats::latlon).ignoring_age();

        Self {
            pressure_mbar: value("pressure_mbar").ignoring_age(),
            depth_m: value("depth_m").ignoring_age(),
            water_temp_c: value("water_temp_c").ignoring_age(),
            pitch_deg: value("pitch_deg").ignoring_age(),
            roll_deg: value("roll_deg"),
            lat_deg: coordinate("lat_deg"),
            lon_deg: coordinate("lon_deg"),
            course_deg: value("course_deg").ignoring_age(),
            speed_mps: value("speed_mps"),
            heading_deg: value("heading_deg"),
            x_m: metric("x_m").ignoring_age(),
            y_m: metric("y_m").ignoring_age(),
            z_m: metric("z_m").ignoring_age(),
            rerr_m: metric("rerr_m"),
        }
    }

    fn fields(&self) -> [&StalenessValue<f64>; 14] {
        [
            &self.pressure_mbar,
            &self.depth_m,
            &self.water_temp_c,
            &self.pitch_deg,
            &self.roll_deg,
            &self.lat_deg,
            &self.lon_deg,
            &self.course_deg,
            &self.speed_mps,
            &self.heading_deg,
            &self.x_m,
            &self.y_m,
            &self.z_m,
            &self.rerr_m,
        ]
    }

    /// Column names matching [`StationLocals::to_line`]
    pub fn header_line(&self) -> String {
        let mut columns = vec![STATION_TAG.to_string()];
        for field in self.fields() {
            field.describe_into(&mut columns);
        }
        columns.join(",")
    }

    pub fn to_line(&self, now: Instant) -> String {
        let mut columns = vec![STATION_TAG.to_string()];
        for field in self.fields() {
            field.render_into(&mut columns, now);
        }
        columns.join(",")
    }

    /// Own position, depth and water temperature for NMEA output
    pub fn nmea_fix(&self, now: Instant) -> NmeaFix {
        let position = match (self.lat_deg.fresh_copy(now), self.lon_deg.fresh_copy(now)) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };

        NmeaFix {
            position,
            depth_m: self.depth_m.fresh_copy(now),
            water_temp_c: self.water_temp_c.fresh_copy(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Clock, ManualClock};

    #[test]
    fn test_header_and_line_have_same_width() {
        let clock = ManualClock::new();
        let mut station = StationLocals::new();

        let header = station.header_line();
        assert!(header.starts_with("@AZMLOC,pressure_mbar,depth_m,water_temp_c,pitch_deg,roll_deg,age,"));
        assert!(header.ends_with("x_m,y_m,z_m,rerr_m,age"));

        let width = header.split(',').count();
        assert_eq!(station.to_line(clock.now()).split(',').count(), width);

        station.roll_deg.set(-2.25, clock.now());
        station.lat_deg.set(44.123456789, clock.now());
        let line = station.to_line(clock.now());
        assert_eq!(line.split(',').count(), width);
        assert!(line.contains(",44.123457,"));
    }

    #[test]
    fn test_stale_heading_renders_empty() {
        let clock = ManualClock::new();
        let mut station = StationLocals::new();
        station.heading_deg.set(90.0, clock.now());
        assert!(station.to_line(clock.now()).contains(",90.0,0.0,"));

        clock.advance(Duration::from_secs(11));
        assert!(station.heading_deg.fresh(clock.now()).is_none());
        assert!(!station.to_line(clock.now()).contains("90.0"));
    }

    #[test]
    fn test_nmea_fix_requires_both_coordinates() {
        let clock = ManualClock::new();
        let mut station = StationLocals::new();
        station.lat_deg.set(44.0, clock.now());
        assert!(station.nmea_fix(clock.now()).position.is_none());

        station.lon_deg.set(33.0, clock.now());
        assert_eq!(station.nmea_fix(clock.now()).position, Some((44.0, 33.0)));
    }
}
