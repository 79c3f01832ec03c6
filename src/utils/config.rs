//! Combiner configuration
//!
//! Loaded from a JSON document; every field has a default so a partial
//! file (or none at all) is accepted. Values are checked by
//! [`CombinerConfig::validate`] before the combiner is built.

use crate::algorithms::{GeoPoint, SolverSettings};
use crate::core::{BeaconAddress, ABS_MAX_RANGE_M, ABS_MIN_RANGE_M, SALINITY_MAX_PSU, SALINITY_MIN_PSU};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default broadcast destination for output lines
pub const DEFAULT_OUTPUT_UDP: &str = "255.255.255.255:28128";
/// Default baud rate for every serial port
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Configuration file I/O error
    #[error("I/O error: {message}")]
    Io { message: String },
    /// JSON serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    /// Responders to poll, bit 0 = address 1
    pub address_mask: u16,
    /// Water salinity (PSU)
    pub salinity_psu: f64,
    /// Maximum interrogation distance (m)
    pub max_distance_m: f64,
    /// Derive slant range from propagation time and local sound speed
    pub recalculate_range: bool,
    /// Also emit NMEA sentences for the vessel's own position
    pub station_nmea_output: bool,
    /// Silence after which polling is restarted (ms)
    pub watchdog_timeout_ms: u64,
    pub antenna: AntennaConfig,
    pub timing: TimingConfig,
    pub lbl: LblConfig,
    pub filters: FilterConfig,
    pub links: LinksConfig,
    pub outputs: OutputConfig,
}

/// Position of the acoustic antenna relative to the GNSS antenna
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntennaConfig {
    /// Transversal offset (m)
    pub x_offset_m: f64,
    /// Longitudinal offset (m)
    pub y_offset_m: f64,
    /// Angle between the antenna's zero direction and the heading source (°)
    pub angular_offset_deg: f64,
}

/// Propagation time correction applied in LBL mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub enabled: bool,
    /// Constant part of the correction (s)
    pub base_adjustment_s: f64,
    /// Part of the correction proportional to the responder address (s)
    pub per_address_adjustment_s: f64,
}

/// How the three LBL reference responders are given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// Points are local east/north meters
    Local,
    /// Points are latitude/longitude degrees
    Geographic,
}

/// Reference responders 1..3 applied at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBeaconsConfig {
    pub mode: ReferenceMode,
    /// `[x, y]` in local mode, `[lat, lon]` in geographic mode
    pub points: [[f64; 2]; 3],
}

/// LBL trilateration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LblConfig {
    /// Age after which a range no longer takes part in a solution (ms)
    pub max_point_age_ms: u64,
    pub min_points: usize,
    pub solver: SolverSettings,
    pub reference: Option<ReferenceBeaconsConfig>,
}

/// Track filter parameters for USBL fixes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub outlier_window: usize,
    pub outlier_threshold_mps: f64,
    pub outlier_gate_m: f64,
    pub smoother_window: usize,
    pub smoother_max_gap_ms: u64,
}

/// Serial port settings of one device link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Port to try first; `None` lets the link search for the device
    pub port: Option<String>,
    pub baud_rate: u32,
}

/// Settings of an optional GNSS or compass link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxLinkConfig {
    /// A disabled link is never attached, even when one is supplied
    pub enabled: bool,
    #[serde(flatten)]
    pub link: LinkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub interrogator: LinkConfig,
    pub gnss: AuxLinkConfig,
    pub compass: AuxLinkConfig,
}

/// Serial output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialOutputConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub serial: Option<SerialOutputConfig>,
    pub udp: Option<SocketAddr>,
    /// Private NMEA channels, keyed by responder address
    pub beacon_channels: BTreeMap<u8, SocketAddr>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            address_mask: 1,
            salinity_psu: 0.0,
            max_distance_m: 1000.0,
            recalculate_range: true,
            station_nmea_output: false,
            watchdog_timeout_ms: 5000,
            antenna: AntennaConfig::default(),
            timing: TimingConfig::default(),
            lbl: LblConfig::default(),
            filters: FilterConfig::default(),
            links: LinksConfig::default(),
            outputs: OutputConfig::default(),
        }
    }
}

impl Default for AntennaConfig {
    fn default() -> Self {
        Self {
            x_offset_m: 0.0,
            y_offset_m: 0.0,
            angular_offset_deg: 0.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_adjustment_s: 0.0006,
            per_address_adjustment_s: 0.0004,
        }
    }
}

impl Default for LblConfig {
    fn default() -> Self {
        Self {
            max_point_age_ms: 10_000,
            min_points: 3,
            solver: SolverSettings::default(),
            reference: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            outlier_window: 8,
            outlier_threshold_mps: 1.0,
            outlier_gate_m: 5.0,
            smoother_window: 4,
            smoother_max_gap_ms: 20_000,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Default for AuxLinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            link: LinkConfig::default(),
        }
    }
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            interrogator: LinkConfig::default(),
            gnss: AuxLinkConfig::default(),
            compass: AuxLinkConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            serial: None,
            udp: DEFAULT_OUTPUT_UDP.parse().ok(),
            beacon_channels: BTreeMap::new(),
        }
    }
}

impl LblConfig {
    pub fn max_point_age(&self) -> Duration {
        Duration::from_millis(self.max_point_age_ms)
    }
}

impl FilterConfig {
    pub fn smoother_max_gap(&self) -> Duration {
        Duration::from_millis(self.smoother_max_gap_ms)
    }
}

impl CombinerConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: CombinerConfig = serde_json::from_str(content).map_err(|e| ConfigError::Serialization {
            message: format!("Failed to parse config: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialization {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = self.to_json_string()?;

        fs::write(&path, content).map_err(|e| ConfigError::Io {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Check every parameter; the first violation is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_address_mask(self.address_mask)?;
        check_salinity(self.salinity_psu)?;
        check_max_distance(self.max_distance_m)?;

        if !(0.0..=360.0).contains(&self.antenna.angular_offset_deg) {
            return Err(ConfigError::invalid(
                "antenna.angular_offset_deg",
                self.antenna.angular_offset_deg,
                "Angular offset must be within 0-360°",
            ));
        }

        if !self.antenna.x_offset_m.is_finite() || !self.antenna.y_offset_m.is_finite() {
            return Err(ConfigError::invalid(
                "antenna.offset",
                format!("{}, {}", self.antenna.x_offset_m, self.antenna.y_offset_m),
                "Antenna offsets must be finite",
            ));
        }

        if self.watchdog_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "watchdog_timeout_ms",
                self.watchdog_timeout_ms,
                "Watchdog timeout must be positive",
            ));
        }

        if self.timing.base_adjustment_s < 0.0 || self.timing.per_address_adjustment_s < 0.0 {
            return Err(ConfigError::invalid(
                "timing",
                format!("{}, {}", self.timing.base_adjustment_s, self.timing.per_address_adjustment_s),
                "Timing adjustments cannot be negative",
            ));
        }

        if self.lbl.min_points < 3 {
            return Err(ConfigError::invalid(
                "lbl.min_points",
                self.lbl.min_points,
                "At least 3 ranges are needed for a horizontal fix",
            ));
        }

        if self.lbl.max_point_age_ms == 0 {
            return Err(ConfigError::invalid(
                "lbl.max_point_age_ms",
                self.lbl.max_point_age_ms,
                "Point age limit must be positive",
            ));
        }

        if let Some(reference) = &self.lbl.reference {
            check_reference(reference)?;
        }

        if self.filters.outlier_window == 0 || self.filters.smoother_window == 0 {
            return Err(ConfigError::invalid(
                "filters",
                format!("{}/{}", self.filters.outlier_window, self.filters.smoother_window),
                "Filter windows must hold at least one sample",
            ));
        }

        let links = [
            ("links.interrogator", &self.links.interrogator),
            ("links.gnss", &self.links.gnss.link),
            ("links.compass", &self.links.compass.link),
        ];
        for (name, link) in links {
            if link.baud_rate == 0 {
                return Err(ConfigError::invalid(name, link.baud_rate, "Baud rate must be positive"));
            }
        }

        for address in self.outputs.beacon_channels.keys() {
            if !BeaconAddress::from_raw(*address).is_valid() {
                return Err(ConfigError::invalid(
                    "outputs.beacon_channels",
                    address,
                    "Responder address must be within 1-16",
                ));
            }
        }

        Ok(())
    }

    // Runtime adjustment, returning the previous value

    pub fn set_address_mask(&mut self, mask: u16) -> Result<u16, ConfigError> {
        check_address_mask(mask)?;
        Ok(std::mem::replace(&mut self.address_mask, mask))
    }

    pub fn set_salinity(&mut self, salinity_psu: f64) -> Result<f64, ConfigError> {
        check_salinity(salinity_psu)?;
        Ok(std::mem::replace(&mut self.salinity_psu, salinity_psu))
    }

    pub fn set_max_distance(&mut self, max_distance_m: f64) -> Result<f64, ConfigError> {
        check_max_distance(max_distance_m)?;
        Ok(std::mem::replace(&mut self.max_distance_m, max_distance_m))
    }
}

fn check_address_mask(mask: u16) -> Result<(), ConfigError> {
    if mask == 0 {
        return Err(ConfigError::invalid(
            "address_mask",
            mask,
            "At least one responder must be polled",
        ));
    }
    Ok(())
}

fn check_salinity(salinity_psu: f64) -> Result<(), ConfigError> {
    if !(SALINITY_MIN_PSU..=SALINITY_MAX_PSU).contains(&salinity_psu) {
        return Err(ConfigError::invalid(
            "salinity_psu",
            salinity_psu,
            "Salinity must be within 0-42 PSU",
        ));
    }
    Ok(())
}

fn check_max_distance(max_distance_m: f64) -> Result<(), ConfigError> {
    if !(ABS_MIN_RANGE_M..=ABS_MAX_RANGE_M).contains(&max_distance_m) {
        return Err(ConfigError::invalid(
            "max_distance_m",
            max_distance_m,
            "Maximum distance must be within 100-10000 m",
        ));
    }
    Ok(())
}

fn check_reference(reference: &ReferenceBeaconsConfig) -> Result<(), ConfigError> {
    let valid = match reference.mode {
        ReferenceMode::Local => reference.points.iter().flatten().all(|v| v.is_finite()),
        ReferenceMode::Geographic => reference
            .points
            .iter()
            .all(|[lat, lon]| GeoPoint::new(*lat, *lon).is_valid()),
    };

    if !valid {
        return Err(ConfigError::invalid(
            "lbl.reference",
            format!("{:?}", reference.points),
            "Reference coordinates out of range",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CombinerConfig::default();
        assert_eq!(config.address_mask, 1);
        assert_eq!(config.salinity_psu, 0.0);
        assert_eq!(config.max_distance_m, 1000.0);
        assert_eq!(config.links.interrogator.baud_rate, 9600);
        assert_eq!(config.outputs.udp, Some("255.255.255.255:28128".parse().unwrap()));
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_aux_link_settings() {
        let config = CombinerConfig::from_json_str(
            r#"{ "links": { "gnss": { "enabled": false, "port": "/dev/ttyUSB1", "baud_rate": 4800 } } }"#,
        )
        .unwrap();
        assert!(!config.links.gnss.enabled);
        assert_eq!(config.links.gnss.link.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.links.gnss.link.baud_rate, 4800);
        assert!(config.links.compass.enabled);

        let mut config = CombinerConfig::default();
        config.links.compass.link.baud_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = CombinerConfig::default();
        config.address_mask = 0b111;
        config.lbl.reference = Some(ReferenceBeaconsConfig {
            mode: ReferenceMode::Local,
            points: [[0.0, 0.0], [200.0, 0.0], [0.0, 200.0]],
        });
        config
            .outputs
            .beacon_channels
            .insert(2, "192.168.1.20:30000".parse().unwrap());

        let json = config.to_json_string().unwrap();
        let loaded = CombinerConfig::from_json_str(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = CombinerConfig::from_json_str(r#"{ "salinity_psu": 35.0, "antenna": { "x_offset_m": 1.5 } }"#)
            .unwrap();
        assert_eq!(config.salinity_psu, 35.0);
        assert_eq!(config.antenna.x_offset_m, 1.5);
        assert_eq!(config.antenna.angular_offset_deg, 0.0);
        assert_eq!(config.filters.smoother_window, 4);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = CombinerConfig::default();
        config.salinity_psu = 50.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "salinity_psu"
        ));

        let mut config = CombinerConfig::default();
        config.max_distance_m = 50.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "max_distance_m"
        ));

        let mut config = CombinerConfig::default();
        config.address_mask = 0;
        assert!(config.validate().is_err());

        let mut config = CombinerConfig::default();
        config.lbl.reference = Some(ReferenceBeaconsConfig {
            mode: ReferenceMode::Geographic,
            points: [[44.0, 33.0], [95.0, 33.0], [44.1, 33.1]],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CombinerConfig::from_json_str("{ not json"),
            Err(ConfigError::Serialization { .. })
        ));
    }

    #[test]
    fn test_runtime_setters_return_previous_value() {
        let mut config = CombinerConfig::default();
        assert_eq!(config.set_salinity(35.0).unwrap(), 0.0);
        assert_eq!(config.salinity_psu, 35.0);

        assert!(config.set_max_distance(20_000.0).is_err());
        assert_eq!(config.max_distance_m, 1000.0);

        assert_eq!(config.set_address_mask(0b11).unwrap(), 1);
        assert!(config.set_address_mask(0).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("acoustic_combiner_config_{}.json", std::process::id()));
        let config = CombinerConfig::default();
        config.save_to_file(&path).unwrap();

        let loaded = CombinerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(path);

        assert!(matches!(
            CombinerConfig::from_file("/nonexistent/acoustic.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
