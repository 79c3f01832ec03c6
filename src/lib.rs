//! Acoustic Positioning Combiner
//!
//! Fuses the reports of an underwater acoustic interrogator (USBL or LBL base
//! station) with the vessel's GNSS position and compass heading, and writes
//! the vessel's and every responder's state out as text lines and NMEA
//! sentences.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod hardware;
pub mod combiner;
pub mod utils;

// Re-export commonly used types
pub use core::{BeaconAddress, Clock, DeviceId, DeviceType, ManualClock, RequestCode, ResponseCode, SystemClock};
pub use algorithms::{geodesic_project, solve_ranges_2d, GeoPoint, RangePoint, SolverSettings};
pub use processing::{TrilaterationBuffer, WaterProperties};
pub use hardware::{
    CommError, CommResult, CompassEvent, DeviceLink, GnssEvent, InterrogatorEvent, InterrogatorLink, LineSink,
    NavigationReport,
};
pub use combiner::{
    BeaconSnapshot, CombinerError, CombinerEvent, ControlCommand, ControlReply, PositioningCombiner, StationLocals,
};
pub use utils::{CombinerConfig, ConfigError};
