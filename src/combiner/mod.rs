//! The positioning combiner and its per-vessel and per-beacon state

pub mod beacon;
pub mod control;
pub mod engine;
pub mod nmea;
pub mod polling;
pub mod station;

pub use beacon::{BeaconSnapshot, BeaconState, BEACON_TAG};
pub use control::{ControlCommand, ControlParseError, ControlReply, ReferenceCommand};
pub use engine::{
    CombinerError, CombinerEvent, EventListener, ListenerHandle, LocationOverride, OutputFormat,
    PositioningCombiner, OVERRIDE_PERIOD,
};
pub use polling::{PollingMonitor, PollingState};
pub use station::{StationLocals, STATION_TAG};
