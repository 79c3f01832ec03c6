//! Measurement processing: water properties, track filtering and LBL buffering

pub mod water;
pub mod track_filter;
pub mod trilateration_buffer;

pub use water::WaterProperties;
pub use track_filter::{TrackOutlierFilter, TrackPoint, TrackSmoother};
pub use trilateration_buffer::{TimedRangePoint, TrilaterationBuffer};
