//! Core types, constants and time-aware values for the combiner

pub mod types;
pub mod constants;
pub mod staleness;

pub use types::*;
pub use constants::*;
pub use staleness::{Clock, ManualClock, StalenessValue, SystemClock};
