//! Physical constants and protocol limits

/// Speed of sound in water under standard conditions (m/s)
pub const SPEED_OF_SOUND_WATER: f64 = 1500.0;

/// Upper bound of the linear value range carried by a response code
pub const CODE_RANGE: u32 = 8000;

/// Supply voltage mapped to response code 0 (V)
pub const ABS_MIN_VCC_V: f64 = 5.0;
/// Supply voltage mapped to response code `CODE_RANGE` (V)
pub const ABS_MAX_VCC_V: f64 = 30.0;

/// Water temperature mapped to response code 0 (°C)
pub const ABS_MIN_TEMP_C: f64 = -5.0;
/// Water temperature mapped to response code `CODE_RANGE` (°C)
pub const ABS_MAX_TEMP_C: f64 = 45.0;

/// Accepted range for the interrogator's maximum distance setting (m)
pub const ABS_MIN_RANGE_M: f64 = 100.0;
pub const ABS_MAX_RANGE_M: f64 = 10000.0;

/// Accepted salinity range (PSU)
pub const SALINITY_MIN_PSU: f64 = 0.0;
pub const SALINITY_MAX_PSU: f64 = 42.0;

/// Standard atmospheric pressure (mBar)
pub const ATM_PRESSURE_MBAR: f64 = 1013.25;

/// Standard gravity (m/s²)
pub const GRAVITY_ACC_MPS2: f64 = 9.80665;

/// WGS84 semi-major axis (m)
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6378137.0;
/// WGS84 flattening
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257223563;

/// Number of addressable responders
pub const MAX_BEACONS: usize = 16;

/// Lowest and highest request code reserved for user data
pub const USER_DATA_CODE_MIN: u8 = 3;
pub const USER_DATA_CODE_MAX: u8 = 30;
