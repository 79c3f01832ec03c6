//! Closed code types shared by the combiner and the device links

use crate::core::constants::{CODE_RANGE, MAX_BEACONS, USER_DATA_CODE_MAX, USER_DATA_CODE_MIN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Responder address. Raw values outside 1..=16 map to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BeaconAddress {
    Addr1,
    Addr2,
    Addr3,
    Addr4,
    Addr5,
    Addr6,
    Addr7,
    Addr8,
    Addr9,
    Addr10,
    Addr11,
    Addr12,
    Addr13,
    Addr14,
    Addr15,
    Addr16,
    Invalid,
}

impl BeaconAddress {
    /// All valid addresses in ascending order
    pub const ALL: [BeaconAddress; MAX_BEACONS] = [
        BeaconAddress::Addr1,
        BeaconAddress::Addr2,
        BeaconAddress::Addr3,
        BeaconAddress::Addr4,
        BeaconAddress::Addr5,
        BeaconAddress::Addr6,
        BeaconAddress::Addr7,
        BeaconAddress::Addr8,
        BeaconAddress::Addr9,
        BeaconAddress::Addr10,
        BeaconAddress::Addr11,
        BeaconAddress::Addr12,
        BeaconAddress::Addr13,
        BeaconAddress::Addr14,
        BeaconAddress::Addr15,
        BeaconAddress::Addr16,
    ];

    /// Map a raw wire value onto an address
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1..=16 => Self::ALL[(raw - 1) as usize],
            _ => BeaconAddress::Invalid,
        }
    }

    /// Numeric address, `None` for `Invalid`
    pub fn number(&self) -> Option<u8> {
        Self::ALL
            .iter()
            .position(|a| a == self)
            .map(|idx| idx as u8 + 1)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, BeaconAddress::Invalid)
    }

    /// Bit of this address inside a polling mask
    pub fn mask_bit(&self) -> u16 {
        self.number().map(|n| 1u16 << (n - 1)).unwrap_or(0)
    }
}

impl fmt::Display for BeaconAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(n) => write!(f, "{}", n),
            None => write!(f, "INVALID"),
        }
    }
}

/// Kind of interrogator reported by its device info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Ultra-short-baseline base station
    UsblBase,
    /// Long-baseline base station
    LblBase,
    /// A responder connected directly
    Responder,
    Invalid,
}

impl DeviceType {
    /// Whether the combiner can drive polling on this device
    pub fn is_base_station(&self) -> bool {
        matches!(self, DeviceType::UsblBase | DeviceType::LblBase)
    }
}

/// Data requested from a responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestCode {
    Depth,
    Temperature,
    Vcc,
    /// User-defined request, code in 3..=30
    UserData(u8),
    Invalid,
}

impl RequestCode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => RequestCode::Depth,
            1 => RequestCode::Temperature,
            2 => RequestCode::Vcc,
            USER_DATA_CODE_MIN..=USER_DATA_CODE_MAX => RequestCode::UserData(raw),
            _ => RequestCode::Invalid,
        }
    }

    pub fn raw(&self) -> Option<u8> {
        match self {
            RequestCode::Depth => Some(0),
            RequestCode::Temperature => Some(1),
            RequestCode::Vcc => Some(2),
            RequestCode::UserData(code) => Some(*code),
            RequestCode::Invalid => None,
        }
    }

    pub fn is_user_data(&self) -> bool {
        matches!(self, RequestCode::UserData(_))
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestCode::Depth => write!(f, "DPT"),
            RequestCode::Temperature => write!(f, "TMP"),
            RequestCode::Vcc => write!(f, "VCC"),
            RequestCode::UserData(code) => write!(f, "CODE_{}", code),
            RequestCode::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Error conditions a responder can report instead of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// Responder has just been powered up or restarted
    RemoteSystemStarted,
    LowBattery,
    NotSupported,
    InvalidRequest,
    Timeout,
}

impl RemoteError {
    /// Errors that describe the responder itself rather than the request
    pub fn is_standalone(&self) -> bool {
        matches!(self, RemoteError::RemoteSystemStarted | RemoteError::LowBattery)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemoteError::RemoteSystemStarted => "RSYS STRT",
            RemoteError::LowBattery => "ERR BAT LOW",
            RemoteError::NotSupported => "ERR NSUP",
            RemoteError::InvalidRequest => "ERR IREQ",
            RemoteError::Timeout => "ERR TOUT",
        };
        write!(f, "{}", text)
    }
}

/// Response carried by a remote report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Linear value in 0..=CODE_RANGE
    Value(u32),
    Error(RemoteError),
    Invalid,
}

impl ResponseCode {
    pub fn from_raw(raw: i64) -> Self {
        let range = CODE_RANGE as i64;
        match raw {
            r if (0..=range).contains(&r) => ResponseCode::Value(r as u32),
            r if r == range + 1 => ResponseCode::Error(RemoteError::RemoteSystemStarted),
            r if r == range + 2 => ResponseCode::Error(RemoteError::LowBattery),
            r if r == range + 3 => ResponseCode::Error(RemoteError::NotSupported),
            r if r == range + 4 => ResponseCode::Error(RemoteError::InvalidRequest),
            r if r == range + 5 => ResponseCode::Error(RemoteError::Timeout),
            _ => ResponseCode::Invalid,
        }
    }

    /// Human readable message for error responses
    pub fn error_message(&self, request: RequestCode) -> Option<String> {
        match self {
            ResponseCode::Error(err) if err.is_standalone() => Some(err.to_string()),
            ResponseCode::Error(err) => Some(format!("{} caused {}", request, err)),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Value(v) => write!(f, "{}", v),
            ResponseCode::Error(err) => write!(f, "{}", err),
            ResponseCode::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Status of a navigation report from the interrogator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    RemoteTimeout,
    RemoteResponse,
    /// Station telemetry only, no remote involved
    Local,
}

/// Physical devices the combiner talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceId {
    Interrogator,
    Gnss,
    Compass,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            DeviceId::Interrogator => "AZM",
            DeviceId::Gnss => "AUX1",
            DeviceId::Compass => "AUX2",
        };
        write!(f, "{}", tag)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AZM" | "INTERROGATOR" => Ok(DeviceId::Interrogator),
            "AUX1" | "GNSS" => Ok(DeviceId::Gnss),
            "AUX2" | "COMPASS" => Ok(DeviceId::Compass),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}
