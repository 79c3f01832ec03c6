//! Text command surface
//!
//! Commands are a mnemonic followed by comma-separated arguments, e.g.
//! `CREQ,3,12` or `LHOV,44.5,33.25,90`. Parsing is strict: anything that
//! does not match a known shape is rejected before it reaches the combiner.

use crate::algorithms::GeoPoint;
use crate::core::{BeaconAddress, DeviceId, RequestCode};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

/// How `SRC3` gives the three reference responders
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceCommand {
    Discard,
    /// Local east/north meters of responders 1..3
    Local([(f64, f64); 3]),
    Geographic([GeoPoint; 3]),
}

/// A parsed control command
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// `OCON`
    Connect,
    /// `CCON`
    Disconnect,
    /// `CNA?`
    QueryConnection,
    /// `ITG?`
    QueryInterrogation,
    /// `DET?,AZM|AUX1|AUX2`
    QueryDetected(DeviceId),
    /// `CREQ,addr,code`
    UserDataRequest { address: BeaconAddress, code: RequestCode },
    /// `LHO?`
    QueryLocationOverride,
    /// `LHOV,lat,lon,hdg`; all fields empty disables the override
    SetLocationOverride(Option<(f64, f64, f64)>),
    /// `OFMT?`
    QueryOutputFormat,
    /// `SIOC,addr[,ip:port]`; no endpoint discards the channel
    SetBeaconChannel {
        address: BeaconAddress,
        endpoint: Option<SocketAddr>,
    },
    /// `RRA?`
    QueryLocalAddress,
    /// `SRRA,addr`
    SetLocalAddress(BeaconAddress),
    /// `PITG`
    Pause,
    /// `RITG`
    Resume,
    /// `SRC3,mode,r1x,r1y,r2x,r2y,r3x,r3y`
    SetReference(ReferenceCommand),
}

/// Why a command line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{mnemonic}: expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        mnemonic: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{mnemonic}: invalid {argument} '{value}'")]
    InvalidArgument {
        mnemonic: &'static str,
        argument: &'static str,
        value: String,
    },
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Action commands report only success
    Done(bool),
    /// Queries answer with a line of text
    Report(String),
}

impl ControlReply {
    pub fn is_success(&self) -> bool {
        match self {
            ControlReply::Done(ok) => *ok,
            ControlReply::Report(_) => true,
        }
    }
}

impl fmt::Display for ControlReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlReply::Done(true) => write!(f, "OK"),
            ControlReply::Done(false) => write!(f, "FAIL"),
            ControlReply::Report(text) => write!(f, "{}", text),
        }
    }
}

struct Args<'a> {
    mnemonic: &'static str,
    fields: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn expect(&self, count: usize) -> Result<(), ControlParseError> {
        if self.fields.len() != count {
            return Err(ControlParseError::ArgumentCount {
                mnemonic: self.mnemonic,
                expected: count,
                actual: self.fields.len(),
            });
        }
        Ok(())
    }

    fn invalid(&self, argument: &'static str, value: &str) -> ControlParseError {
        ControlParseError::InvalidArgument {
            mnemonic: self.mnemonic,
            argument,
            value: value.to_string(),
        }
    }

    fn address(&self, idx: usize) -> Result<BeaconAddress, ControlParseError> {
        let raw = self.fields[idx];
        let address = raw
            .parse::<u8>()
            .map(BeaconAddress::from_raw)
            .map_err(|_| self.invalid("address", raw))?;
        if !address.is_valid() {
            return Err(self.invalid("address", raw));
        }
        Ok(address)
    }

    fn number(&self, idx: usize, argument: &'static str) -> Result<f64, ControlParseError> {
        let raw = self.fields[idx];
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(self.invalid(argument, raw)),
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ControlParseError::Empty);
        }

        let mut parts = line.split(',').map(str::trim);
        let head = parts.next().unwrap_or_default().to_ascii_uppercase();
        let fields: Vec<&str> = parts.collect();

        let mnemonic: &'static str = match head.as_str() {
            "OCON" => "OCON",
            "CCON" => "CCON",
            "CNA?" => "CNA?",
            "ITG?" => "ITG?",
            "DET?" => "DET?",
            "CREQ" => "CREQ",
            "LHO?" => "LHO?",
            "LHOV" => "LHOV",
            "OFMT?" => "OFMT?",
            "SIOC" => "SIOC",
            "RRA?" => "RRA?",
            "SRRA" => "SRRA",
            "PITG" | "PAUSE" => "PITG",
            "RITG" | "RESUME" => "RITG",
            "SRC3" => "SRC3",
            _ => return Err(ControlParseError::Unknown(head)),
        };
        let args = Args { mnemonic, fields };

        match mnemonic {
            "OCON" => args.expect(0).map(|_| ControlCommand::Connect),
            "CCON" => args.expect(0).map(|_| ControlCommand::Disconnect),
            "CNA?" => args.expect(0).map(|_| ControlCommand::QueryConnection),
            "ITG?" => args.expect(0).map(|_| ControlCommand::QueryInterrogation),
            "LHO?" => args.expect(0).map(|_| ControlCommand::QueryLocationOverride),
            "OFMT?" => args.expect(0).map(|_| ControlCommand::QueryOutputFormat),
            "RRA?" => args.expect(0).map(|_| ControlCommand::QueryLocalAddress),
            "PITG" => args.expect(0).map(|_| ControlCommand::Pause),
            "RITG" => args.expect(0).map(|_| ControlCommand::Resume),
            "DET?" => {
                args.expect(1)?;
                let device = args.fields[0]
                    .parse::<DeviceId>()
                    .map_err(|_| args.invalid("device", args.fields[0]))?;
                Ok(ControlCommand::QueryDetected(device))
            }
            "CREQ" => {
                args.expect(2)?;
                let address = args.address(0)?;
                let code = args.fields[1]
                    .parse::<u8>()
                    .map(RequestCode::from_raw)
                    .map_err(|_| args.invalid("request code", args.fields[1]))?;
                if !code.is_user_data() {
                    return Err(args.invalid("request code", args.fields[1]));
                }
                Ok(ControlCommand::UserDataRequest { address, code })
            }
            "SRRA" => {
                args.expect(1)?;
                Ok(ControlCommand::SetLocalAddress(args.address(0)?))
            }
            "LHOV" => {
                args.expect(3)?;
                if args.fields.iter().all(|f| f.is_empty()) {
                    return Ok(ControlCommand::SetLocationOverride(None));
                }
                let lat = args.number(0, "latitude")?;
                let lon = args.number(1, "longitude")?;
                let heading = args.number(2, "heading")?;
                Ok(ControlCommand::SetLocationOverride(Some((lat, lon, heading))))
            }
            "SIOC" => {
                if args.fields.is_empty() || args.fields.len() > 2 {
                    args.expect(2)?;
                }
                let address = args.address(0)?;
                let endpoint = match args.fields.get(1) {
                    None | Some(&"") => None,
                    Some(raw) => Some(
                        raw.parse::<SocketAddr>()
                            .map_err(|_| args.invalid("endpoint", raw))?,
                    ),
                };
                Ok(ControlCommand::SetBeaconChannel { address, endpoint })
            }
            "SRC3" => parse_reference(&args),
            _ => Err(ControlParseError::Unknown(head)),
        }
    }
}

fn parse_reference(args: &Args<'_>) -> Result<ControlCommand, ControlParseError> {
    if args.fields.len() == 1 && args.fields[0] == "0" {
        return Ok(ControlCommand::SetReference(ReferenceCommand::Discard));
    }
    args.expect(7)?;

    let mode = args.fields[0];
    if mode == "0" {
        return Ok(ControlCommand::SetReference(ReferenceCommand::Discard));
    }

    let mut coords = [(0.0, 0.0); 3];
    for (i, slot) in coords.iter_mut().enumerate() {
        *slot = (args.number(1 + 2 * i, "x")?, args.number(2 + 2 * i, "y")?);
    }

    match mode {
        "1" => Ok(ControlCommand::SetReference(ReferenceCommand::Local(coords))),
        "2" => {
            // Geographic points are given as x = longitude, y = latitude
            let points = coords.map(|(lon, lat)| GeoPoint::new(lat, lon));
            if points.iter().any(|p| !p.is_valid()) {
                return Err(args.invalid("coordinates", &args.fields[1..].join(",")));
            }
            Ok(ControlCommand::SetReference(ReferenceCommand::Geographic(points)))
        }
        other => Err(args.invalid("mode", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!("OCON".parse::<ControlCommand>().unwrap(), ControlCommand::Connect);
        assert_eq!("ccon".parse::<ControlCommand>().unwrap(), ControlCommand::Disconnect);
        assert_eq!("PITG".parse::<ControlCommand>().unwrap(), ControlCommand::Pause);
        assert_eq!("RESUME".parse::<ControlCommand>().unwrap(), ControlCommand::Resume);
        assert_eq!("OFMT?".parse::<ControlCommand>().unwrap(), ControlCommand::QueryOutputFormat);
        assert_eq!(
            "DET?,AUX1".parse::<ControlCommand>().unwrap(),
            ControlCommand::QueryDetected(DeviceId::Gnss)
        );
    }

    #[test]
    fn test_user_data_request() {
        assert_eq!(
            "CREQ,3,12".parse::<ControlCommand>().unwrap(),
            ControlCommand::UserDataRequest {
                address: BeaconAddress::Addr3,
                code: RequestCode::UserData(12),
            }
        );
        // Depth is not a user-data code, 17 is not an address
        assert!("CREQ,3,0".parse::<ControlCommand>().is_err());
        assert!("CREQ,17,12".parse::<ControlCommand>().is_err());
        assert!("CREQ,3".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn test_location_override() {
        assert_eq!(
            "LHOV,44.5,33.25,90".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetLocationOverride(Some((44.5, 33.25, 90.0)))
        );
        assert_eq!(
            "LHOV,,,".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetLocationOverride(None)
        );
        assert!("LHOV,44.5,,90".parse::<ControlCommand>().is_err());
        assert!("LHOV,abc,33,90".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn test_beacon_channel() {
        assert_eq!(
            "SIOC,2,127.0.0.1:30000".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetBeaconChannel {
                address: BeaconAddress::Addr2,
                endpoint: Some("127.0.0.1:30000".parse().unwrap()),
            }
        );
        assert_eq!(
            "SIOC,2".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetBeaconChannel {
                address: BeaconAddress::Addr2,
                endpoint: None,
            }
        );
        assert!("SIOC,2,not-an-endpoint".parse::<ControlCommand>().is_err());
        assert!("SIOC".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn test_reference_beacons() {
        assert_eq!(
            "SRC3,0".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetReference(ReferenceCommand::Discard)
        );
        assert_eq!(
            "SRC3,1,0,0,100,0,0,100".parse::<ControlCommand>().unwrap(),
            ControlCommand::SetReference(ReferenceCommand::Local([(0.0, 0.0), (100.0, 0.0), (0.0, 100.0)]))
        );

        match "SRC3,2,33.0,44.0,33.001,44.0,33.0,44.001".parse::<ControlCommand>().unwrap() {
            ControlCommand::SetReference(ReferenceCommand::Geographic(points)) => {
                assert_eq!(points[0], GeoPoint::new(44.0, 33.0));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!("SRC3,2,200,44,33,44,33,44".parse::<ControlCommand>().is_err());
        assert!("SRC3,3,0,0,1,0,0,1".parse::<ControlCommand>().is_err());
        assert!("SRC3,1,0,0".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        assert_eq!("".parse::<ControlCommand>(), Err(ControlParseError::Empty));
        assert!(matches!("FOO".parse::<ControlCommand>(), Err(ControlParseError::Unknown(_))));
        assert!(matches!(
            "OCON,1".parse::<ControlCommand>(),
            Err(ControlParseError::ArgumentCount { .. })
        ));
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(ControlReply::Done(true).to_string(), "OK");
        assert_eq!(ControlReply::Done(false).to_string(), "FAIL");
        assert_eq!(ControlReply::Report("ITG,true".to_string()).to_string(), "ITG,true");

        assert!(ControlReply::Done(true).is_success());
        assert!(!ControlReply::Done(false).is_success());
        assert!(ControlReply::Report("CNA,false".to_string()).is_success());
    }
}
