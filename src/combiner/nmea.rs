//! NMEA 0183 translation of positions for chart plotters and loggers

use chrono::{DateTime, Utc};

/// Talker identifier used for all generated sentences
pub const TALKER: &str = "GN";

/// GGA fix quality reported for acoustic positions
pub const ACOUSTIC_FIX_QUALITY: u8 = 4;

/// XOR of all bytes of the sentence body (between `$` and `*`)
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Assemble `$<talker><id>,<fields>*XX\r\n`
pub fn build_sentence(talker: &str, sentence_id: &str, fields: &[String]) -> String {
    let body = format!("{}{},{}", talker, sentence_id, fields.join(","));
    format!("${}*{:02X}\r\n", body, checksum(&body))
}

/// Latitude as `ddmm.mmmm` plus hemisphere
pub fn format_latitude(lat_deg: f64) -> (String, &'static str) {
    let hemisphere = if lat_deg >= 0.0 { "N" } else { "S" };
    (degrees_minutes(lat_deg.abs(), 2), hemisphere)
}

/// Longitude as `dddmm.mmmm` plus hemisphere
pub fn format_longitude(lon_deg: f64) -> (String, &'static str) {
    let hemisphere = if lon_deg >= 0.0 { "E" } else { "W" };
    (degrees_minutes(lon_deg.abs(), 3), hemisphere)
}

fn degrees_minutes(value: f64, degree_digits: usize) -> String {
    let mut degrees = value.trunc();
    let mut minutes = (value - degrees) * 60.0;
    // Rounding to 4 decimals may carry into the next degree
    if (minutes * 10_000.0).round() >= 600_000.0 {
        degrees += 1.0;
        minutes = 0.0;
    }
    format!("{:0width$}{:07.4}", degrees as u32, minutes, width = degree_digits)
}

/// Position and environment to translate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NmeaFix {
    /// Both coordinates, only when the position is valid
    pub position: Option<(f64, f64)>,
    pub depth_m: Option<f64>,
    pub water_temp_c: Option<f64>,
}

/// RMC, GGA and MTW sentences for one fix, each CRLF terminated
pub fn fix_triplet(fix: &NmeaFix, at: DateTime<Utc>) -> String {
    let time = at.format("%H%M%S%.3f").to_string();
    let time = time[..time.len() - 1].to_string();
    let date = at.format("%d%m%y").to_string();

    let (lat, ns, lon, ew) = match fix.position {
        Some((lat_deg, lon_deg)) => {
            let (lat, ns) = format_latitude(lat_deg);
            let (lon, ew) = format_longitude(lon_deg);
            (lat, ns.to_string(), lon, ew.to_string())
        }
        None => (String::new(), String::new(), String::new(), String::new()),
    };
    let status = if fix.position.is_some() { "A" } else { "V" };

    let rmc = build_sentence(
        TALKER,
        "RMC",
        &[
            time.clone(),
            status.to_string(),
            lat.clone(),
            ns.clone(),
            lon.clone(),
            ew.clone(),
            String::new(),
            String::new(),
            date,
            String::new(),
            String::new(),
            status.to_string(),
        ],
    );

    let altitude = fix.depth_m.map(|d| format!("{:.1}", -d)).unwrap_or_default();
    let gga = build_sentence(
        TALKER,
        "GGA",
        &[
            time,
            lat,
            ns,
            lon,
            ew,
            ACOUSTIC_FIX_QUALITY.to_string(),
            String::new(),
            String::new(),
            altitude,
            "M".to_string(),
            String::new(),
            "M".to_string(),
            String::new(),
            String::new(),
        ],
    );

    let temperature = fix.water_temp_c.map(|t| format!("{:.1}", t)).unwrap_or_default();
    let mtw = build_sentence(TALKER, "MTW", &[temperature, "C".to_string()]);

    format!("{}{}{}", rmc, gga, mtw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_checksum() {
        // Well-known sentence from the NMEA reference
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert_eq!(checksum(body), 0x47);
    }

    #[test]
    fn test_coordinate_format() {
        assert_eq!(format_latitude(48.1173), ("4807.0380".to_string(), "N"));
        assert_eq!(format_longitude(-11.516667), ("01131.0000".to_string(), "W"));
        assert_eq!(format_latitude(-0.5), ("0030.0000".to_string(), "S"));
        // 59.99999' rounds into the next degree
        assert_eq!(format_latitude(10.9999999), ("1100.0000".to_string(), "N"));
    }

    #[test]
    fn test_triplet_with_fix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 12, 35, 19).unwrap();
        let fix = NmeaFix {
            position: Some((44.5, 33.25)),
            depth_m: Some(12.3),
            water_temp_c: Some(14.2),
        };
        let text = fix_triplet(&fix, at);
        let lines: Vec<&str> = text.split_terminator("\r\n").collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("$GNRMC,123519.00,A,4430.0000,N,03315.0000,E,,,050324,,,A*"));
        assert!(lines[1].starts_with("$GNGGA,123519.00,4430.0000,N,03315.0000,E,4,,,-12.3,M,,M,,*"));
        assert!(lines[2].starts_with("$GNMTW,14.2,C*"));

        for line in lines {
            let (body, cs) = line[1..].split_once('*').unwrap();
            assert_eq!(u8::from_str_radix(cs, 16).unwrap(), checksum(body));
        }
    }

    #[test]
    fn test_triplet_without_fix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let text = fix_triplet(&NmeaFix::default(), at);
        assert!(text.starts_with("$GNRMC,000000.00,V,,,,,,,050324,,,V*"));
        assert!(text.contains("$GNMTW,,C*"));
        assert!(text.ends_with("\r\n"));
    }
}
