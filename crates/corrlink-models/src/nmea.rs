//! NMEA GGA sentences.
//!
//! Network-RTK casters select a virtual reference station from the GGA
//! sentence the rover periodically uploads. The relay caches the latest GGA
//! produced by the receiver and also needs to build one from a bare fix.

use chrono::{NaiveTime, Timelike};

use crate::error::ModelError;

/// A position fix as carried by a GGA sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaFix {
    /// UTC time of the fix.
    pub time: NaiveTime,
    /// Latitude in decimal degrees (north positive).
    pub latitude: f64,
    /// Longitude in decimal degrees (east positive).
    pub longitude: f64,
    /// Fix quality indicator (0 = invalid, 1 = GPS, 4 = RTK fixed, ...).
    pub quality: u8,
    /// Satellites used.
    pub satellites: u8,
    /// Horizontal dilution of precision.
    pub hdop: f32,
    /// Altitude above mean sea level in metres.
    pub altitude: f64,
}

/// XOR of every byte between `$` and `*`.
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

impl GgaFix {
    /// Render a checksum-terminated `$GPGGA` sentence including `\r\n`.
    ///
    /// ```
    /// use chrono::NaiveTime;
    /// use corrlink_models::GgaFix;
    ///
    /// let fix = GgaFix {
    ///     time: NaiveTime::from_hms_opt(12, 35, 19).unwrap(),
    ///     latitude: 48.1173,
    ///     longitude: 11.5167,
    ///     quality: 1,
    ///     satellites: 8,
    ///     hdop: 0.9,
    ///     altitude: 545.4,
    /// };
    /// let gga = fix.to_sentence();
    /// assert!(gga.starts_with("$GPGGA,123519.00,4807.03800,N,01131.00200,E,1,08,0.9,545.4,M"));
    /// assert!(gga.ends_with("\r\n"));
    /// ```
    pub fn to_sentence(&self) -> String {
        let centis = self.time.nanosecond() / 10_000_000;
        let body = format!(
            "GPGGA,{:02}{:02}{:02}.{:02},{},{},{},{},{},{:02},{:.1},{:.1},M,0.0,M,,",
            self.time.hour(),
            self.time.minute(),
            self.time.second(),
            centis,
            format_coordinate(self.latitude, 2),
            if self.latitude >= 0.0 { 'N' } else { 'S' },
            format_coordinate(self.longitude, 3),
            if self.longitude >= 0.0 { 'E' } else { 'W' },
            self.quality,
            self.satellites,
            self.hdop,
            self.altitude,
        );
        format!("${body}*{:02X}\r\n", nmea_checksum(&body))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_coordinate(value: f64, degree_digits: usize) -> String {
    let abs = value.abs();
    let degrees = abs.trunc();
    let minutes = (abs - degrees) * 60.0;
    format!(
        "{:0width$}{:08.5}",
        degrees as u32,
        minutes,
        width = degree_digits
    )
}

fn parse_coordinate(field: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if field.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = field.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = field.get(degree_digits..)?.parse().ok()?;
    let value = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(value),
        "S" | "W" => Some(-value),
        _ => None,
    }
}

/// Parse a GGA sentence from any talker (`GP`, `GN`, `GA`, ...).
///
/// The checksum is verified when present. Trailing `\r\n` is ignored.
pub fn parse_gga(sentence: &str) -> Result<GgaFix, ModelError> {
    let malformed = |reason: &str| ModelError::MalformedPayload {
        what: "GGA sentence".into(),
        reason: reason.into(),
    };

    let line = sentence.trim_end_matches(['\r', '\n']);
    let line = line
        .strip_prefix('$')
        .ok_or_else(|| malformed("missing '$'"))?;
    let body = match line.split_once('*') {
        Some((body, checksum)) => {
            let expected =
                u8::from_str_radix(checksum, 16).map_err(|_| malformed("bad checksum field"))?;
            if expected != nmea_checksum(body) {
                return Err(malformed("checksum mismatch"));
            }
            body
        }
        None => line,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 10 || fields[0].len() != 5 || !fields[0].ends_with("GGA") {
        return Err(malformed("not a GGA sentence"));
    }

    let time = NaiveTime::parse_from_str(fields[1], "%H%M%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(fields[1], "%H%M%S"))
        .map_err(|_| malformed("bad time"))?;
    let latitude = parse_coordinate(fields[2], fields[3], 2).ok_or_else(|| malformed("bad latitude"))?;
    let longitude =
        parse_coordinate(fields[4], fields[5], 3).ok_or_else(|| malformed("bad longitude"))?;

    Ok(GgaFix {
        time,
        latitude,
        longitude,
        quality: fields[6].parse().unwrap_or(0),
        satellites: fields[7].parse().unwrap_or(0),
        hdop: fields[8].parse().unwrap_or(0.0),
        altitude: fields[9].parse().unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

    #[test]
    fn parse_reference_sentence() {
        let fix = parse_gga(REFERENCE).unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert!((fix.longitude - 11.516_666).abs() < 1e-5);
        assert_eq!(fix.quality, 1);
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.time, NaiveTime::from_hms_opt(12, 35, 19).unwrap());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let bad = REFERENCE.replace("*47", "*48");
        assert!(parse_gga(&bad).is_err());
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let fix = GgaFix {
            time: NaiveTime::from_hms_opt(0, 0, 1).unwrap(),
            latitude: -33.5,
            longitude: -70.25,
            quality: 4,
            satellites: 20,
            hdop: 0.5,
            altitude: 10.0,
        };
        let sentence = fix.to_sentence();
        assert!(sentence.contains(",3330.00000,S,07015.00000,W,"));
        let back = parse_gga(&sentence).unwrap();
        assert!((back.latitude + 33.5).abs() < 1e-6);
        assert!((back.longitude + 70.25).abs() < 1e-6);
    }

    #[test]
    fn other_sentences_are_rejected() {
        assert!(parse_gga("$GPRMC,123519,A*00").is_err());
        assert!(parse_gga("GPGGA,no dollar").is_err());
    }
}
