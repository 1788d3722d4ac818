// src/gps/nmea.rs
//! NMEA sentence parsing
//!
//! RMC sentences carry everything a fix needs. GGA only contributes HDOP,
//! which is kept and applied to the following RMC fixes.

use super::data::Fix;
use log::{debug, trace};

pub const KNOTS_TO_MPS: f64 = 0.514_444;
/// Nominal user equivalent range error, metres per unit of HDOP
pub const NOMINAL_UERE_M: f64 = 5.0;

/// Turns a stream of NMEA lines into fixes
#[derive(Debug, Clone, Default)]
pub struct NmeaAssembler {
    hdop: Option<f64>,
}

impl NmeaAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hdop(&self) -> Option<f64> {
        self.hdop
    }

    /// Feed one sentence. Returns a fix, stamped with `timestamp`, for every
    /// valid RMC sentence.
    pub fn feed(&mut self, line: &str, timestamp: i64) -> Option<Fix> {
        let body = match checked_body(line.trim()) {
            Some(body) => body,
            None => {
                debug!("Dropping NMEA sentence with bad checksum: {}", line.trim());
                return None;
            }
        };
        let parts: Vec<&str> = body.split(',').collect();

        match parts.first().and_then(|tag| sentence_type(tag)) {
            Some("GGA") => {
                self.parse_gga(&parts);
                None
            }
            Some("RMC") => self.parse_rmc(&parts, timestamp),
            _ => None,
        }
    }

    /// GGA (Global Positioning System Fix Data): keep HDOP only
    fn parse_gga(&mut self, parts: &[&str]) {
        if parts.len() < 9 {
            return;
        }

        // No fix (quality 0) means HDOP is meaningless
        if parts[6].is_empty() || parts[6] == "0" {
            self.hdop = None;
            return;
        }

        self.hdop = parts[8].parse::<f64>().ok().filter(|h| h.is_finite() && *h > 0.0);
        trace!("HDOP now {:?}", self.hdop);
    }

    /// RMC (Recommended Minimum Course)
    fn parse_rmc(&self, parts: &[&str], timestamp: i64) -> Option<Fix> {
        if parts.len() < 9 {
            return None;
        }

        // Status A = active, V = void
        if parts[2] != "A" {
            return None;
        }

        let latitude = parse_coordinate(parts[3], parts[4], "S")?;
        let longitude = parse_coordinate(parts[5], parts[6], "W")?;

        let mut fix = Fix::new(latitude, longitude, timestamp)
            .with_accuracy(self.hdop.map(|h| h * NOMINAL_UERE_M).unwrap_or(0.0));

        if let Ok(knots) = parts[7].parse::<f64>() {
            fix = fix.with_speed(knots * KNOTS_TO_MPS);
        }
        if let Ok(course) = parts[8].parse::<f64>() {
            fix = fix.with_heading(course);
        }

        Some(fix)
    }
}

/// `$GPRMC` -> `RMC`, accepting any talker id. Non-ASCII tags are line noise.
fn sentence_type(tag: &str) -> Option<&str> {
    let tag = tag.trim_start_matches(['$', '!']);
    if !tag.is_ascii() {
        return None;
    }
    tag.get(tag.len().saturating_sub(3)..)
}

/// Strip and verify the `*hh` checksum. Sentences without one are accepted.
fn checked_body(line: &str) -> Option<&str> {
    let (body, checksum) = match line.split_once('*') {
        Some((body, checksum)) => (body, Some(checksum)),
        None => (line, None),
    };

    if let Some(checksum) = checksum {
        let expected = u8::from_str_radix(checksum.get(..2)?, 16).ok()?;
        let actual = body
            .trim_start_matches('$')
            .bytes()
            .fold(0u8, |acc, b| acc ^ b);
        if actual != expected {
            return None;
        }
    }
    Some(body)
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    Some(if hemisphere == negative { -decimal } else { decimal })
}
