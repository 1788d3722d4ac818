// src/geo.rs
//! Geodesic distance, unit conversion and display formatting

use serde::{Deserialize, Serialize};

/// WGS-84 mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const MPS_TO_KPH: f64 = 3.6;
const MPS_TO_MPH: f64 = 2.23694;

/// Anything with a WGS-84 latitude/longitude in degrees
pub trait GeoPoint {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

/// Great-circle distance in meters (haversine)
pub fn distance<A: GeoPoint + ?Sized, B: GeoPoint + ?Sized>(a: &A, b: &B) -> f64 {
    let phi1 = a.latitude().to_radians();
    let phi2 = b.latitude().to_radians();
    let d_phi = (b.latitude() - a.latitude()).to_radians();
    let d_lambda = (b.longitude() - a.longitude()).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

pub fn to_kph(mps: f64) -> f64 {
    mps * MPS_TO_KPH
}

pub fn to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Kph,
    Mph,
}

impl SpeedUnit {
    pub fn convert(&self, mps: f64) -> f64 {
        match self {
            SpeedUnit::Kph => to_kph(mps),
            SpeedUnit::Mph => to_mph(mps),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpeedUnit::Kph => "KPH",
            SpeedUnit::Mph => "MPH",
        }
    }
}

/// Format a speed in whole units, "--" when the sensor gave none
pub fn format_speed(mps: Option<f64>, unit: SpeedUnit) -> String {
    match mps {
        Some(v) if v.is_finite() => format!("{:.0}", unit.convert(v)),
        _ => "--".to_string(),
    }
}

/// Format elapsed milliseconds as mm:ss.cc, truncating
pub fn format_elapsed(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    let hundredths = (ms % 1000) / 10;

    format!("{:02}:{:02}.{:02}", minutes, seconds, hundredths)
}

/// Distance readout: meters below a kilometer, km with one decimal above
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0}m", meters)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}
