// src/gps/data.rs
//! Position fix and gate structures

use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};

/// A single position sample from the receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: f64,        // meters
    pub speed: Option<f64>,   // m/s
    pub heading: Option<f64>, // degrees from true north
    pub timestamp: i64,       // monotonic ms
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            speed: None,
            heading: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Speed for threshold and max-speed math; a missing estimate counts as standing still
    pub fn speed_or_zero(&self) -> f64 {
        self.speed.filter(|s| s.is_finite() && *s >= 0.0).unwrap_or(0.0)
    }

    /// Check that the coordinates are usable at all
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl GeoPoint for Fix {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Start/finish reference position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Gate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn from_fix(fix: &Fix) -> Self {
        Self::new(fix.latitude, fix.longitude)
    }
}

impl GeoPoint for Gate {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_speed_counts_as_zero() {
        let fix = Fix::new(43.99, 11.37, 0);
        assert_eq!(fix.speed_or_zero(), 0.0);
        assert_eq!(fix.with_speed(12.5).speed_or_zero(), 12.5);
        assert_eq!(fix.with_speed(f64::NAN).speed_or_zero(), 0.0);
    }

    #[test]
    fn test_validity() {
        assert!(Fix::new(52.069273, -1.022066, 0).is_valid());
        assert!(!Fix::new(95.0, 0.0, 0).is_valid());
        assert!(!Fix::new(f64::NAN, 0.0, 0).is_valid());
    }

    #[test]
    fn test_gate_from_fix() {
        let fix = Fix::new(41.565187, 2.25686, 1000).with_speed(3.0);
        let gate = Gate::from_fix(&fix);
        assert_eq!(gate.latitude, 41.565187);
        assert_eq!(gate.longitude, 2.25686);
    }
}
