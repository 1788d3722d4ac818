// src/projector.rs
//! Project recorded paths onto a fixed 0..100 drawing canvas
//!
//! Longitude and latitude are scaled independently against the padded
//! bounding box. That distorts shapes away from the equator and over large
//! areas, but at circuit scale it reads fine and keeps every marker on the
//! canvas.

use crate::{
    error::{LapError, Result},
    gps::data::{Fix, Gate},
};
use serde::{Deserialize, Serialize};

pub const CANVAS_SIZE: f64 = 100.0;
pub const MIN_PADDING: f64 = 0.20;
/// Smallest span in degrees used for a degenerate bounding box
pub const MIN_SPAN_DEG: f64 = 0.001;
pub const DEFAULT_MOVING_THRESHOLD_MPS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectorSettings {
    pub padding: f64,
    pub moving_threshold_mps: f64,
}

impl Default for ProjectorSettings {
    fn default() -> Self {
        Self {
            padding: MIN_PADDING,
            moving_threshold_mps: DEFAULT_MOVING_THRESHOLD_MPS,
        }
    }
}

impl ProjectorSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.padding.is_finite() || self.padding < MIN_PADDING {
            return Err(LapError::InvalidConfig(format!(
                "projection padding must be at least {}, got {}",
                MIN_PADDING, self.padding
            )));
        }
        if !self.moving_threshold_mps.is_finite() || self.moving_threshold_mps < 0.0 {
            return Err(LapError::InvalidConfig(format!(
                "moving threshold must be non-negative, got {}",
                self.moving_threshold_mps
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

/// Current position marker
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveMarker {
    pub point: CanvasPoint,
    /// Rotation in degrees, passed through from the fix
    pub heading: f64,
    /// Fast enough to draw a direction arrow instead of a stationary dot
    pub is_moving: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub path: Vec<CanvasPoint>,
    pub gate: Option<CanvasPoint>,
    pub live: Option<LiveMarker>,
}

impl Projection {
    /// SVG polyline `points` attribute
    pub fn polyline(&self) -> String {
        self.path
            .iter()
            .map(|p| format!("{:.2},{:.2}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Where the recorded path ends
    pub fn trailing_point(&self) -> Option<CanvasPoint> {
        self.path.last().copied()
    }
}

/// Padded bounding box mapped onto the canvas
#[derive(Debug, Clone, Copy)]
struct Frame {
    min_lat: f64,
    min_lon: f64,
    lat_range: f64,
    lon_range: f64,
}

impl Frame {
    fn around(coords: impl Iterator<Item = (f64, f64)>, padding: f64) -> Option<Self> {
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;

        for (lat, lon) in coords {
            min_lat = min_lat.min(lat);
            max_lat = max_lat.max(lat);
            min_lon = min_lon.min(lon);
            max_lon = max_lon.max(lon);
        }
        if !min_lat.is_finite() || !min_lon.is_finite() {
            return None;
        }

        let (min_lat, lat_span) = floor_span(min_lat, max_lat);
        let (min_lon, lon_span) = floor_span(min_lon, max_lon);

        Some(Self {
            min_lat: min_lat - lat_span * padding,
            min_lon: min_lon - lon_span * padding,
            lat_range: lat_span * (1.0 + 2.0 * padding),
            lon_range: lon_span * (1.0 + 2.0 * padding),
        })
    }

    fn project(&self, lat: f64, lon: f64) -> CanvasPoint {
        CanvasPoint {
            x: (lon - self.min_lon) / self.lon_range * CANVAS_SIZE,
            // screen y grows downward, latitude grows north
            y: CANVAS_SIZE - (lat - self.min_lat) / self.lat_range * CANVAS_SIZE,
        }
    }
}

/// Give a zero span a minimum width, centred so a lone point lands mid-canvas.
/// Any real extent, however narrow, is kept and fills the axis.
fn floor_span(min: f64, max: f64) -> (f64, f64) {
    let span = max - min;
    if span > 0.0 {
        (min, span)
    } else {
        let mid = (min + max) / 2.0;
        (mid - MIN_SPAN_DEG / 2.0, MIN_SPAN_DEG)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackProjector {
    settings: ProjectorSettings,
}

impl TrackProjector {
    pub fn new(settings: ProjectorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> ProjectorSettings {
        self.settings
    }

    /// Project a path with optional gate and live markers.
    ///
    /// Returns `None` when there is nothing worth drawing: fewer than two path
    /// points and no live position.
    pub fn project(&self, path: &[Fix], gate: Option<&Gate>, live: Option<&Fix>) -> Option<Projection> {
        if path.len() < 2 && live.is_none() {
            return None;
        }

        let coords = path
            .iter()
            .map(|f| (f.latitude, f.longitude))
            .chain(gate.map(|g| (g.latitude, g.longitude)))
            .chain(live.map(|f| (f.latitude, f.longitude)))
            .filter(|(lat, lon)| lat.is_finite() && lon.is_finite());
        let frame = Frame::around(coords, self.settings.padding)?;

        let projected_path = path
            .iter()
            .filter(|f| f.latitude.is_finite() && f.longitude.is_finite())
            .map(|f| frame.project(f.latitude, f.longitude))
            .collect();

        Some(Projection {
            path: projected_path,
            gate: gate.map(|g| frame.project(g.latitude, g.longitude)),
            live: live.map(|f| LiveMarker {
                point: frame.project(f.latitude, f.longitude),
                heading: f.heading.unwrap_or(0.0),
                is_moving: f.speed_or_zero() > self.settings.moving_threshold_mps,
            }),
        })
    }
}
