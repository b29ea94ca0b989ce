use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Location of an observation or a prediction target.
/// `t` is only set for time-tagged data.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub t: Option<f64>,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, t: None }
    }

    pub fn with_time(x: f64, y: f64, t: f64) -> Self {
        Self { x, y, t: Some(t) }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.t.map_or(true, f64::is_finite)
    }

    /// Spatial separation vector from `self` to `other`.
    #[inline(always)]
    pub fn offset_to(&self, other: &Location) -> Vector2<f64> {
        Vector2::new(other.x - self.x, other.y - self.y)
    }

    /// Time difference, missing times count as zero.
    #[inline(always)]
    pub fn time_offset_to(&self, other: &Location) -> f64 {
        other.t.unwrap_or(0.0) - self.t.unwrap_or(0.0)
    }
}

impl From<(f64, f64)> for Location {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

impl From<(f64, f64, f64)> for Location {
    fn from((x, y, t): (f64, f64, f64)) -> Self {
        Self::with_time(x, y, t)
    }
}

/// A single measured value, e.g. global horizontal irradiance at a station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location: Location,
    pub value: f64,
}

impl Observation {
    pub fn new(location: impl Into<Location>, value: f64) -> Self {
        Self {
            location: location.into(),
            value,
        }
    }
}

/// Flat csv row: `x,y,value` with an optional `t` column.
#[derive(Debug, Deserialize)]
pub(crate) struct ObservationRecord {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub t: Option<f64>,
    pub value: f64,
}

impl From<ObservationRecord> for Observation {
    fn from(record: ObservationRecord) -> Self {
        Self {
            location: Location {
                x: record.x,
                y: record.y,
                t: record.t,
            },
            value: record.value,
        }
    }
}
