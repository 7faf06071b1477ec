//! Value-mapping strategies that turn parsed cells into bitmap category ids.
//!
//! Range checks on continuous axes are half-open: a value equal to the
//! configured minimum maps to the first bucket, a value equal to the maximum is
//! out of range. Integer ranges are inclusive at both ends.

use crate::elevation::ElevationTable;
use crate::record::{ParserKind, TypedValue, Value};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("{value} out of range")]
    OutOfRange { value: f64 },
    #[error("point ({x}, {y}) out of range")]
    PointOutOfRange { x: f64, y: f64 },
    #[error("point (0, 0) out of range")]
    NullLocation,
    #[error("no elevation for grid cell {cell}")]
    MissingElevation { cell: u64 },
    #[error("expected {expected:?} input at position {position}")]
    InputMismatch {
        position: usize,
        expected: ParserKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntMapper {
    pub min: u64,
    pub max: u64,
}

impl IntMapper {
    pub fn id(&self, value: i64) -> Result<u64, MapError> {
        match u64::try_from(value) {
            Ok(v) if v >= self.min && v <= self.max => Ok(v),
            _ => Err(MapError::OutOfRange {
                value: value as f64,
            }),
        }
    }
}

/// Equal-width buckets over `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFloatMapper {
    pub min: f64,
    pub max: f64,
    pub res: u64,
}

impl LinearFloatMapper {
    pub fn id(&self, value: f64) -> Result<u64, MapError> {
        if !value.is_finite() || value < self.min || value >= self.max {
            return Err(MapError::OutOfRange { value });
        }
        let bucket = (self.res as f64 * (value - self.min) / (self.max - self.min)).floor();
        Ok((bucket as u64).min(self.res.saturating_sub(1)))
    }
}

/// Rectangular lattice over (longitude, latitude); half-open on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMapper {
    pub x_min: f64,
    pub x_max: f64,
    pub x_res: u64,
    pub y_min: f64,
    pub y_max: f64,
    pub y_res: u64,
}

impl GridMapper {
    pub fn cells(&self) -> u64 {
        self.x_res * self.y_res
    }

    pub fn id(&self, x: f64, y: f64) -> Result<u64, MapError> {
        if x == 0.0 && y == 0.0 {
            return Err(MapError::NullLocation);
        }
        let inside = |v: f64, lo: f64, hi: f64| v.is_finite() && v >= lo && v < hi;
        if !inside(x, self.x_min, self.x_max) || !inside(y, self.y_min, self.y_max) {
            return Err(MapError::PointOutOfRange { x, y });
        }
        let xi = ((self.x_res as f64 * (x - self.x_min) / (self.x_max - self.x_min)).floor()
            as u64)
            .min(self.x_res - 1);
        let yi = ((self.y_res as f64 * (y - self.y_min) / (self.y_max - self.y_min)).floor()
            as u64)
            .min(self.y_res - 1);
        Ok(self.y_res * xi + yi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Minutes between two timestamps.
    Duration,
    /// Distance over the hours between two timestamps.
    Speed,
}

impl Derivation {
    fn inputs(self) -> &'static [ParserKind] {
        match self {
            Self::Duration => &[ParserKind::Time, ParserKind::Time],
            Self::Speed => &[ParserKind::Time, ParserKind::Time, ParserKind::Float],
        }
    }

    fn compute(self, values: &[TypedValue<'_>]) -> Result<f64, MapError> {
        let start = time_at(values, 0)?;
        let end = time_at(values, 1)?;
        match self {
            Self::Duration => Ok(elapsed_minutes(start, end)),
            Self::Speed => Ok(float_at(values, 2)? / elapsed_hours(start, end)),
        }
    }
}

pub fn elapsed_minutes(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    (end - start).num_milliseconds() as f64 / 60_000.0
}

pub fn elapsed_hours(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

#[derive(Debug, Clone)]
pub struct ElevationMapper {
    pub grid: GridMapper,
    pub table: Arc<ElevationTable>,
    pub bins: LinearFloatMapper,
}

#[derive(Debug, Clone)]
pub enum Mapper {
    Int(IntMapper),
    LinearFloat(LinearFloatMapper),
    TimeOfDay { res: u64 },
    DayOfWeek,
    DayOfMonth,
    Month,
    Year,
    Grid(GridMapper),
    Derived {
        derive: Derivation,
        bins: LinearFloatMapper,
    },
    Elevation(ElevationMapper),
}

impl Mapper {
    /// Parser kinds this strategy expects, in order.
    pub fn inputs(&self) -> &'static [ParserKind] {
        match self {
            Self::Int(_) => &[ParserKind::Int],
            Self::LinearFloat(_) => &[ParserKind::Float],
            Self::TimeOfDay { .. } | Self::DayOfWeek | Self::DayOfMonth | Self::Month | Self::Year => {
                &[ParserKind::Time]
            }
            Self::Grid(_) | Self::Elevation(_) => &[ParserKind::Float, ParserKind::Float],
            Self::Derived { derive, .. } => derive.inputs(),
        }
    }

    pub fn map(&self, values: &[TypedValue<'_>]) -> Result<Vec<u64>, MapError> {
        let id = match self {
            Self::Int(m) => m.id(int_at(values, 0)?)?,
            Self::LinearFloat(m) => m.id(float_at(values, 0)?)?,
            Self::TimeOfDay { res } => {
                let t = time_at(values, 0)?;
                *res * u64::from(t.num_seconds_from_midnight()) / 86_400
            }
            Self::DayOfWeek => u64::from(time_at(values, 0)?.weekday().num_days_from_sunday()),
            Self::DayOfMonth => u64::from(time_at(values, 0)?.day()),
            Self::Month => u64::from(time_at(values, 0)?.month()),
            Self::Year => {
                let year = time_at(values, 0)?.year();
                u64::try_from(year).map_err(|_| MapError::OutOfRange {
                    value: f64::from(year),
                })?
            }
            Self::Grid(grid) => grid.id(float_at(values, 0)?, float_at(values, 1)?)?,
            Self::Derived { derive, bins } => bins.id(derive.compute(values)?)?,
            Self::Elevation(m) => {
                let cell = m.grid.id(float_at(values, 0)?, float_at(values, 1)?)?;
                let elevation = m
                    .table
                    .get(cell)
                    .ok_or(MapError::MissingElevation { cell })?;
                m.bins.id(elevation)?
            }
        };
        Ok(vec![id])
    }
}

fn int_at(values: &[TypedValue<'_>], position: usize) -> Result<i64, MapError> {
    match values.get(position).map(|v| v.value) {
        Some(Value::Int(v)) => Ok(v),
        _ => Err(MapError::InputMismatch {
            position,
            expected: ParserKind::Int,
        }),
    }
}

fn float_at(values: &[TypedValue<'_>], position: usize) -> Result<f64, MapError> {
    match values.get(position).map(|v| v.value) {
        Some(Value::Float(v)) => Ok(v),
        _ => Err(MapError::InputMismatch {
            position,
            expected: ParserKind::Float,
        }),
    }
}

fn time_at(values: &[TypedValue<'_>], position: usize) -> Result<NaiveDateTime, MapError> {
    match values.get(position).map(|v| v.value) {
        Some(Value::Time(v)) => Ok(v),
        _ => Err(MapError::InputMismatch {
            position,
            expected: ParserKind::Time,
        }),
    }
}
