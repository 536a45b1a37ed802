//! Lightweight descriptors kept inline with each component.
//!
//! Metadata records where the bulk values of a series live (the reference
//! UUID) and enough about their shape to select rows from storage without
//! reading the whole array. They serialize as flat records tagged with their
//! concrete type.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::datatype::{Resolution, SeriesArray, delta_millis, initial_times, offset};
use crate::error::{Result, SeriesError};
use crate::forecast::Deterministic;
use crate::series::SingleTimeSeries;

// ------------- TimeSeriesType -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeSeriesType {
    SingleTimeSeries,
    Deterministic,
}
impl fmt::Display for TimeSeriesType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeSeriesType::SingleTimeSeries => write!(f, "SingleTimeSeries"),
            TimeSeriesType::Deterministic => write!(f, "Deterministic"),
        }
    }
}

// ------------- TimeSeriesKey -------------
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSeriesKey {
    time_series_type: TimeSeriesType,
    label: String,
}
impl TimeSeriesKey {
    pub fn new(time_series_type: TimeSeriesType, label: impl Into<String>) -> Self {
        Self {
            time_series_type,
            label: label.into(),
        }
    }
    pub fn time_series_type(&self) -> TimeSeriesType {
        self.time_series_type
    }
    pub fn label(&self) -> &str {
        &self.label
    }
}
impl fmt::Display for TimeSeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} '{}'", self.time_series_type, self.label)
    }
}

// ------------- Metadata -------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SingleTimeSeriesMetadata {
    label: String,
    resolution: Resolution,
    initial_timestamp: NaiveDateTime,
    length: usize,
    time_series_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scaling_factor_multiplier: Option<String>,
}
impl SingleTimeSeriesMetadata {
    pub fn from_series(series: &SingleTimeSeries) -> Self {
        Self {
            label: series.label().to_string(),
            resolution: series.resolution(),
            initial_timestamp: series.initial_timestamp(),
            length: series.len(),
            time_series_uuid: series.uuid(),
            scaling_factor_multiplier: series.scaling_factor_multiplier().map(str::to_string),
        }
    }
    pub fn length(&self) -> usize {
        self.length
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DeterministicRecord")]
pub struct DeterministicMetadata {
    label: String,
    resolution: Resolution,
    initial_timestamp: NaiveDateTime,
    #[serde(with = "delta_millis")]
    interval: TimeDelta,
    count: usize,
    horizon: usize,
    time_series_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scaling_factor_multiplier: Option<String>,
}
impl DeterministicMetadata {
    pub fn from_forecast(forecast: &Deterministic) -> Self {
        Self {
            label: forecast.label().to_string(),
            resolution: forecast.resolution(),
            initial_timestamp: forecast.initial_timestamp(),
            interval: forecast.interval(),
            count: forecast.count(),
            horizon: forecast.horizon(),
            time_series_uuid: forecast.uuid(),
            scaling_factor_multiplier: forecast.scaling_factor_multiplier().map(str::to_string),
        }
    }
    pub fn interval(&self) -> TimeDelta {
        self.interval
    }
    pub fn count(&self) -> usize {
        self.count
    }
    pub fn horizon(&self) -> usize {
        self.horizon
    }
    pub fn initial_times(&self) -> Result<Vec<NaiveDateTime>> {
        initial_times(self.initial_timestamp, self.interval, self.count)
    }
}

// Deserialized records are checked before they become metadata, so a stored
// forecast always fits the calendar.
#[derive(Deserialize)]
struct DeterministicRecord {
    label: String,
    resolution: Resolution,
    initial_timestamp: NaiveDateTime,
    #[serde(with = "delta_millis")]
    interval: TimeDelta,
    count: usize,
    horizon: usize,
    time_series_uuid: Uuid,
    #[serde(default)]
    scaling_factor_multiplier: Option<String>,
}
impl TryFrom<DeterministicRecord> for DeterministicMetadata {
    type Error = SeriesError;
    fn try_from(record: DeterministicRecord) -> Result<Self> {
        if record.count == 0 || record.horizon == 0 {
            return Err(SeriesError::DataFormat(format!(
                "forecast '{}' has {} windows of {} values",
                record.label, record.count, record.horizon
            )));
        }
        if record.count > 1 && record.interval <= TimeDelta::zero() {
            return Err(SeriesError::DataFormat(format!(
                "forecast '{}' has {} windows but an interval of {}",
                record.label, record.count, record.interval
            )));
        }
        let last = offset(record.initial_timestamp, record.interval, record.count - 1)?;
        offset(last, record.resolution.as_delta(), record.horizon - 1)?;
        Ok(Self {
            label: record.label,
            resolution: record.resolution,
            initial_timestamp: record.initial_timestamp,
            interval: record.interval,
            count: record.count,
            horizon: record.horizon,
            time_series_uuid: record.time_series_uuid,
            scaling_factor_multiplier: record.scaling_factor_multiplier,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TimeSeriesMetadata {
    SingleTimeSeries(SingleTimeSeriesMetadata),
    Deterministic(DeterministicMetadata),
}

impl TimeSeriesMetadata {
    pub fn time_series_type(&self) -> TimeSeriesType {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(_) => TimeSeriesType::SingleTimeSeries,
            TimeSeriesMetadata::Deterministic(_) => TimeSeriesType::Deterministic,
        }
    }
    pub fn key(&self) -> TimeSeriesKey {
        TimeSeriesKey::new(self.time_series_type(), self.label())
    }
    pub fn label(&self) -> &str {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => &m.label,
            TimeSeriesMetadata::Deterministic(m) => &m.label,
        }
    }
    pub fn resolution(&self) -> Resolution {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => m.resolution,
            TimeSeriesMetadata::Deterministic(m) => m.resolution,
        }
    }
    pub fn initial_timestamp(&self) -> NaiveDateTime {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => m.initial_timestamp,
            TimeSeriesMetadata::Deterministic(m) => m.initial_timestamp,
        }
    }
    /// Reference under which the bulk values are stored.
    pub fn time_series_uuid(&self) -> Uuid {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => m.time_series_uuid,
            TimeSeriesMetadata::Deterministic(m) => m.time_series_uuid,
        }
    }
    pub fn scaling_factor_multiplier(&self) -> Option<&str> {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => m.scaling_factor_multiplier.as_deref(),
            TimeSeriesMetadata::Deterministic(m) => m.scaling_factor_multiplier.as_deref(),
        }
    }
    /// Shape of the stored array: samples for a single series, windows by
    /// horizon for a forecast.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => (m.length, 1),
            TimeSeriesMetadata::Deterministic(m) => (m.count, m.horizon),
        }
    }
    /// Forecast issue times; a single series has none.
    pub fn initial_times(&self) -> Result<Vec<NaiveDateTime>> {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(_) => Ok(Vec::new()),
            TimeSeriesMetadata::Deterministic(m) => m.initial_times(),
        }
    }
    pub(crate) fn set_label(&mut self, label: String) {
        match self {
            TimeSeriesMetadata::SingleTimeSeries(m) => m.label = label,
            TimeSeriesMetadata::Deterministic(m) => m.label = label,
        }
    }
}

// ------------- TimeSeriesData -------------
/// A materialized series of either kind, as handed to and returned from storage.
#[derive(Clone, Debug, PartialEq)]
pub enum TimeSeriesData {
    Single(SingleTimeSeries),
    Deterministic(Deterministic),
}

impl TimeSeriesData {
    pub fn time_series_type(&self) -> TimeSeriesType {
        match self {
            TimeSeriesData::Single(_) => TimeSeriesType::SingleTimeSeries,
            TimeSeriesData::Deterministic(_) => TimeSeriesType::Deterministic,
        }
    }
    pub fn label(&self) -> &str {
        match self {
            TimeSeriesData::Single(s) => s.label(),
            TimeSeriesData::Deterministic(d) => d.label(),
        }
    }
    pub fn uuid(&self) -> Uuid {
        match self {
            TimeSeriesData::Single(s) => s.uuid(),
            TimeSeriesData::Deterministic(d) => d.uuid(),
        }
    }
    pub fn metadata(&self) -> TimeSeriesMetadata {
        match self {
            TimeSeriesData::Single(s) => {
                TimeSeriesMetadata::SingleTimeSeries(SingleTimeSeriesMetadata::from_series(s))
            }
            TimeSeriesData::Deterministic(d) => {
                TimeSeriesMetadata::Deterministic(DeterministicMetadata::from_forecast(d))
            }
        }
    }
    pub fn to_array(&self) -> SeriesArray {
        match self {
            TimeSeriesData::Single(s) => s.to_array(),
            TimeSeriesData::Deterministic(d) => d.to_array(),
        }
    }
    pub fn as_single(&self) -> Option<&SingleTimeSeries> {
        match self {
            TimeSeriesData::Single(s) => Some(s),
            TimeSeriesData::Deterministic(_) => None,
        }
    }
    pub fn as_deterministic(&self) -> Option<&Deterministic> {
        match self {
            TimeSeriesData::Deterministic(d) => Some(d),
            TimeSeriesData::Single(_) => None,
        }
    }
    pub fn into_single(self) -> Result<SingleTimeSeries> {
        match self {
            TimeSeriesData::Single(s) => Ok(s),
            other => Err(SeriesError::DataFormat(format!(
                "'{}' is a {}, not a SingleTimeSeries",
                other.label(),
                other.time_series_type()
            ))),
        }
    }
    pub fn into_deterministic(self) -> Result<Deterministic> {
        match self {
            TimeSeriesData::Deterministic(d) => Ok(d),
            other => Err(SeriesError::DataFormat(format!(
                "'{}' is a {}, not a Deterministic",
                other.label(),
                other.time_series_type()
            ))),
        }
    }
}
impl From<SingleTimeSeries> for TimeSeriesData {
    fn from(series: SingleTimeSeries) -> Self {
        TimeSeriesData::Single(series)
    }
}
impl From<Deterministic> for TimeSeriesData {
    fn from(forecast: Deterministic) -> Self {
        TimeSeriesData::Deterministic(forecast)
    }
}
