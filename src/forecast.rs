//! Deterministic forecasts: fixed-length windows of values keyed by issue time.
//!
//! Every constructor funnels its input into one canonical shape, a sorted map
//! from issue time to a window of `horizon` values, and validates it the same
//! way: no empty result, one horizon for all windows and a uniform interval
//! between consecutive issue times.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::datatype::{Resolution, SeriesArray, uniform_spacing};
use crate::error::{Result, SeriesError};
use crate::series::{Normalization, SingleTimeSeries};

/// Forecast windows that have already been parsed from some external source
/// but not yet validated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawForecast {
    pub windows: Vec<(NaiveDateTime, Vec<f64>)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Deterministic {
    label: String,
    resolution: Resolution,
    data: BTreeMap<NaiveDateTime, Vec<f64>>,
    initial_timestamp: NaiveDateTime,
    interval: TimeDelta,
    horizon: usize,
    uuid: Uuid,
    scaling_factor_multiplier: Option<String>,
}

impl Deterministic {
    pub fn new(
        label: impl Into<String>,
        data: BTreeMap<NaiveDateTime, Vec<f64>>,
        resolution: Resolution,
    ) -> Result<Self> {
        Self::build(label.into(), data, resolution)
    }
    /// Accepts any rows whose windows can be viewed as slices of values.
    pub fn from_rows<I, R>(label: impl Into<String>, rows: I, resolution: Resolution) -> Result<Self>
    where
        I: IntoIterator<Item = (NaiveDateTime, R)>,
        R: AsRef<[f64]>,
    {
        let mut data = BTreeMap::new();
        for (initial_time, row) in rows {
            if data.insert(initial_time, row.as_ref().to_vec()).is_some() {
                return Err(SeriesError::DataFormat(format!(
                    "issue time {initial_time} appears more than once"
                )));
            }
        }
        Self::build(label.into(), data, resolution)
    }
    pub fn from_raw(label: impl Into<String>, raw: RawForecast, resolution: Resolution) -> Result<Self> {
        Self::from_rows(label, raw.windows, resolution)
    }
    /// Reads a delimited table whose first column holds the issue time and
    /// whose remaining columns hold the window values. The first line is a header.
    pub fn from_csv<P: AsRef<Path>>(
        label: impl Into<String>,
        path: P,
        resolution: Resolution,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut raw = RawForecast::default();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let Some(stamp) = fields.next() else {
                continue;
            };
            let initial_time = parse_timestamp(stamp).ok_or_else(|| {
                SeriesError::DataFormat(format!(
                    "{}: row {} has an unreadable timestamp '{stamp}'",
                    path.display(),
                    line + 1
                ))
            })?;
            let mut window = Vec::new();
            for field in fields.filter(|f| !f.is_empty()) {
                let value = f64::from_str(field).map_err(|e| {
                    SeriesError::DataFormat(format!(
                        "{}: row {} has an unreadable value '{field}': {e}",
                        path.display(),
                        line + 1
                    ))
                })?;
                window.push(value);
            }
            raw.windows.push((initial_time, window));
        }
        debug!(path = %path.display(), rows = raw.windows.len(), "read forecast table");
        Self::from_raw(label, raw, resolution)
    }
    /// Builds a forecast from windows that carry their own timestamps. The
    /// resolution is derived from those timestamps and every gap is checked.
    pub fn from_time_series_array(
        label: impl Into<String>,
        windows: BTreeMap<NaiveDateTime, SingleTimeSeries>,
    ) -> Result<Self> {
        let mut resolution: Option<Resolution> = None;
        let mut data = BTreeMap::new();
        for (initial_time, window) in windows {
            if window.initial_timestamp() != initial_time {
                return Err(SeriesError::DataFormat(format!(
                    "window filed under {initial_time} starts at {}",
                    window.initial_timestamp()
                )));
            }
            if let Some(spacing) = uniform_spacing(window.timestamps().iter().copied())? {
                let window_resolution = Resolution::new(spacing)?;
                match resolution {
                    None => resolution = Some(window_resolution),
                    Some(expected) if expected != window_resolution => {
                        return Err(SeriesError::DataFormat(format!(
                            "non-uniform resolution: window {initial_time} is spaced by {window_resolution}, expected {expected}"
                        )));
                    }
                    Some(_) => (),
                }
            }
            data.insert(initial_time, window.values().to_vec());
        }
        let resolution = resolution.ok_or_else(|| {
            SeriesError::DataFormat("cannot derive a resolution from single-sample windows".to_string())
        })?;
        Self::build(label.into(), data, resolution)
    }
    fn build(
        label: String,
        mut data: BTreeMap<NaiveDateTime, Vec<f64>>,
        resolution: Resolution,
    ) -> Result<Self> {
        data.retain(|_, window| !window.is_empty());
        let Some((initial_timestamp, horizon)) = data.iter().next().map(|(t, w)| (*t, w.len())) else {
            return Err(SeriesError::DataFormat(format!(
                "forecast '{label}' has no windows"
            )));
        };
        if let Some((initial_time, window)) = data.iter().find(|(_, w)| w.len() != horizon) {
            return Err(SeriesError::DataFormat(format!(
                "window {initial_time} of '{label}' has {} values, expected {horizon}",
                window.len()
            )));
        }
        let interval = uniform_spacing(data.keys().copied())?.unwrap_or_else(TimeDelta::zero);
        Ok(Self {
            label,
            resolution,
            data,
            initial_timestamp,
            interval,
            horizon,
            uuid: Uuid::new_v4(),
            scaling_factor_multiplier: None,
        })
    }
    /// Folds a normalization factor into every window. This is applied once
    /// and cannot be undone.
    pub fn with_normalization(mut self, normalization: Normalization) -> Result<Self> {
        let factor = normalization.factor(self.data.values().flatten())?;
        self.data
            .values_mut()
            .flat_map(|w| w.iter_mut())
            .for_each(|v| *v /= factor);
        Ok(self)
    }
    pub fn with_scaling_factor_multiplier(mut self, multiplier: impl Into<String>) -> Self {
        self.scaling_factor_multiplier = Some(multiplier.into());
        self
    }
    pub(crate) fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }
    pub(crate) fn with_scaling(mut self, multiplier: Option<String>) -> Self {
        self.scaling_factor_multiplier = multiplier;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
    pub fn scaling_factor_multiplier(&self) -> Option<&str> {
        self.scaling_factor_multiplier.as_deref()
    }
    pub fn horizon(&self) -> usize {
        self.horizon
    }
    pub fn count(&self) -> usize {
        self.data.len()
    }
    /// Spacing between issue times; zero when there is a single window.
    pub fn interval(&self) -> TimeDelta {
        self.interval
    }
    pub fn initial_timestamp(&self) -> NaiveDateTime {
        self.initial_timestamp
    }
    pub fn initial_times(&self) -> Vec<NaiveDateTime> {
        self.data.keys().copied().collect()
    }
    /// Time covered from the first issue time to the end of the last window.
    pub fn total_period(&self) -> Result<TimeDelta> {
        let out_of_range = || {
            SeriesError::DataFormat(format!(
                "the period of forecast '{}' is out of range",
                self.label
            ))
        };
        let windows = i32::try_from(self.count() - 1).map_err(|_| out_of_range())?;
        let horizon = i32::try_from(self.horizon).map_err(|_| out_of_range())?;
        self.interval
            .checked_mul(windows)
            .zip(self.resolution.as_delta().checked_mul(horizon))
            .and_then(|(issued, window)| issued.checked_add(&window))
            .ok_or_else(out_of_range)
    }
    pub fn data(&self) -> &BTreeMap<NaiveDateTime, Vec<f64>> {
        &self.data
    }

    // ------------- Windows -------------
    pub fn get_window(&self, initial_time: NaiveDateTime) -> Result<(NaiveDateTime, &[f64])> {
        self.data
            .get(&initial_time)
            .map(|w| (initial_time, w.as_slice()))
            .ok_or_else(|| {
                SeriesError::NotFound(format!(
                    "forecast '{}' has no window issued at {initial_time}",
                    self.label
                ))
            })
    }
    pub fn get_window_by_index(&self, index: usize) -> Result<(NaiveDateTime, &[f64])> {
        let initial_time = self
            .initial_times()
            .get(index)
            .copied()
            .ok_or_else(|| {
                SeriesError::NotFound(format!(
                    "forecast '{}' has {} windows, index {index} is out of range",
                    self.label,
                    self.count()
                ))
            })?;
        self.get_window(initial_time)
    }
    /// The window issued at `initial_time` as a series of its own.
    pub fn window_series(&self, initial_time: NaiveDateTime) -> Result<SingleTimeSeries> {
        let (_, values) = self.get_window(initial_time)?;
        Ok(
            SingleTimeSeries::from_values(self.label.clone(), initial_time, self.resolution, values.to_vec())?
                .with_scaling(self.scaling_factor_multiplier.clone()),
        )
    }
    pub fn iterate_windows(&self) -> Windows<'_> {
        Windows {
            inner: self.data.iter(),
        }
    }

    // ------------- Slicing -------------
    /// Copies every field but the windows, which are replaced by `data`, and
    /// the identity, which is always new.
    pub fn slice(&self, data: BTreeMap<NaiveDateTime, Vec<f64>>) -> Result<Self> {
        let sliced = Self::build(self.label.clone(), data, self.resolution)?;
        Ok(sliced.with_scaling(self.scaling_factor_multiplier.clone()))
    }
    pub fn window_subset(&self, start: NaiveDateTime, count: usize) -> Result<Self> {
        let data = self
            .data
            .range(start..)
            .take(count)
            .map(|(t, w)| (*t, w.clone()))
            .collect();
        self.slice(data)
    }
    pub fn to_array(&self) -> SeriesArray {
        SeriesArray::from_rows_unchecked(
            self.count(),
            self.horizon,
            self.data.values().flatten().copied().collect(),
        )
    }
}

/// Ascending iteration over the windows of a forecast. Calling
/// [`Deterministic::iterate_windows`] again starts over.
pub struct Windows<'a> {
    inner: btree_map::Iter<'a, NaiveDateTime, Vec<f64>>,
}
impl<'a> Iterator for Windows<'a> {
    type Item = (NaiveDateTime, &'a [f64]);
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(t, w)| (*t, w.as_slice()))
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
impl ExactSizeIterator for Windows<'_> {}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::from_str(s)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").ok())
}
