//! Materialized single time series and the normalization shared by all series values.
//!
//! A [`SingleTimeSeries`] is an ordered, uniformly spaced run of samples. The
//! slicing helpers (`head`, `tail`, `from`, `to`, `when`) never touch the source;
//! they build a new series with a fresh identity and a resolution recomputed from
//! the samples that survived.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::datatype::{Resolution, SeriesArray, uniform_spacing};
use crate::error::{Result, SeriesError};

// ------------- Normalization -------------
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Normalization {
    /// Divide by the largest value found in the data.
    Max,
    /// Divide by a fixed factor.
    Factor(f64),
}

impl Normalization {
    pub(crate) fn factor<'a, I>(&self, values: I) -> Result<f64>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let factor = match self {
            Normalization::Max => values.into_iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Normalization::Factor(factor) => *factor,
        };
        if factor == 0.0 || !factor.is_finite() {
            return Err(SeriesError::DataFormat(format!(
                "cannot normalize by a factor of {factor}"
            )));
        }
        Ok(factor)
    }
}

// ------------- SingleTimeSeries -------------
#[derive(Clone, Debug, PartialEq)]
pub struct SingleTimeSeries {
    label: String,
    resolution: Resolution,
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    uuid: Uuid,
    scaling_factor_multiplier: Option<String>,
}

impl SingleTimeSeries {
    /// Builds a series from explicit timestamps; the resolution is the common
    /// gap between them, so at least two samples are required.
    pub fn new(
        label: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
    ) -> Result<Self> {
        check_lengths(&timestamps, &values)?;
        let resolution = match uniform_spacing(timestamps.iter().copied())? {
            Some(spacing) => Resolution::new(spacing)?,
            None => {
                return Err(SeriesError::DataFormat(
                    "cannot derive a resolution from a single timestamp".to_string(),
                ));
            }
        };
        Ok(Self::assemble(label.into(), resolution, timestamps, values))
    }
    pub fn with_resolution(
        label: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
        resolution: Resolution,
    ) -> Result<Self> {
        check_lengths(&timestamps, &values)?;
        if let Some(spacing) = uniform_spacing(timestamps.iter().copied())? {
            if spacing != resolution.as_delta() {
                return Err(SeriesError::DataFormat(format!(
                    "timestamps are spaced by {spacing} but the resolution is {resolution}"
                )));
            }
        }
        Ok(Self::assemble(label.into(), resolution, timestamps, values))
    }
    pub fn from_values(
        label: impl Into<String>,
        initial_timestamp: NaiveDateTime,
        resolution: Resolution,
        values: Vec<f64>,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(SeriesError::DataFormat(
                "a time series needs at least one value".to_string(),
            ));
        }
        let timestamps =
            crate::datatype::initial_times(initial_timestamp, resolution.as_delta(), values.len())?;
        Ok(Self::assemble(label.into(), resolution, timestamps, values))
    }
    fn assemble(
        label: String,
        resolution: Resolution,
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            label,
            resolution,
            timestamps,
            values,
            uuid: Uuid::new_v4(),
            scaling_factor_multiplier: None,
        }
    }
    /// Folds a normalization factor into the values. This is applied once and
    /// cannot be undone.
    pub fn with_normalization(mut self, normalization: Normalization) -> Result<Self> {
        let factor = normalization.factor(self.values.iter())?;
        self.values.iter_mut().for_each(|v| *v /= factor);
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
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
    pub fn scaling_factor_multiplier(&self) -> Option<&str> {
        self.scaling_factor_multiplier.as_deref()
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn initial_timestamp(&self) -> NaiveDateTime {
        self.timestamps[0]
    }
    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.timestamps[self.timestamps.len() - 1]
    }
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }
    pub fn to_array(&self) -> SeriesArray {
        SeriesArray::vector(self.values.clone())
    }

    // ------------- Slicing -------------
    pub fn head(&self, n: usize) -> Result<Self> {
        let end = n.min(self.len());
        self.derive(0, end)
    }
    pub fn tail(&self, n: usize) -> Result<Self> {
        let start = self.len().saturating_sub(n);
        self.derive(start, self.len())
    }
    /// Samples at or after `timestamp`.
    pub fn from(&self, timestamp: NaiveDateTime) -> Result<Self> {
        let start = self.timestamps.partition_point(|t| *t < timestamp);
        self.derive(start, self.len())
    }
    /// Samples at or before `timestamp`.
    pub fn to(&self, timestamp: NaiveDateTime) -> Result<Self> {
        let end = self.timestamps.partition_point(|t| *t <= timestamp);
        self.derive(0, end)
    }
    /// Samples for which `predicate` holds. Fails when the survivors are no
    /// longer evenly spaced.
    pub fn when<F>(&self, mut predicate: F) -> Result<Self>
    where
        F: FnMut(NaiveDateTime, f64) -> bool,
    {
        let (timestamps, values): (Vec<_>, Vec<_>) =
            self.iter().filter(|(t, v)| predicate(*t, *v)).unzip();
        self.derived_from(timestamps, values)
    }
    fn derive(&self, start: usize, end: usize) -> Result<Self> {
        let start = start.min(end);
        self.derived_from(
            self.timestamps[start..end].to_vec(),
            self.values[start..end].to_vec(),
        )
    }
    fn derived_from(&self, timestamps: Vec<NaiveDateTime>, values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(SeriesError::Selection(format!(
                "no samples of '{}' remain after slicing",
                self.label
            )));
        }
        let resolution = match uniform_spacing(timestamps.iter().copied())? {
            Some(spacing) => Resolution::new(spacing)?,
            None => self.resolution,
        };
        Ok(Self {
            label: self.label.clone(),
            resolution,
            timestamps,
            values,
            uuid: Uuid::new_v4(),
            scaling_factor_multiplier: self.scaling_factor_multiplier.clone(),
        })
    }
}

fn check_lengths(timestamps: &[NaiveDateTime], values: &[f64]) -> Result<()> {
    if timestamps.len() != values.len() {
        return Err(SeriesError::DataFormat(format!(
            "{} timestamps but {} values",
            timestamps.len(),
            values.len()
        )));
    }
    if values.is_empty() {
        return Err(SeriesError::DataFormat(
            "a time series needs at least one value".to_string(),
        ));
    }
    Ok(())
}
