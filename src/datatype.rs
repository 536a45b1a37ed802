// used for timestamps and spacing between samples
use chrono::{NaiveDateTime, TimeDelta};
// resolutions travel inside serialized metadata
use serde::{Deserialize, Serialize};

// used to print out readable forms of a resolution
use std::fmt;

use crate::error::{Result, SeriesError};

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

// ------------- Resolution -------------
/// Fixed spacing between consecutive samples of a series.
///
/// A resolution is a positive whole number of milliseconds that either evenly
/// divides a day (1 second, 15 minutes, 1 hour, ...) or is itself a whole
/// number of days.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Resolution(TimeDelta);

impl Resolution {
    pub fn new(delta: TimeDelta) -> Result<Self> {
        if delta.subsec_nanos() % 1_000_000 != 0 {
            return Err(SeriesError::DataFormat(format!(
                "resolution {delta} is not a whole number of milliseconds"
            )));
        }
        let millis = delta.num_milliseconds();
        if millis <= 0 {
            return Err(SeriesError::DataFormat(format!(
                "resolution must be positive, got {delta}"
            )));
        }
        if millis % MILLIS_PER_DAY != 0 && MILLIS_PER_DAY % millis != 0 {
            return Err(SeriesError::DataFormat(format!(
                "resolution {delta} does not evenly divide a day"
            )));
        }
        Ok(Self(delta))
    }
    pub fn milliseconds(millis: i64) -> Result<Self> {
        let delta = TimeDelta::try_milliseconds(millis).ok_or_else(|| {
            SeriesError::DataFormat(format!("resolution of {millis} ms is out of range"))
        })?;
        Self::new(delta)
    }
    pub fn seconds(n: i64) -> Result<Self> {
        Self::milliseconds(n.saturating_mul(MILLIS_PER_SECOND))
    }
    pub fn minutes(n: i64) -> Result<Self> {
        Self::milliseconds(n.saturating_mul(MILLIS_PER_MINUTE))
    }
    pub fn hours(n: i64) -> Result<Self> {
        Self::milliseconds(n.saturating_mul(MILLIS_PER_HOUR))
    }
    pub fn days(n: i64) -> Result<Self> {
        Self::milliseconds(n.saturating_mul(MILLIS_PER_DAY))
    }
    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }
    pub fn num_milliseconds(&self) -> i64 {
        self.0.num_milliseconds()
    }
    /// Number of whole steps of this resolution between `from` and `to`,
    /// rounded towards negative infinity.
    pub fn steps_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> i64 {
        (to - from).num_milliseconds().div_euclid(self.num_milliseconds())
    }
}
impl TryFrom<i64> for Resolution {
    type Error = SeriesError;
    fn try_from(millis: i64) -> Result<Self> {
        Self::milliseconds(millis)
    }
}
impl From<Resolution> for i64 {
    fn from(resolution: Resolution) -> i64 {
        resolution.num_milliseconds()
    }
}
impl TryFrom<TimeDelta> for Resolution {
    type Error = SeriesError;
    fn try_from(delta: TimeDelta) -> Result<Self> {
        Self::new(delta)
    }
}
impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let millis = self.num_milliseconds();
        match millis {
            m if m % MILLIS_PER_DAY == 0 => write!(f, "{}d", m / MILLIS_PER_DAY),
            m if m % MILLIS_PER_HOUR == 0 => write!(f, "{}h", m / MILLIS_PER_HOUR),
            m if m % MILLIS_PER_MINUTE == 0 => write!(f, "{}min", m / MILLIS_PER_MINUTE),
            m if m % MILLIS_PER_SECOND == 0 => write!(f, "{}s", m / MILLIS_PER_SECOND),
            m => write!(f, "{}ms", m),
        }
    }
}

// ------------- Spacing -------------
/// Checks that every gap between consecutive timestamps is the same positive
/// delta and returns it. Fewer than two timestamps have no spacing.
pub fn uniform_spacing<I>(timestamps: I) -> Result<Option<TimeDelta>>
where
    I: IntoIterator<Item = NaiveDateTime>,
{
    let mut timestamps = timestamps.into_iter();
    let Some(mut previous) = timestamps.next() else {
        return Ok(None);
    };
    let mut spacing: Option<TimeDelta> = None;
    for current in timestamps {
        let gap = current - previous;
        if gap <= TimeDelta::zero() {
            return Err(SeriesError::DataFormat(format!(
                "timestamps are not strictly increasing at {current}"
            )));
        }
        match spacing {
            None => spacing = Some(gap),
            Some(expected) if expected != gap => {
                return Err(SeriesError::DataFormat(format!(
                    "non-uniform resolution: expected a gap of {expected} but found {gap} before {current}"
                )));
            }
            Some(_) => (),
        }
        previous = current;
    }
    Ok(spacing)
}

/// `start` moved forward by `steps` multiples of `step`. Fails with
/// `DataFormat` when the result leaves the representable calendar.
pub fn offset(start: NaiveDateTime, step: TimeDelta, steps: usize) -> Result<NaiveDateTime> {
    let out_of_range =
        || SeriesError::DataFormat(format!("{start} plus {steps} steps of {step} is out of range"));
    let factor = i32::try_from(steps).map_err(|_| out_of_range())?;
    let delta = step.checked_mul(factor).ok_or_else(out_of_range)?;
    start.checked_add_signed(delta).ok_or_else(out_of_range)
}

/// Enumerates `count` evenly spaced timestamps starting at `initial`.
pub fn initial_times(
    initial: NaiveDateTime,
    interval: TimeDelta,
    count: usize,
) -> Result<Vec<NaiveDateTime>> {
    let mut times = Vec::new();
    let mut next = Some(initial);
    for _ in 0..count {
        let current = next.ok_or_else(|| {
            SeriesError::DataFormat(format!(
                "{count} timestamps spaced by {interval} from {initial} run out of range"
            ))
        })?;
        times.push(current);
        next = current.checked_add_signed(interval);
    }
    Ok(times)
}

// Intervals may be zero (a single forecast window) so they are kept as plain
// deltas and serialized as milliseconds.
pub mod delta_millis {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delta: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(delta.num_milliseconds())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        TimeDelta::try_milliseconds(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("interval of {millis} ms is out of range")))
    }
}

// ------------- SeriesArray -------------
/// The bulk numeric payload of a series as handed to a storage backend.
///
/// Values are kept row-major. A single series is a one-column array with one
/// row per sample; a forecast has one row per window and `horizon` columns.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesArray {
    rows: usize,
    columns: usize,
    values: Vec<f64>,
}

impl SeriesArray {
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            rows: values.len(),
            columns: 1,
            values,
        }
    }
    pub fn matrix(rows: usize, columns: usize, values: Vec<f64>) -> Result<Self> {
        if columns == 0 || rows.checked_mul(columns) != Some(values.len()) {
            return Err(SeriesError::DataFormat(format!(
                "{} values cannot be shaped into {rows} rows of {columns} columns",
                values.len()
            )));
        }
        Ok(Self {
            rows,
            columns,
            values,
        })
    }
    // callers guarantee rows * columns == values.len()
    pub(crate) fn from_rows_unchecked(rows: usize, columns: usize, values: Vec<f64>) -> Self {
        Self {
            rows,
            columns,
            values,
        }
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn columns(&self) -> usize {
        self.columns
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.columns;
        Some(&self.values[start..start + self.columns])
    }
    pub fn iter_rows(&self) -> std::slice::Chunks<'_, f64> {
        self.values.chunks(self.columns)
    }
    /// Little-endian bytes of the rows in `start..end`.
    pub fn row_bytes(&self, start: usize, end: usize) -> Vec<u8> {
        self.values[start * self.columns..end * self.columns]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

/// Decodes little-endian f64 values, failing on a ragged tail.
pub fn values_from_bytes(bytes: &[u8]) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(SeriesError::DataCorruption {
            message: format!("{} bytes do not hold whole f64 values", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut lane = [0u8; 8];
            lane.copy_from_slice(chunk);
            f64::from_le_bytes(lane)
        })
        .collect())
}
