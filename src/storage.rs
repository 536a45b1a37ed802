//! The storage tier for bulk series values.
//!
//! Backends only know how to keep row-major numeric arrays under a reference
//! UUID together with the set of component names that point at them. The
//! operations callers use (`serialize_time_series`, `deserialize_time_series`,
//! ...) are provided on top of those primitives by [`StorageBackend`], so both
//! backends share one implementation of reference counting, read-only checks
//! and row selection.

use std::hash::BuildHasherDefault;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, TimeDelta};
use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datatype::{SeriesArray, initial_times, offset};
use crate::error::{Result, SeriesError};
use crate::forecast::Deterministic;
use crate::memory::InMemoryStorage;
use crate::metadata::{TimeSeriesData, TimeSeriesMetadata};
use crate::persist::{FileMode, FileOptions, FileStorage};
use crate::series::SingleTimeSeries;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Component names -------------
pub const COMPONENT_NAME_DELIMITER: &str = "__";

lazy_static! {
    static ref COMPONENT_NAME: Regex = Regex::new(
        r"^([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})__(.+)$"
    )
    .unwrap();
}

/// Name under which a component owns a stored array: `"{uuid}__{label}"`.
pub fn make_component_name(uuid: Uuid, label: &str) -> Result<String> {
    if label.is_empty() || label.contains(COMPONENT_NAME_DELIMITER) {
        return Err(SeriesError::DataFormat(format!(
            "label '{label}' must be non-empty and must not contain '{COMPONENT_NAME_DELIMITER}'"
        )));
    }
    Ok(format!("{uuid}{COMPONENT_NAME_DELIMITER}{label}"))
}

pub fn deserialize_component_name(name: &str) -> Result<(Uuid, String)> {
    let captures = COMPONENT_NAME
        .captures(name)
        .ok_or_else(|| SeriesError::DataFormat(format!("'{name}' is not a component name")))?;
    let label = &captures[2];
    if label.contains(COMPONENT_NAME_DELIMITER) {
        return Err(SeriesError::DataFormat(format!(
            "'{name}' holds more than one '{COMPONENT_NAME_DELIMITER}'"
        )));
    }
    let uuid = Uuid::parse_str(&captures[1])
        .map_err(|e| SeriesError::DataFormat(format!("'{name}' has an invalid uuid: {e}")))?;
    Ok((uuid, label.to_string()))
}

// ------------- Selection -------------
/// The part of a stored series to materialize.
///
/// Rows are samples for a single series and windows for a forecast. Range
/// bounds are inclusive and clamp to the stored extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Range {
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    },
    Head(usize),
    Tail(usize),
    /// One forecast window by index.
    Window(usize),
    /// `count` forecast windows starting at the first issue time at or after `start`.
    Windows { start: NaiveDateTime, count: usize },
}

impl Selection {
    pub fn from(timestamp: NaiveDateTime) -> Self {
        Selection::Range {
            from: Some(timestamp),
            to: None,
        }
    }
    pub fn to(timestamp: NaiveDateTime) -> Self {
        Selection::Range {
            from: None,
            to: Some(timestamp),
        }
    }
    pub fn between(from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Selection::Range {
            from: Some(from),
            to: Some(to),
        }
    }
    /// Resolves the selection to the stored rows it covers.
    pub fn rows(&self, metadata: &TimeSeriesMetadata) -> Result<Range<usize>> {
        let (total, _) = metadata.shape();
        let initial = metadata.initial_timestamp();
        let step = row_step(metadata);
        let rows = match *self {
            Selection::All => 0..total,
            Selection::Range { from, to } => {
                let start = from.map_or(0, |t| first_row_at_or_after(initial, step, total, t));
                let end = to.map_or(total, |t| rows_at_or_before(initial, step, total, t));
                start..end.max(start)
            }
            Selection::Head(n) => 0..n.min(total),
            Selection::Tail(n) => total - n.min(total)..total,
            Selection::Window(index) => {
                require_forecast(metadata, self)?;
                if index >= total {
                    return Err(SeriesError::NotFound(format!(
                        "'{}' has {total} windows, index {index} is out of range",
                        metadata.label()
                    )));
                }
                index..index + 1
            }
            Selection::Windows { start, count } => {
                require_forecast(metadata, self)?;
                let first = first_row_at_or_after(initial, step, total, start);
                first..(first.saturating_add(count)).min(total)
            }
        };
        if rows.is_empty() {
            return Err(SeriesError::Selection(format!(
                "{self:?} selects nothing from '{}'",
                metadata.label()
            )));
        }
        Ok(rows)
    }
}

fn require_forecast(metadata: &TimeSeriesMetadata, selection: &Selection) -> Result<()> {
    match metadata {
        TimeSeriesMetadata::Deterministic(_) => Ok(()),
        TimeSeriesMetadata::SingleTimeSeries(_) => Err(SeriesError::Selection(format!(
            "{selection:?} only applies to forecasts but '{}' is a single time series",
            metadata.label()
        ))),
    }
}

fn row_step(metadata: &TimeSeriesMetadata) -> TimeDelta {
    match metadata {
        TimeSeriesMetadata::SingleTimeSeries(_) => metadata.resolution().as_delta(),
        TimeSeriesMetadata::Deterministic(m) => m.interval(),
    }
}

fn first_row_at_or_after(initial: NaiveDateTime, step: TimeDelta, total: usize, t: NaiveDateTime) -> usize {
    if t <= initial {
        return 0;
    }
    let step = step.num_milliseconds();
    if step <= 0 {
        return total;
    }
    let offset = (t - initial).num_milliseconds();
    let index = offset.div_euclid(step) + i64::from(offset.rem_euclid(step) != 0);
    usize::try_from(index).map_or(total, |i| i.min(total))
}

fn rows_at_or_before(initial: NaiveDateTime, step: TimeDelta, total: usize, t: NaiveDateTime) -> usize {
    if t < initial {
        return 0;
    }
    let step = step.num_milliseconds();
    if step <= 0 {
        return total.min(1);
    }
    let index = (t - initial).num_milliseconds().div_euclid(step) + 1;
    usize::try_from(index).map_or(total, |i| i.min(total))
}

/// Rebuilds a typed series from its metadata and the rows read for it. A read
/// of every row keeps the stored identity, anything less is a new value.
pub(crate) fn materialize(
    metadata: &TimeSeriesMetadata,
    rows: Range<usize>,
    array: SeriesArray,
) -> Result<TimeSeriesData> {
    let (total, _) = metadata.shape();
    let complete = rows.start == 0 && rows.end == total;
    let multiplier = metadata.scaling_factor_multiplier().map(str::to_string);
    let data = match metadata {
        TimeSeriesMetadata::SingleTimeSeries(_) => {
            let resolution = metadata.resolution();
            let initial = offset(metadata.initial_timestamp(), resolution.as_delta(), rows.start)?;
            let series =
                SingleTimeSeries::from_values(metadata.label(), initial, resolution, array.into_values())?
                    .with_scaling(multiplier);
            TimeSeriesData::Single(if complete {
                series.with_uuid(metadata.time_series_uuid())
            } else {
                series
            })
        }
        TimeSeriesMetadata::Deterministic(m) => {
            let first = offset(metadata.initial_timestamp(), m.interval(), rows.start)?;
            let windows = initial_times(first, m.interval(), rows.len())?
                .into_iter()
                .zip(array.iter_rows().map(<[f64]>::to_vec));
            let forecast = Deterministic::from_rows(metadata.label(), windows, metadata.resolution())?
                .with_scaling(multiplier);
            TimeSeriesData::Deterministic(if complete {
                forecast.with_uuid(metadata.time_series_uuid())
            } else {
                forecast
            })
        }
    };
    Ok(data)
}

// ------------- StorageBackend -------------
/// Capabilities every storage backend provides.
///
/// Implementors supply the array primitives; the time-series operations are
/// provided methods built on them.
pub trait StorageBackend {
    /// Stores a new array with its first owner. The reference must be absent.
    fn store_array(&mut self, reference: Uuid, owner: &str, array: &SeriesArray) -> Result<()>;
    fn has_array(&self, reference: Uuid) -> Result<bool>;
    /// `(rows, columns)` of a stored array.
    fn array_shape(&self, reference: Uuid) -> Result<(usize, usize)>;
    fn owners(&self, reference: Uuid) -> Result<Vec<String>>;
    fn add_owner(&mut self, reference: Uuid, owner: &str) -> Result<()>;
    /// Removes one owner and returns how many remain. The array itself is
    /// deleted once none remain.
    fn remove_owner(&mut self, reference: Uuid, owner: &str) -> Result<usize>;
    fn read_rows(&self, reference: Uuid, rows: Range<usize>) -> Result<SeriesArray>;
    fn references(&self) -> Result<Vec<Uuid>>;
    fn clear(&mut self) -> Result<()>;
    fn num_arrays(&self) -> Result<usize>;
    fn is_read_only(&self) -> bool;

    fn check_read_only(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(SeriesError::ReadOnly(
                "the time series storage was opened read-only".to_string(),
            ));
        }
        Ok(())
    }
    fn reference_count(&self, reference: Uuid) -> Result<usize> {
        if !self.has_array(reference)? {
            return Err(SeriesError::NotFound(format!("no time series stored under {reference}")));
        }
        Ok(self.owners(reference)?.len())
    }
    /// Stores the values of a series for one owner. Values already stored
    /// under the same reference are shared and only gain an owner.
    fn serialize_time_series(
        &mut self,
        metadata: &TimeSeriesMetadata,
        owner: Uuid,
        array: &SeriesArray,
    ) -> Result<()> {
        self.check_read_only()?;
        let shape = (array.rows(), array.columns());
        if shape != metadata.shape() {
            return Err(SeriesError::DataFormat(format!(
                "array of shape {shape:?} does not match the {:?} described for '{}'",
                metadata.shape(),
                metadata.label()
            )));
        }
        let name = make_component_name(owner, metadata.label())?;
        let reference = metadata.time_series_uuid();
        if self.has_array(reference)? {
            if self.array_shape(reference)? != shape {
                return Err(SeriesError::DataFormat(format!(
                    "{reference} is already stored with another shape"
                )));
            }
            self.attach_owner(reference, &name)
        } else {
            self.store_array(reference, &name, array)?;
            debug!(%reference, owner = %name, rows = shape.0, columns = shape.1, "stored time series");
            Ok(())
        }
    }
    fn add_time_series_reference(&mut self, owner: Uuid, label: &str, reference: Uuid) -> Result<()> {
        self.check_read_only()?;
        if !self.has_array(reference)? {
            return Err(SeriesError::NotFound(format!("no time series stored under {reference}")));
        }
        let name = make_component_name(owner, label)?;
        self.attach_owner(reference, &name)
    }
    #[doc(hidden)]
    fn attach_owner(&mut self, reference: Uuid, name: &str) -> Result<()> {
        if self.owners(reference)?.iter().any(|o| o == name) {
            return Err(SeriesError::DuplicateKey(format!(
                "{name} already references {reference}"
            )));
        }
        self.add_owner(reference, name)?;
        debug!(%reference, owner = %name, "added time series reference");
        Ok(())
    }
    fn remove_time_series(&mut self, reference: Uuid, owner: Uuid, label: &str) -> Result<()> {
        self.check_read_only()?;
        let name = make_component_name(owner, label)?;
        let remaining = self.remove_owner(reference, &name)?;
        if remaining == 0 {
            debug!(%reference, "deleted time series without owners");
        } else {
            debug!(%reference, owner = %name, remaining, "removed time series reference");
        }
        Ok(())
    }
    fn deserialize_time_series(
        &self,
        metadata: &TimeSeriesMetadata,
        selection: Selection,
    ) -> Result<TimeSeriesData> {
        let rows = selection.rows(metadata)?;
        let reference = metadata.time_series_uuid();
        if self.array_shape(reference)? != metadata.shape() {
            return Err(SeriesError::DataCorruption {
                message: format!("stored shape of {reference} disagrees with its metadata"),
            });
        }
        let array = self.read_rows(reference, rows.clone())?;
        materialize(metadata, rows, array)
    }
    fn clear_time_series(&mut self) -> Result<()> {
        self.check_read_only()?;
        self.clear()
    }
    fn get_num_time_series(&self) -> Result<usize> {
        self.num_arrays()
    }
}

// ------------- TimeSeriesStorage -------------
/// The closed set of backends a system can hold.
#[derive(Debug)]
pub enum TimeSeriesStorage {
    InMemory(InMemoryStorage),
    File(FileStorage),
}

pub type SharedStorage = Arc<Mutex<TimeSeriesStorage>>;

macro_rules! dispatch {
    ($self:ident, $backend:ident => $body:expr) => {
        match $self {
            TimeSeriesStorage::InMemory($backend) => $body,
            TimeSeriesStorage::File($backend) => $body,
        }
    };
}

impl TimeSeriesStorage {
    pub fn in_memory() -> Self {
        TimeSeriesStorage::InMemory(InMemoryStorage::new())
    }
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }
    pub fn kind(&self) -> &'static str {
        match self {
            TimeSeriesStorage::InMemory(_) => "memory",
            TimeSeriesStorage::File(_) => "file",
        }
    }
    /// Writes the stored arrays to a durable file at `destination`.
    ///
    /// A file backend copies its backing file as is. An in-memory backend
    /// builds a new file and writes every array and owner into it.
    pub fn serialize<P: AsRef<Path>>(&self, destination: P) -> Result<()> {
        let destination = destination.as_ref();
        match self {
            TimeSeriesStorage::File(file) => file.copy_to(destination),
            TimeSeriesStorage::InMemory(memory) => {
                let options = FileOptions {
                    compression: memory.compression(),
                    ..FileOptions::default()
                };
                let mut file = FileStorage::open(destination, FileMode::CreateNew, options)?;
                for reference in memory.references()? {
                    let owners = memory.owners(reference)?;
                    let Some((first, rest)) = owners.split_first() else {
                        warn!(%reference, "skipping time series without owners");
                        continue;
                    };
                    let (rows, _) = memory.array_shape(reference)?;
                    file.store_array(reference, first, &memory.read_rows(reference, 0..rows)?)?;
                    for owner in rest {
                        file.add_owner(reference, owner)?;
                    }
                }
                info!(destination = %destination.display(), arrays = memory.num_arrays()?, "wrote in-memory time series to file");
                file.close()
            }
        }
    }
}

impl StorageBackend for TimeSeriesStorage {
    fn store_array(&mut self, reference: Uuid, owner: &str, array: &SeriesArray) -> Result<()> {
        dispatch!(self, backend => backend.store_array(reference, owner, array))
    }
    fn has_array(&self, reference: Uuid) -> Result<bool> {
        dispatch!(self, backend => backend.has_array(reference))
    }
    fn array_shape(&self, reference: Uuid) -> Result<(usize, usize)> {
        dispatch!(self, backend => backend.array_shape(reference))
    }
    fn owners(&self, reference: Uuid) -> Result<Vec<String>> {
        dispatch!(self, backend => backend.owners(reference))
    }
    fn add_owner(&mut self, reference: Uuid, owner: &str) -> Result<()> {
        dispatch!(self, backend => backend.add_owner(reference, owner))
    }
    fn remove_owner(&mut self, reference: Uuid, owner: &str) -> Result<usize> {
        dispatch!(self, backend => backend.remove_owner(reference, owner))
    }
    fn read_rows(&self, reference: Uuid, rows: Range<usize>) -> Result<SeriesArray> {
        dispatch!(self, backend => backend.read_rows(reference, rows))
    }
    fn references(&self) -> Result<Vec<Uuid>> {
        dispatch!(self, backend => backend.references())
    }
    fn clear(&mut self) -> Result<()> {
        dispatch!(self, backend => backend.clear())
    }
    fn num_arrays(&self) -> Result<usize> {
        dispatch!(self, backend => backend.num_arrays())
    }
    fn is_read_only(&self) -> bool {
        dispatch!(self, backend => backend.is_read_only())
    }
}

impl From<InMemoryStorage> for TimeSeriesStorage {
    fn from(storage: InMemoryStorage) -> Self {
        TimeSeriesStorage::InMemory(storage)
    }
}
impl From<FileStorage> for TimeSeriesStorage {
    fn from(storage: FileStorage) -> Self {
        TimeSeriesStorage::File(storage)
    }
}
