use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::warn;

use crate::error::{Result, SeriesError};
use crate::metadata::{TimeSeriesData, TimeSeriesKey, TimeSeriesMetadata, TimeSeriesType};
use crate::storage::{Selection, SharedStorage, StorageBackend};

/// The time series metadata held by one component, keyed by type and label,
/// plus the storage the values live in once the component joins a system.
#[derive(Default)]
pub struct TimeSeriesContainer {
    data: BTreeMap<TimeSeriesKey, TimeSeriesMetadata>,
    storage: Option<SharedStorage>,
}

impl fmt::Debug for TimeSeriesContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSeriesContainer")
            .field("data", &self.data)
            .field("attached", &self.storage.is_some())
            .finish()
    }
}

impl TimeSeriesContainer {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds metadata under its `(type, label)` key. An existing key is an
    /// error unless `skip_if_present` is set, in which case the call logs and
    /// leaves the container unchanged.
    pub fn add_time_series(&mut self, metadata: TimeSeriesMetadata, skip_if_present: bool) -> Result<()> {
        let key = metadata.key();
        if self.data.contains_key(&key) {
            if skip_if_present {
                warn!(%key, "time series is already present, skipping");
                return Ok(());
            }
            return Err(SeriesError::DuplicateKey(format!("{key} is already attached")));
        }
        self.data.insert(key, metadata);
        Ok(())
    }
    pub fn remove_time_series(&mut self, time_series_type: TimeSeriesType, label: &str) -> Result<TimeSeriesMetadata> {
        let key = TimeSeriesKey::new(time_series_type, label);
        self.data
            .remove(&key)
            .ok_or_else(|| SeriesError::NotFound(format!("{key} is not attached")))
    }
    pub fn get_time_series(&self, time_series_type: TimeSeriesType, label: &str) -> Result<&TimeSeriesMetadata> {
        let key = TimeSeriesKey::new(time_series_type, label);
        self.data
            .get(&key)
            .ok_or_else(|| SeriesError::NotFound(format!("{key} is not attached")))
    }
    pub fn has_time_series(&self, time_series_type: TimeSeriesType, label: &str) -> bool {
        self.data.contains_key(&TimeSeriesKey::new(time_series_type, label))
    }
    pub fn rename_time_series(
        &mut self,
        time_series_type: TimeSeriesType,
        label: &str,
        new_label: &str,
    ) -> Result<()> {
        let new_key = TimeSeriesKey::new(time_series_type, new_label);
        if self.data.contains_key(&new_key) {
            return Err(SeriesError::DuplicateKey(format!("{new_key} is already attached")));
        }
        let mut metadata = self.remove_time_series(time_series_type, label)?;
        metadata.set_label(new_label.to_string());
        self.data.insert(new_key, metadata);
        Ok(())
    }
    pub fn keys(&self) -> impl Iterator<Item = &TimeSeriesKey> {
        self.data.keys()
    }
    pub fn iter(&self) -> impl Iterator<Item = &TimeSeriesMetadata> {
        self.data.values()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Drops every entry and hands back what was held. Stored values are not touched.
    pub fn clear_time_series(&mut self) -> Vec<TimeSeriesMetadata> {
        std::mem::take(&mut self.data).into_values().collect()
    }

    // ------------- Initial times -------------
    /// Sorted, deduplicated forecast issue times across all entries.
    pub fn get_time_series_initial_times(&self) -> Result<Vec<NaiveDateTime>> {
        collect_initial_times(self.data.values())
    }
    pub fn get_time_series_initial_times_by_type(
        &self,
        time_series_type: TimeSeriesType,
    ) -> Result<Vec<NaiveDateTime>> {
        collect_initial_times(
            self.data
                .values()
                .filter(|m| m.time_series_type() == time_series_type),
        )
    }
    pub fn get_time_series_initial_times_by_label(
        &self,
        time_series_type: TimeSeriesType,
        label: &str,
    ) -> Result<Vec<NaiveDateTime>> {
        collect_initial_times(
            self.data
                .get(&TimeSeriesKey::new(time_series_type, label))
                .into_iter(),
        )
    }

    // ------------- Storage -------------
    pub fn time_series_storage(&self) -> Option<&SharedStorage> {
        self.storage.as_ref()
    }
    /// Attaches or detaches the storage. Attaching while another storage is
    /// attached is an ownership conflict; re-attaching the same one is allowed.
    pub fn set_time_series_storage(&mut self, storage: Option<SharedStorage>) -> Result<()> {
        match (&self.storage, &storage) {
            (Some(current), Some(new)) if !Arc::ptr_eq(current, new) => {
                Err(SeriesError::OwnershipConflict(
                    "the time series container is already attached to a storage".to_string(),
                ))
            }
            _ => {
                self.storage = storage;
                Ok(())
            }
        }
    }
    /// Reads the selected part of an attached series from the storage.
    pub fn read_time_series(
        &self,
        time_series_type: TimeSeriesType,
        label: &str,
        selection: Selection,
    ) -> Result<TimeSeriesData> {
        let metadata = self.get_time_series(time_series_type, label)?;
        let storage = self.storage.as_ref().ok_or_else(|| {
            SeriesError::NotFound(format!("no storage holds the values of '{label}'"))
        })?;
        let storage = storage.lock()?;
        storage.deserialize_time_series(metadata, selection)
    }

    // ------------- Serialization -------------
    /// Flat records in key order.
    pub fn serialize(&self) -> Vec<TimeSeriesMetadata> {
        self.data.values().cloned().collect()
    }
    pub fn deserialize<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = TimeSeriesMetadata>,
    {
        let mut container = Self::new();
        for metadata in records {
            container.add_time_series(metadata, false)?;
        }
        Ok(container)
    }
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.serialize())?)
    }
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<TimeSeriesMetadata> = serde_json::from_str(json)?;
        Self::deserialize(records)
    }
}

fn collect_initial_times<'a, I>(metadata: I) -> Result<Vec<NaiveDateTime>>
where
    I: Iterator<Item = &'a TimeSeriesMetadata>,
{
    let mut times = Vec::new();
    for m in metadata {
        times.extend(m.initial_times()?);
    }
    times.sort();
    times.dedup();
    Ok(times)
}
