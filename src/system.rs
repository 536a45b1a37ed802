//! The collection layer: components grouped by concrete type, all sharing one
//! time series storage.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::component::Component;
use crate::config::Config;
use crate::container::TimeSeriesContainer;
use crate::datatype::SeriesArray;
use crate::error::{Result, SeriesError};
use crate::metadata::{TimeSeriesData, TimeSeriesKey, TimeSeriesMetadata, TimeSeriesType};
use crate::storage::{OtherHasher, Selection, SharedStorage, StorageBackend, TimeSeriesStorage};

type ComponentsByName = BTreeMap<String, Box<dyn Component>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimeSeriesCounts {
    pub components_with_time_series: usize,
    pub single_time_series: usize,
    pub forecasts: usize,
    pub stored_arrays: usize,
}

#[derive(Serialize)]
struct ComponentRecord<'a> {
    name: &'a str,
    uuid: Uuid,
    time_series: Vec<TimeSeriesMetadata>,
}

pub struct System {
    components: HashMap<TypeId, ComponentsByName, OtherHasher>,
    uuids: HashSet<Uuid, OtherHasher>,
    storage: SharedStorage,
}

impl System {
    pub fn new(storage: TimeSeriesStorage) -> Self {
        info!(backend = storage.kind(), "created system");
        Self {
            components: HashMap::default(),
            uuids: HashSet::default(),
            storage: storage.into_shared(),
        }
    }
    pub fn in_memory() -> Self {
        Self::new(TimeSeriesStorage::in_memory())
    }
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.storage.open()?))
    }
    pub fn storage(&self) -> SharedStorage {
        Arc::clone(&self.storage)
    }

    // ------------- Components -------------
    /// Adds a component and binds its container, if it has one, to the
    /// system's storage. Names are unique per type and UUIDs across the system.
    pub fn add_component<C: Component>(&mut self, mut component: C) -> Result<()> {
        let uuid = component.uuid();
        if self.uuids.contains(&uuid) {
            return Err(SeriesError::DuplicateKey(format!("a component with uuid {uuid} exists")));
        }
        let name = component.name().to_string();
        if self
            .components
            .get(&TypeId::of::<C>())
            .is_some_and(|by_name| by_name.contains_key(&name))
        {
            return Err(SeriesError::DuplicateKey(format!(
                "a {} named '{name}' exists",
                std::any::type_name::<C>()
            )));
        }
        if let Some(container) = component.time_series_container_mut() {
            if !container.is_empty() {
                return Err(SeriesError::OwnershipConflict(format!(
                    "'{name}' arrives with time series whose values are not in this system"
                )));
            }
            container.set_time_series_storage(Some(self.storage()))?;
        }
        self.components
            .entry(TypeId::of::<C>())
            .or_default()
            .insert(name.clone(), Box::new(component));
        self.uuids.insert(uuid);
        debug!(%name, %uuid, "added component");
        Ok(())
    }
    pub fn get_component<C: Component>(&self, name: &str) -> Option<&C> {
        self.components
            .get(&TypeId::of::<C>())?
            .get(name)
            .and_then(|c| (**c).as_any().downcast_ref::<C>())
    }
    pub fn get_component_mut<C: Component>(&mut self, name: &str) -> Option<&mut C> {
        self.components
            .get_mut(&TypeId::of::<C>())?
            .get_mut(name)
            .and_then(|c| (**c).as_any_mut().downcast_mut::<C>())
    }
    /// Removes a component, first deleting its references to stored values.
    pub fn remove_component<C: Component>(&mut self, name: &str) -> Result<C> {
        let storage = Arc::clone(&self.storage);
        let component = self.component_dyn_mut(TypeId::of::<C>(), name)?;
        let uuid = component.uuid();
        if let Some(container) = component.time_series_container_mut() {
            let mut storage = storage.lock()?;
            // entries leave the container as soon as storage lets go of them
            let keys: Vec<TimeSeriesKey> = container.keys().cloned().collect();
            for key in keys {
                let reference = container
                    .get_time_series(key.time_series_type(), key.label())?
                    .time_series_uuid();
                storage.remove_time_series(reference, uuid, key.label())?;
                container.remove_time_series(key.time_series_type(), key.label())?;
            }
            container.set_time_series_storage(None)?;
        }
        let boxed = self
            .components
            .get_mut(&TypeId::of::<C>())
            .and_then(|by_name| by_name.remove(name))
            .ok_or_else(|| SeriesError::Invariant(format!("'{name}' vanished during removal")))?;
        self.uuids.remove(&uuid);
        debug!(%name, %uuid, "removed component");
        boxed
            .into_any()
            .downcast::<C>()
            .map(|c| *c)
            .map_err(|_| SeriesError::Invariant(format!("'{name}' is stored under the wrong type")))
    }
    pub fn iter_components<C: Component>(&self) -> impl Iterator<Item = &C> {
        self.components
            .get(&TypeId::of::<C>())
            .into_iter()
            .flat_map(|by_name| by_name.values())
            .filter_map(|c| (**c).as_any().downcast_ref::<C>())
    }
    pub fn component_count(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }
    fn component_dyn(&self, type_id: TypeId, name: &str) -> Result<&dyn Component> {
        self.components
            .get(&type_id)
            .and_then(|by_name| by_name.get(name))
            .map(|c| &**c)
            .ok_or_else(|| SeriesError::NotFound(format!("no component named '{name}'")))
    }
    fn component_dyn_mut(&mut self, type_id: TypeId, name: &str) -> Result<&mut dyn Component> {
        match self.components.get_mut(&type_id).and_then(|by_name| by_name.get_mut(name)) {
            Some(component) => Ok(&mut **component),
            None => Err(SeriesError::NotFound(format!("no component named '{name}'"))),
        }
    }

    // ------------- Time series -------------
    pub fn add_time_series<C: Component>(&mut self, name: &str, data: impl Into<TimeSeriesData>) -> Result<()> {
        self.add_time_series_shared::<C>(&[name], data)
    }
    /// Attaches one series to several components of type `C`. The values are
    /// stored once and every component becomes an owner of them.
    pub fn add_time_series_shared<C: Component>(
        &mut self,
        names: &[&str],
        data: impl Into<TimeSeriesData>,
    ) -> Result<()> {
        let data = data.into();
        let metadata = data.metadata();
        let type_id = TypeId::of::<C>();
        let unique: BTreeSet<&str> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(SeriesError::DuplicateKey(format!(
                "'{}' would be attached to the same component twice",
                data.label()
            )));
        }
        for name in names {
            let component = self.component_dyn(type_id, name)?;
            let container = container_of(component)?;
            if container.has_time_series(metadata.time_series_type(), metadata.label()) {
                return Err(SeriesError::DuplicateKey(format!(
                    "'{name}' already has {}",
                    metadata.key()
                )));
            }
        }
        let array = data.to_array();
        let storage = Arc::clone(&self.storage);
        for name in names {
            let component = self.component_dyn_mut(type_id, name)?;
            let uuid = component.uuid();
            storage.lock()?.serialize_time_series(&metadata, uuid, &array)?;
            container_of_mut(component)?.add_time_series(metadata.clone(), false)?;
        }
        info!(key = %metadata.key(), owners = names.len(), reference = %metadata.time_series_uuid(), "added time series");
        Ok(())
    }
    pub fn remove_time_series<C: Component>(
        &mut self,
        name: &str,
        time_series_type: TimeSeriesType,
        label: &str,
    ) -> Result<()> {
        let storage = Arc::clone(&self.storage);
        let component = self.component_dyn_mut(TypeId::of::<C>(), name)?;
        let uuid = component.uuid();
        let container = container_of_mut(component)?;
        let reference = container.get_time_series(time_series_type, label)?.time_series_uuid();
        storage.lock()?.remove_time_series(reference, uuid, label)?;
        container.remove_time_series(time_series_type, label)?;
        Ok(())
    }
    /// Renames an attached series, moving the storage reference along with it.
    pub fn rename_time_series<C: Component>(
        &mut self,
        name: &str,
        time_series_type: TimeSeriesType,
        label: &str,
        new_label: &str,
    ) -> Result<()> {
        let storage = Arc::clone(&self.storage);
        let component = self.component_dyn_mut(TypeId::of::<C>(), name)?;
        let uuid = component.uuid();
        let container = container_of_mut(component)?;
        let reference = container.get_time_series(time_series_type, label)?.time_series_uuid();
        if container.has_time_series(time_series_type, new_label) {
            return Err(SeriesError::DuplicateKey(format!("'{name}' already has '{new_label}'")));
        }
        let mut storage = storage.lock()?;
        storage.add_time_series_reference(uuid, new_label, reference)?;
        storage.remove_time_series(reference, uuid, label)?;
        container.rename_time_series(time_series_type, label, new_label)
    }
    pub fn get_time_series_metadata<C: Component>(
        &self,
        name: &str,
        time_series_type: TimeSeriesType,
        label: &str,
    ) -> Result<TimeSeriesMetadata> {
        let component = self.component_dyn(TypeId::of::<C>(), name)?;
        Ok(container_of(component)?.get_time_series(time_series_type, label)?.clone())
    }
    pub fn get_time_series<C: Component>(
        &self,
        name: &str,
        time_series_type: TimeSeriesType,
        label: &str,
        selection: Selection,
    ) -> Result<TimeSeriesData> {
        let component = self.component_dyn(TypeId::of::<C>(), name)?;
        container_of(component)?.read_time_series(time_series_type, label, selection)
    }
    /// Selected values with the series' scaling-factor multiplier applied.
    /// A multiplier the component cannot resolve is an error.
    pub fn get_time_series_values<C: Component>(
        &self,
        name: &str,
        time_series_type: TimeSeriesType,
        label: &str,
        selection: Selection,
    ) -> Result<SeriesArray> {
        let component = self.component_dyn(TypeId::of::<C>(), name)?;
        let data = container_of(component)?.read_time_series(time_series_type, label, selection)?;
        let array = data.to_array();
        let Some(multiplier) = data.metadata().scaling_factor_multiplier().map(str::to_string) else {
            return Ok(array);
        };
        let factor = component.scaling_factor(&multiplier).ok_or_else(|| {
            SeriesError::NotFound(format!(
                "'{name}' has no scaling factor for multiplier '{multiplier}'"
            ))
        })?;
        let (rows, columns) = (array.rows(), array.columns());
        let scaled = array.into_values().into_iter().map(|v| v * factor).collect();
        SeriesArray::matrix(rows, columns, scaled)
    }
    /// Deletes every stored array and empties every container.
    pub fn clear_time_series(&mut self) -> Result<()> {
        self.storage.lock()?.clear_time_series()?;
        for component in self.components.values_mut().flat_map(|by_name| by_name.values_mut()) {
            if let Some(container) = component.time_series_container_mut() {
                container.clear_time_series();
            }
        }
        info!("cleared all time series");
        Ok(())
    }

    // ------------- Summaries -------------
    fn containers(&self) -> impl Iterator<Item = (&dyn Component, &TimeSeriesContainer)> {
        self.components
            .values()
            .flat_map(|by_name| by_name.values())
            .filter_map(|c| c.time_series_container().map(|container| (&**c, container)))
    }
    pub fn time_series_counts(&self) -> Result<TimeSeriesCounts> {
        let mut counts = TimeSeriesCounts {
            stored_arrays: self.storage.lock()?.get_num_time_series()?,
            ..TimeSeriesCounts::default()
        };
        for (_, container) in self.containers().filter(|(_, c)| !c.is_empty()) {
            counts.components_with_time_series += 1;
            for metadata in container.iter() {
                match metadata.time_series_type() {
                    TimeSeriesType::SingleTimeSeries => counts.single_time_series += 1,
                    TimeSeriesType::Deterministic => counts.forecasts += 1,
                }
            }
        }
        Ok(counts)
    }
    /// Checks that all single series share resolution, initial timestamp and
    /// length, and that all forecasts share issue times, horizon and resolution.
    pub fn check_time_series_consistency(&self) -> Result<()> {
        let mut singles: BTreeSet<(i64, NaiveDateTime, usize)> = BTreeSet::new();
        let mut forecasts: BTreeSet<(i64, Vec<NaiveDateTime>, usize)> = BTreeSet::new();
        for (_, container) in self.containers() {
            for metadata in container.iter() {
                let resolution = metadata.resolution().num_milliseconds();
                match metadata {
                    TimeSeriesMetadata::SingleTimeSeries(m) => {
                        singles.insert((resolution, metadata.initial_timestamp(), m.length()));
                    }
                    TimeSeriesMetadata::Deterministic(m) => {
                        forecasts.insert((resolution, m.initial_times()?, m.horizon()));
                    }
                }
            }
        }
        if singles.len() > 1 {
            return Err(SeriesError::DataFormat(format!(
                "single time series disagree on resolution, initial timestamp or length ({} variants)",
                singles.len()
            )));
        }
        if forecasts.len() > 1 {
            return Err(SeriesError::DataFormat(format!(
                "forecasts disagree on issue times, horizon or resolution ({} variants)",
                forecasts.len()
            )));
        }
        Ok(())
    }
    pub fn serialize_storage<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.storage.lock()?.serialize(path)
    }
    /// Every component's time series metadata as JSON.
    pub fn serialize_components_metadata(&self) -> Result<String> {
        let mut records: Vec<ComponentRecord> = self
            .containers()
            .map(|(component, container)| ComponentRecord {
                name: component.name(),
                uuid: component.uuid(),
                time_series: container.serialize(),
            })
            .collect();
        records.sort_by_key(|r| r.uuid);
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

fn container_of(component: &dyn Component) -> Result<&TimeSeriesContainer> {
    let name = component.name().to_string();
    component
        .time_series_container()
        .ok_or_else(|| SeriesError::NotFound(format!("'{name}' does not support time series")))
}

fn container_of_mut(component: &mut dyn Component) -> Result<&mut TimeSeriesContainer> {
    let name = component.name().to_string();
    component
        .time_series_container_mut()
        .ok_or_else(|| SeriesError::NotFound(format!("'{name}' does not support time series")))
}
