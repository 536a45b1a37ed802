mod common;

use common::{Bus, Line, at, forecast, ramp};
use seriesclad::SeriesError;
use seriesclad::config::{Config, StorageConfig};
use seriesclad::metadata::TimeSeriesType;
use seriesclad::persist::{FileMode, FileOptions, FileStorage};
use seriesclad::storage::{Selection, StorageBackend};
use seriesclad::system::System;
use tempfile::TempDir;

fn setup() -> System {
    let mut system = System::in_memory();
    for name in ["bus1", "bus2", "bus3"] {
        system.add_component(Bus::new(name)).expect("bus");
    }
    system.add_component(Line::new("line1")).expect("line");
    system
}

#[test]
fn components_are_unique_by_name_and_uuid() {
    let mut system = setup();
    assert_eq!(system.component_count(), 4);
    assert!(matches!(
        system.add_component(Bus::new("bus1")),
        Err(SeriesError::DuplicateKey(_))
    ));
    // the same name under another type is fine
    system.add_component(Line::new("bus1")).expect("line named bus1");
    let uuid = system.get_component::<Bus>("bus2").expect("bus2").uuid;
    let mut clone = Bus::new("bus4");
    clone.uuid = uuid;
    assert!(matches!(system.add_component(clone), Err(SeriesError::DuplicateKey(_))));
    assert_eq!(system.iter_components::<Bus>().count(), 3);
    assert!(system.get_component::<Line>("bus2").is_none());
}

#[test]
fn attached_series_read_back_through_the_system() {
    let mut system = setup();
    let series = ramp("demand", 24);
    system.add_time_series::<Bus>("bus1", series.clone()).expect("attached");
    let metadata = system
        .get_time_series_metadata::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "demand")
        .expect("metadata");
    assert_eq!(metadata.time_series_uuid(), series.uuid());
    let read = system
        .get_time_series::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "demand", Selection::All)
        .expect("read")
        .into_single()
        .expect("single");
    assert_eq!(read, series);
    let head = system
        .get_time_series::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "demand", Selection::Head(4))
        .expect("head");
    assert_eq!(head.as_single().expect("single").len(), 4);
    assert!(matches!(
        system.add_time_series::<Bus>("bus1", ramp("demand", 3)),
        Err(SeriesError::DuplicateKey(_))
    ));
    assert!(matches!(
        system.add_time_series::<Line>("line1", ramp("demand", 3)),
        Err(SeriesError::NotFound(_))
    ));
    assert!(matches!(
        system.add_time_series::<Bus>("nowhere", ramp("demand", 3)),
        Err(SeriesError::NotFound(_))
    ));
}

#[test]
fn shared_series_are_stored_once() {
    let mut system = setup();
    let shared = forecast("load", 4, 6);
    let reference = shared.uuid();
    system
        .add_time_series_shared::<Bus>(&["bus1", "bus2", "bus3"], shared)
        .expect("shared");
    let storage = system.storage();
    assert_eq!(storage.lock().expect("lock").get_num_time_series().expect("count"), 1);
    assert_eq!(storage.lock().expect("lock").reference_count(reference).expect("refs"), 3);

    system
        .remove_time_series::<Bus>("bus1", TimeSeriesType::Deterministic, "load")
        .expect("removed from bus1");
    assert_eq!(storage.lock().expect("lock").reference_count(reference).expect("refs"), 2);
    let window = system
        .get_time_series::<Bus>("bus2", TimeSeriesType::Deterministic, "load", Selection::Window(2))
        .expect("still readable")
        .into_deterministic()
        .expect("forecast");
    assert_eq!(window.get_window(at(2)).expect("window").1[0], 200.0);

    let removed = system.remove_component::<Bus>("bus2").expect("bus2");
    assert!(removed.series.is_empty());
    assert_eq!(storage.lock().expect("lock").reference_count(reference).expect("refs"), 1);
    system.remove_component::<Bus>("bus3").expect("bus3");
    assert_eq!(storage.lock().expect("lock").get_num_time_series().expect("count"), 0);
    assert_eq!(system.component_count(), 2);
}

#[test]
fn removing_a_component_cascades_to_storage() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("demand", 8)).expect("single");
    system.add_time_series::<Bus>("bus1", forecast("load", 2, 2)).expect("forecast");
    system.add_time_series::<Bus>("bus2", ramp("demand", 8)).expect("other bus");
    let storage = system.storage();
    assert_eq!(storage.lock().expect("lock").get_num_time_series().expect("count"), 3);
    system.remove_component::<Bus>("bus1").expect("removed");
    assert_eq!(storage.lock().expect("lock").get_num_time_series().expect("count"), 1);
    assert!(system.get_component::<Bus>("bus1").is_none());
    assert!(matches!(
        system.remove_component::<Bus>("bus1"),
        Err(SeriesError::NotFound(_))
    ));
}

#[test]
fn interrupted_removal_keeps_container_and_storage_in_step() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("a", 4)).expect("a");
    system.add_time_series::<Bus>("bus1", ramp("b", 4)).expect("b");
    let bus_uuid = system.get_component::<Bus>("bus1").expect("bus1").uuid;
    let b = system
        .get_time_series_metadata::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "b")
        .expect("b metadata");
    let storage = system.storage();
    storage
        .lock()
        .expect("lock")
        .remove_time_series(b.time_series_uuid(), bus_uuid, "b")
        .expect("released behind the system's back");

    assert!(matches!(
        system.remove_component::<Bus>("bus1"),
        Err(SeriesError::NotFound(_))
    ));
    assert_eq!(storage.lock().expect("lock").get_num_time_series().expect("count"), 0);
    assert!(matches!(
        system.get_time_series_metadata::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "a"),
        Err(SeriesError::NotFound(_))
    ));
    system
        .get_time_series_metadata::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "b")
        .expect("b is still listed");
}

#[test]
fn removed_component_can_join_another_system() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("demand", 8)).expect("single");
    let bus = system.remove_component::<Bus>("bus1").expect("removed");
    let mut other = System::in_memory();
    other.add_component(bus).expect("rebound");
    other.add_time_series::<Bus>("bus1", ramp("demand", 8)).expect("attached again");
}

#[test]
fn scaling_factor_multiplier_is_applied() {
    let mut system = setup();
    let series = ramp("max_power", 4).with_scaling_factor_multiplier("base_power");
    system.add_time_series::<Bus>("bus1", series).expect("attached");
    system.get_component_mut::<Bus>("bus1").expect("bus1").base_power = 10.0;
    let values = system
        .get_time_series_values::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "max_power", Selection::All)
        .expect("values");
    assert_eq!(values.values(), &[0.0, 5.0, 10.0, 15.0]);

    let unknown = ramp("other", 4).with_scaling_factor_multiplier("rating");
    system.add_time_series::<Bus>("bus1", unknown).expect("attached");
    assert!(matches!(
        system.get_time_series_values::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "other", Selection::All),
        Err(SeriesError::NotFound(_))
    ));
}

#[test]
fn rename_moves_the_storage_reference() {
    let mut system = setup();
    let series = ramp("demand", 4);
    let reference = series.uuid();
    system.add_time_series::<Bus>("bus1", series).expect("attached");
    system
        .rename_time_series::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "demand", "load")
        .expect("renamed");
    let storage = system.storage();
    let owners = storage.lock().expect("lock").owners(reference).expect("owners");
    assert_eq!(owners.len(), 1);
    assert!(owners[0].ends_with("__load"));
    let read = system
        .get_time_series::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "load", Selection::All)
        .expect("read");
    assert_eq!(read.label(), "load");
}

#[test]
fn clearing_empties_storage_and_containers() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("demand", 4)).expect("single");
    system.add_time_series::<Bus>("bus2", forecast("load", 2, 2)).expect("forecast");
    system.clear_time_series().expect("cleared");
    let counts = system.time_series_counts().expect("counts");
    assert_eq!(counts.stored_arrays, 0);
    assert_eq!(counts.components_with_time_series, 0);
    assert!(system.get_component::<Bus>("bus1").expect("bus1").series.is_empty());
}

#[test]
fn counts_and_consistency() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("demand", 6)).expect("a");
    system.add_time_series::<Bus>("bus2", ramp("demand", 6)).expect("b");
    system
        .add_time_series_shared::<Bus>(&["bus1", "bus2"], forecast("load", 3, 2))
        .expect("shared");
    let counts = system.time_series_counts().expect("counts");
    assert_eq!(counts.components_with_time_series, 2);
    assert_eq!(counts.single_time_series, 2);
    assert_eq!(counts.forecasts, 2);
    assert_eq!(counts.stored_arrays, 3);
    system.check_time_series_consistency().expect("consistent");

    system.add_time_series::<Bus>("bus3", ramp("demand", 7)).expect("longer");
    assert!(matches!(
        system.check_time_series_consistency(),
        Err(SeriesError::DataFormat(_))
    ));
}

#[test]
fn component_metadata_serializes_as_json() {
    let mut system = setup();
    system.add_time_series::<Bus>("bus1", ramp("demand", 6)).expect("a");
    let json = system.serialize_components_metadata().expect("json");
    let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    let records = parsed.as_array().expect("array");
    assert_eq!(records.len(), 3);
    let bus1 = records
        .iter()
        .find(|r| r["name"] == "bus1")
        .expect("bus1 record");
    assert_eq!(bus1["time_series"][0]["type"], "SingleTimeSeries");
    assert_eq!(bus1["time_series"][0]["label"], "demand");
}

#[test]
fn system_storage_round_trips_through_a_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("system.db");
    let mut system = setup();
    let series = ramp("demand", 100);
    let windows = forecast("load", 24, 12);
    system.add_time_series::<Bus>("bus1", series.clone()).expect("single");
    system
        .add_time_series_shared::<Bus>(&["bus1", "bus2"], windows.clone())
        .expect("shared");
    system.serialize_storage(&path).expect("serialized");

    let metadata = system
        .get_time_series_metadata::<Bus>("bus1", TimeSeriesType::Deterministic, "load")
        .expect("metadata");
    let file = FileStorage::open(&path, FileMode::ReadOnly, FileOptions::default()).expect("reopened");
    let read = file
        .deserialize_time_series(&metadata, Selection::All)
        .expect("read")
        .into_deterministic()
        .expect("forecast");
    assert_eq!(read, windows);
    assert_eq!(file.reference_count(windows.uuid()).expect("refs"), 2);
    assert_eq!(file.reference_count(series.uuid()).expect("refs"), 1);
}

#[test]
fn system_from_config_uses_a_file_backend() {
    let dir = TempDir::new().expect("temp dir");
    let config = Config {
        storage: StorageConfig {
            backend: "file".to_string(),
            directory: Some(dir.path().to_path_buf()),
            ..StorageConfig::default()
        },
    };
    let mut system = System::from_config(&config).expect("system");
    system.add_component(Bus::new("bus1")).expect("bus");
    system.add_time_series::<Bus>("bus1", ramp("demand", 10)).expect("attached");
    let tail = system
        .get_time_series::<Bus>("bus1", TimeSeriesType::SingleTimeSeries, "demand", Selection::Tail(2))
        .expect("tail");
    assert_eq!(tail.as_single().expect("single").values(), &[4.0, 4.5]);
    assert_eq!(system.storage().lock().expect("lock").kind(), "file");
}
