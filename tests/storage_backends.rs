mod common;

use common::{at, forecast, ramp};
use seriesclad::SeriesError;
use seriesclad::compression::CompressionSettings;
use seriesclad::datatype::SeriesArray;
use seriesclad::memory::InMemoryStorage;
use seriesclad::metadata::TimeSeriesData;
use seriesclad::persist::{FileMode, FileOptions, FileStorage};
use seriesclad::storage::{
    Selection, StorageBackend, TimeSeriesStorage, deserialize_component_name, make_component_name,
};
use tempfile::TempDir;
use uuid::Uuid;

fn backends(dir: &TempDir) -> Vec<TimeSeriesStorage> {
    let options = FileOptions {
        compression: CompressionSettings::zstd(3, true).expect("zstd"),
        chunk_rows: 4,
    };
    vec![
        TimeSeriesStorage::in_memory(),
        FileStorage::open(dir.path().join("plain.db"), FileMode::CreateNew, FileOptions::default())
            .expect("plain file")
            .into(),
        FileStorage::open(dir.path().join("packed.db"), FileMode::CreateNew, options)
            .expect("compressed file")
            .into(),
    ]
}

fn store(storage: &mut TimeSeriesStorage, owner: Uuid, data: &TimeSeriesData) {
    storage
        .serialize_time_series(&data.metadata(), owner, &data.to_array())
        .expect("stored");
}

#[test]
fn component_names_round_trip() {
    let uuid = Uuid::new_v4();
    let name = make_component_name(uuid, "max_active_power").expect("name");
    assert_eq!(name, format!("{uuid}__max_active_power"));
    assert_eq!(
        deserialize_component_name(&name).expect("parsed"),
        (uuid, "max_active_power".to_string())
    );
    assert!(make_component_name(uuid, "bad__label").is_err());
    assert!(deserialize_component_name("not-a-uuid__label").is_err());
    assert!(deserialize_component_name(&format!("{uuid}__a__b")).is_err());
}

#[test]
fn full_reads_are_bit_identical() {
    let dir = TempDir::new().expect("temp dir");
    let owner = Uuid::new_v4();
    let values: Vec<f64> = (0..37).map(|i| (i as f64).sin() * 1e3 + 0.1).collect();
    let single: TimeSeriesData = seriesclad::series::SingleTimeSeries::from_values(
        "demand",
        at(0),
        common::hourly(),
        values.clone(),
    )
    .expect("series")
    .into();
    let windows: TimeSeriesData = forecast("load", 9, 5).into();
    for mut storage in backends(&dir) {
        store(&mut storage, owner, &single);
        store(&mut storage, owner, &windows);
        assert_eq!(storage.get_num_time_series().expect("count"), 2);

        let read = storage
            .deserialize_time_series(&single.metadata(), Selection::All)
            .expect("single");
        assert_eq!(read, single, "{}", storage.kind());
        let read = read.into_single().expect("single");
        assert!(read.values().iter().zip(&values).all(|(a, b)| a.to_bits() == b.to_bits()));

        let read = storage
            .deserialize_time_series(&windows.metadata(), Selection::All)
            .expect("forecast");
        assert_eq!(read, windows, "{}", storage.kind());
    }
}

#[test]
fn partial_reads_touch_only_selected_rows() {
    let dir = TempDir::new().expect("temp dir");
    let owner = Uuid::new_v4();
    let single: TimeSeriesData = ramp("demand", 24).into();
    let windows: TimeSeriesData = forecast("load", 10, 3).into();
    for mut storage in backends(&dir) {
        store(&mut storage, owner, &single);
        store(&mut storage, owner, &windows);
        let metadata = single.metadata();

        let between = storage
            .deserialize_time_series(&metadata, Selection::between(at(5), at(9)))
            .expect("range")
            .into_single()
            .expect("single");
        assert_eq!(between.initial_timestamp(), at(5));
        assert_eq!(between.values(), &[2.5, 3.0, 3.5, 4.0, 4.5]);
        assert_ne!(between.uuid(), metadata.time_series_uuid());

        let tail = storage
            .deserialize_time_series(&metadata, Selection::Tail(3))
            .expect("tail")
            .into_single()
            .expect("single");
        assert_eq!(tail.timestamps(), &[at(21), at(22), at(23)]);

        let clamped = storage
            .deserialize_time_series(&metadata, Selection::from(at(20) - chrono::TimeDelta::minutes(30)))
            .expect("clamped")
            .into_single()
            .expect("single");
        assert_eq!(clamped.initial_timestamp(), at(20));
        assert_eq!(clamped.len(), 4);

        let window = storage
            .deserialize_time_series(&windows.metadata(), Selection::Window(7))
            .expect("window")
            .into_deterministic()
            .expect("forecast");
        assert_eq!(window.count(), 1);
        assert_eq!(window.get_window(at(7)).expect("window").1, &[700.0, 701.0, 702.0]);

        let some = storage
            .deserialize_time_series(&windows.metadata(), Selection::Windows { start: at(3), count: 4 })
            .expect("windows")
            .into_deterministic()
            .expect("forecast");
        assert_eq!(some.initial_times(), vec![at(3), at(4), at(5), at(6)]);
        assert_eq!(some.horizon(), 3);
    }
}

#[test]
fn empty_and_mistyped_selections_fail() {
    let dir = TempDir::new().expect("temp dir");
    let owner = Uuid::new_v4();
    let single: TimeSeriesData = ramp("demand", 6).into();
    let windows: TimeSeriesData = forecast("load", 3, 2).into();
    for mut storage in backends(&dir) {
        store(&mut storage, owner, &single);
        store(&mut storage, owner, &windows);
        assert!(matches!(
            storage.deserialize_time_series(&single.metadata(), Selection::from(at(30))),
            Err(SeriesError::Selection(_))
        ));
        assert!(matches!(
            storage.deserialize_time_series(&single.metadata(), Selection::Head(0)),
            Err(SeriesError::Selection(_))
        ));
        assert!(matches!(
            storage.deserialize_time_series(&single.metadata(), Selection::Window(0)),
            Err(SeriesError::Selection(_))
        ));
        assert!(matches!(
            storage.deserialize_time_series(&windows.metadata(), Selection::Window(3)),
            Err(SeriesError::NotFound(_))
        ));
    }
}

#[test]
fn shared_values_are_reference_counted() {
    let dir = TempDir::new().expect("temp dir");
    let data: TimeSeriesData = ramp("demand", 12).into();
    let reference = data.uuid();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    for mut storage in backends(&dir) {
        store(&mut storage, a, &data);
        storage
            .add_time_series_reference(b, "demand", reference)
            .expect("second owner");
        assert_eq!(storage.reference_count(reference).expect("count"), 2);
        assert!(matches!(
            storage.add_time_series_reference(b, "demand", reference),
            Err(SeriesError::DuplicateKey(_))
        ));
        assert!(matches!(
            storage.add_time_series_reference(b, "demand", Uuid::new_v4()),
            Err(SeriesError::NotFound(_))
        ));

        storage.remove_time_series(reference, a, "demand").expect("first removal");
        assert_eq!(storage.reference_count(reference).expect("count"), 1);
        assert_eq!(
            storage
                .deserialize_time_series(&data.metadata(), Selection::All)
                .expect("still readable"),
            data
        );

        storage.remove_time_series(reference, b, "demand").expect("last removal");
        assert_eq!(storage.get_num_time_series().expect("count"), 0);
        assert!(matches!(
            storage.deserialize_time_series(&data.metadata(), Selection::All),
            Err(SeriesError::NotFound(_))
        ));
        assert!(matches!(
            storage.remove_time_series(reference, b, "demand"),
            Err(SeriesError::NotFound(_))
        ));
    }
}

#[test]
fn storing_the_same_owner_twice_is_a_duplicate() {
    let dir = TempDir::new().expect("temp dir");
    let owner = Uuid::new_v4();
    let data: TimeSeriesData = ramp("demand", 3).into();
    for mut storage in backends(&dir) {
        store(&mut storage, owner, &data);
        assert!(matches!(
            storage.serialize_time_series(&data.metadata(), owner, &data.to_array()),
            Err(SeriesError::DuplicateKey(_))
        ));
        let wrong_shape = SeriesArray::vector(vec![1.0, 2.0]);
        assert!(matches!(
            storage.serialize_time_series(&data.metadata(), Uuid::new_v4(), &wrong_shape),
            Err(SeriesError::DataFormat(_))
        ));
    }
}

#[test]
fn clearing_removes_everything() {
    let dir = TempDir::new().expect("temp dir");
    for mut storage in backends(&dir) {
        store(&mut storage, Uuid::new_v4(), &ramp("a", 5).into());
        store(&mut storage, Uuid::new_v4(), &forecast("b", 2, 2).into());
        storage.clear_time_series().expect("cleared");
        assert_eq!(storage.get_num_time_series().expect("count"), 0);
        assert!(storage.references().expect("references").is_empty());
    }
}

#[test]
fn in_memory_storage_serializes_to_a_readable_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("snapshot.db");
    let memory = InMemoryStorage::with_compression(CompressionSettings::deflate(6, true).expect("deflate"))
        .expect("memory");
    let mut storage = TimeSeriesStorage::from(memory);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let single: TimeSeriesData = ramp("demand", 5000).into();
    let windows: TimeSeriesData = forecast("load", 48, 24).into();
    store(&mut storage, a, &single);
    store(&mut storage, b, &single);
    store(&mut storage, a, &windows);
    storage.serialize(&path).expect("serialized");

    let reopened = FileStorage::open(&path, FileMode::ReadOnly, FileOptions::default()).expect("reopened");
    assert!(reopened.is_read_only());
    assert_eq!(reopened.get_num_time_series().expect("count"), 2);
    assert_eq!(reopened.reference_count(single.uuid()).expect("count"), 2);
    for data in [&single, &windows] {
        let read = reopened
            .deserialize_time_series(&data.metadata(), Selection::All)
            .expect("read");
        assert_eq!(&read, data);
    }
    let summary = reopened.summary().expect("summary");
    assert_eq!(summary.datasets, 2);
    assert_eq!(summary.owners, 3);
}

#[test]
fn serializing_refuses_to_clobber_an_existing_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("taken.db");
    std::fs::write(&path, b"occupied").expect("write");
    let storage = TimeSeriesStorage::in_memory();
    assert!(matches!(storage.serialize(&path), Err(SeriesError::Io(_))));
    assert_eq!(std::fs::read(&path).expect("read"), b"occupied");
}

#[test]
fn file_storage_copies_itself() {
    let dir = TempDir::new().expect("temp dir");
    let source = dir.path().join("source.db");
    let mut storage: TimeSeriesStorage = FileStorage::open(&source, FileMode::CreateNew, FileOptions::default())
        .expect("file")
        .into();
    let data: TimeSeriesData = forecast("load", 4, 4).into();
    store(&mut storage, Uuid::new_v4(), &data);

    assert!(matches!(storage.serialize(&source), Err(SeriesError::Invariant(_))));
    let copy = dir.path().join("copy.db");
    storage.serialize(&copy).expect("copied");
    let copied = FileStorage::open(&copy, FileMode::ReadOnly, FileOptions::default()).expect("copy");
    assert_eq!(
        copied
            .deserialize_time_series(&data.metadata(), Selection::All)
            .expect("read"),
        data
    );
    // a read-only file serialized onto itself is left alone
    let same: TimeSeriesStorage = copied.into();
    same.serialize(&copy).expect("no-op");
}

#[test]
fn read_only_storage_refuses_mutation() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("frozen.db");
    let data: TimeSeriesData = ramp("demand", 10).into();
    let owner = Uuid::new_v4();
    let mut writable = FileStorage::open(&path, FileMode::CreateNew, FileOptions::default()).expect("file");
    writable
        .serialize_time_series(&data.metadata(), owner, &data.to_array())
        .expect("stored");
    writable.close().expect("closed");
    let before = std::fs::read(&path).expect("read");

    let mut frozen = FileStorage::open(&path, FileMode::ReadOnly, FileOptions::default()).expect("file");
    let other: TimeSeriesData = ramp("other", 3).into();
    assert!(matches!(
        frozen.serialize_time_series(&other.metadata(), owner, &other.to_array()),
        Err(SeriesError::ReadOnly(_))
    ));
    assert!(matches!(
        frozen.remove_time_series(data.uuid(), owner, "demand"),
        Err(SeriesError::ReadOnly(_))
    ));
    assert!(matches!(frozen.clear_time_series(), Err(SeriesError::ReadOnly(_))));
    assert!(frozen.check_read_only().is_err());
    frozen.close().expect("closed");
    assert_eq!(std::fs::read(&path).expect("read"), before);

    let mut memory = TimeSeriesStorage::from(InMemoryStorage::new().into_read_only());
    assert!(matches!(
        memory.serialize_time_series(&other.metadata(), owner, &other.to_array()),
        Err(SeriesError::ReadOnly(_))
    ));
}

#[test]
fn file_modes_treat_existing_files_differently() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("modes.db");
    let data: TimeSeriesData = ramp("demand", 4).into();
    let mut file = FileStorage::open(&path, FileMode::CreateNew, FileOptions::default()).expect("new");
    file.serialize_time_series(&data.metadata(), Uuid::new_v4(), &data.to_array())
        .expect("stored");
    file.close().expect("closed");

    assert!(matches!(
        FileStorage::open(&path, FileMode::CreateNew, FileOptions::default()),
        Err(SeriesError::Io(_))
    ));
    let appended = FileStorage::open(&path, FileMode::Append, FileOptions::default()).expect("append");
    assert_eq!(appended.get_num_time_series().expect("count"), 1);
    appended.close().expect("closed");
    let truncated = FileStorage::open(&path, FileMode::Truncate, FileOptions::default()).expect("truncate");
    assert_eq!(truncated.get_num_time_series().expect("count"), 0);
    truncated.close().expect("closed");
    assert!(matches!(
        FileStorage::open(dir.path().join("missing.db"), FileMode::ReadOnly, FileOptions::default()),
        Err(SeriesError::NotFound(_))
    ));
}

#[test]
fn temporary_files_disappear_on_drop() {
    let dir = TempDir::new().expect("temp dir");
    let storage = FileStorage::create_temporary(Some(dir.path()), FileOptions::default()).expect("temporary");
    let path = storage.path().to_path_buf();
    assert!(storage.is_temporary());
    assert!(path.exists());
    drop(storage);
    assert!(!path.exists());
}

#[test]
fn corrupted_chunks_are_detected() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("corrupt.db");
    let data: TimeSeriesData = ramp("demand", 8).into();
    let mut file = FileStorage::open(&path, FileMode::CreateNew, FileOptions::default()).expect("file");
    file.serialize_time_series(&data.metadata(), Uuid::new_v4(), &data.to_array())
        .expect("stored");
    file.close().expect("closed");

    let connection = rusqlite::Connection::open(&path).expect("raw connection");
    connection
        .execute("update Chunk set Checksum = zeroblob(32)", [])
        .expect("tampered");
    drop(connection);

    let file = FileStorage::open(&path, FileMode::ReadOnly, FileOptions::default()).expect("file");
    assert!(matches!(
        file.deserialize_time_series(&data.metadata(), Selection::All),
        Err(SeriesError::DataCorruption { .. })
    ));
}

#[test]
fn a_failed_clear_rolls_back() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("clear.db");
    let data: TimeSeriesData = ramp("demand", 8).into();
    let owner = Uuid::new_v4();
    let mut file = FileStorage::open(&path, FileMode::CreateNew, FileOptions::default()).expect("file");
    file.serialize_time_series(&data.metadata(), owner, &data.to_array())
        .expect("stored");

    let connection = rusqlite::Connection::open(&path).expect("raw connection");
    connection
        .execute_batch(
            "create trigger keep_chunks before delete on Chunk
             begin select raise(abort, 'chunks are kept'); end;",
        )
        .expect("trigger");
    assert!(matches!(file.clear_time_series(), Err(SeriesError::Persistence(_))));
    assert_eq!(file.get_num_time_series().expect("count"), 1);
    assert_eq!(file.reference_count(data.uuid()).expect("owners"), 1);

    connection
        .execute_batch("drop trigger keep_chunks;")
        .expect("dropped");
    drop(connection);
    file.clear_time_series().expect("cleared");
    assert_eq!(file.get_num_time_series().expect("count"), 0);
}
