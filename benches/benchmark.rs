use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use seriesclad::compression::CompressionSettings;
use seriesclad::datatype::Resolution;
use seriesclad::metadata::TimeSeriesData;
use seriesclad::persist::{FileOptions, FileStorage};
use seriesclad::series::SingleTimeSeries;
use seriesclad::storage::{Selection, StorageBackend, TimeSeriesStorage};
use uuid::Uuid;

fn series(len: usize) -> TimeSeriesData {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let values = (0..len).map(|i| (i as f64 / 96.0).sin() * 50.0 + 100.0).collect();
    SingleTimeSeries::from_values("load", start, Resolution::minutes(15).unwrap(), values)
        .unwrap()
        .into()
}

fn file_storage(dir: &tempfile::TempDir, compression: CompressionSettings) -> TimeSeriesStorage {
    let options = FileOptions {
        compression,
        ..FileOptions::default()
    };
    FileStorage::create_temporary(Some(dir.path()), options).unwrap().into()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let data = series(100_000);
    let metadata = data.metadata();
    let array = data.to_array();

    c.bench_function("serialize 100k in memory", |b| {
        b.iter(|| {
            let mut storage = TimeSeriesStorage::in_memory();
            storage
                .serialize_time_series(&metadata, Uuid::new_v4(), black_box(&array))
                .unwrap();
        })
    });
    c.bench_function("serialize 100k to file (zstd)", |b| {
        let mut storage = file_storage(&dir, CompressionSettings::zstd(3, true).unwrap());
        b.iter(|| {
            storage
                .serialize_time_series(&metadata, Uuid::new_v4(), black_box(&array))
                .unwrap();
            storage.clear_time_series().unwrap();
        })
    });

    for (name, compression) in [
        ("none", CompressionSettings::none()),
        ("deflate", CompressionSettings::deflate(6, true).unwrap()),
        ("zstd", CompressionSettings::zstd(3, true).unwrap()),
    ] {
        let mut storage = file_storage(&dir, compression);
        storage
            .serialize_time_series(&metadata, Uuid::new_v4(), &array)
            .unwrap();
        c.bench_function(&format!("read 96 rows of 100k ({name})"), |b| {
            b.iter(|| {
                storage
                    .deserialize_time_series(&metadata, black_box(Selection::Tail(96)))
                    .unwrap()
            })
        });
        c.bench_function(&format!("read all of 100k ({name})"), |b| {
            b.iter(|| storage.deserialize_time_series(&metadata, Selection::All).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
