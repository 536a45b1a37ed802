//! Seriesclad – time series storage for component-based data models.
//!
//! Components of a model (buses, generators, loads, ...) describe themselves
//! with small amounts of metadata but may carry large numeric series. Seriesclad
//! keeps the two apart:
//! * A [`container::TimeSeriesContainer`] lives inside each component and maps
//!   `(type, label)` to [`metadata::TimeSeriesMetadata`].
//! * The bulk values live in a [`storage::TimeSeriesStorage`] backend, addressed
//!   by the reference UUID the metadata carries.
//! * A [`system::System`] owns the components and the single backend they share.
//!
//! Identical values attached to several components are stored once. The
//! backend keeps the set of component names (`"{uuid}__{label}"`) referencing
//! each array and deletes the array when the last one is removed.
//!
//! ## Modules
//! * [`datatype`] – [`datatype::Resolution`], row-major [`datatype::SeriesArray`]
//!   and the uniform spacing checks.
//! * [`series`] – [`series::SingleTimeSeries`] and its slicing helpers.
//! * [`forecast`] – [`forecast::Deterministic`] forecasts and their windows.
//! * [`metadata`] – metadata records, keys and the [`metadata::TimeSeriesData`] union.
//! * [`storage`] – the [`storage::StorageBackend`] trait, row selection and the
//!   closed backend enum.
//! * [`memory`] / [`persist`] – the in-memory and SQLite file backends.
//! * [`compression`] – chunk compression (deflate, zstd) and byte shuffling.
//! * [`config`] – settings from TOML files and `SERIESCLAD_*` variables.
//!
//! ## Persistence
//! [`persist::FileStorage`] writes each array as a dataset of independently
//! compressed, blake3-checksummed chunks inside one SQLite file, so a windowed
//! read only decompresses the chunks it touches. An in-memory backend can be
//! written to such a file with [`storage::TimeSeriesStorage::serialize`], and
//! the file reopened read-only.
//!
//! ## Quick Start
//! ```
//! use chrono::NaiveDate;
//! use seriesclad::component::Component;
//! use seriesclad::container::TimeSeriesContainer;
//! use seriesclad::datatype::Resolution;
//! use seriesclad::metadata::TimeSeriesType;
//! use seriesclad::series::SingleTimeSeries;
//! use seriesclad::storage::Selection;
//! use seriesclad::system::System;
//! use uuid::Uuid;
//!
//! struct Load {
//!     name: String,
//!     uuid: Uuid,
//!     series: TimeSeriesContainer,
//! }
//! impl Component for Load {
//!     fn name(&self) -> &str { &self.name }
//!     fn uuid(&self) -> Uuid { self.uuid }
//!     fn time_series_container(&self) -> Option<&TimeSeriesContainer> { Some(&self.series) }
//!     fn time_series_container_mut(&mut self) -> Option<&mut TimeSeriesContainer> { Some(&mut self.series) }
//! }
//!
//! let mut system = System::in_memory();
//! system.add_component(Load { name: "load1".into(), uuid: Uuid::new_v4(), series: TimeSeriesContainer::new() }).unwrap();
//! let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let demand = SingleTimeSeries::from_values("demand", start, Resolution::hours(1).unwrap(), vec![1.0, 2.0, 3.0]).unwrap();
//! system.add_time_series::<Load>("load1", demand).unwrap();
//! let head = system
//!     .get_time_series::<Load>("load1", TimeSeriesType::SingleTimeSeries, "demand", Selection::Head(2))
//!     .unwrap();
//! assert_eq!(head.as_single().unwrap().values(), &[1.0, 2.0]);
//! ```
//!
//! ## Logging
//! Storage and system operations emit `tracing` events. Nothing is printed
//! unless the host installs a subscriber, as the bundled binary does.

pub mod component;
pub mod compression;
pub mod config;
pub mod container;
pub mod datatype;
pub mod error;
pub mod forecast;
pub mod memory;
pub mod metadata;
pub mod persist;
pub mod series;
pub mod storage;
pub mod system;

pub use error::{Result, SeriesError};
