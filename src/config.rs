//! Settings read from an optional TOML file, overridable through
//! `SERIESCLAD_`-prefixed environment variables such as
//! `SERIESCLAD_STORAGE__BACKEND=file`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compression::CompressionSettings;
use crate::error::{Result, SeriesError};
use crate::memory::InMemoryStorage;
use crate::persist::{DEFAULT_CHUNK_ROWS, FileMode, FileOptions, FileStorage};
use crate::storage::TimeSeriesStorage;

pub const ENV_PREFIX: &str = "SERIESCLAD";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `"memory"` or `"file"`.
    pub backend: String,
    /// File to open. Without one a temporary file is created in `directory`.
    pub path: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub mode: FileMode,
    pub compression: CompressionSettings,
    pub chunk_rows: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
            directory: None,
            mode: FileMode::default(),
            compression: CompressionSettings::none(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.storage.compression.validate()?;
        debug!(?config, "loaded configuration");
        Ok(config)
    }
}

impl StorageConfig {
    pub fn file_options(&self) -> FileOptions {
        FileOptions {
            compression: self.compression,
            chunk_rows: self.chunk_rows,
        }
    }
    /// Constructs the backend these settings describe.
    pub fn open(&self) -> Result<TimeSeriesStorage> {
        match self.backend.as_str() {
            "memory" => Ok(InMemoryStorage::with_compression(self.compression)?.into()),
            "file" => {
                let storage = match &self.path {
                    Some(path) => FileStorage::open(path, self.mode, self.file_options())?,
                    None => FileStorage::create_temporary(self.directory.as_deref(), self.file_options())?,
                };
                Ok(storage.into())
            }
            other => Err(SeriesError::UnsupportedBackend(other.to_string())),
        }
    }
}
