//! Opens a time series storage file read-only and logs what it holds.
//!
//! Usage: `seriesclad [CONFIG] [STORAGE_FILE]`. Without a config argument
//! `seriesclad.toml` is read when present; `SERIESCLAD_*` variables override
//! either. The storage file argument takes precedence over `storage.path`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use seriesclad::config::Config;
use seriesclad::persist::{FileMode, FileStorage};
use seriesclad::storage::StorageBackend;
use seriesclad::Result;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "seriesclad.toml";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .or_else(|| Path::new(DEFAULT_CONFIG).exists().then(|| PathBuf::from(DEFAULT_CONFIG)));
    let file = args.next().map(PathBuf::from);

    match run(config_path.as_deref(), file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<&Path>, file: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path)?;
    let Some(path) = file.or(config.storage.path.clone()) else {
        info!("no storage file configured, nothing to inspect");
        return Ok(());
    };
    let storage = FileStorage::open(&path, FileMode::ReadOnly, config.storage.file_options())?;
    let summary = storage.summary()?;
    info!(
        path = %storage.path().display(),
        datasets = summary.datasets,
        chunks = summary.chunks,
        owners = summary.owners,
        stored_bytes = summary.stored_bytes,
        "storage summary"
    );
    for reference in storage.references()? {
        let (rows, columns) = storage.array_shape(reference)?;
        info!(%reference, rows, columns, references = storage.reference_count(reference)?, "dataset");
    }
    storage.close()
}
