// used for the durable storage file
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Error, OpenFlags, params};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compression::{CompressionAlgorithm, CompressionSettings, decompress};
use crate::datatype::{SeriesArray, values_from_bytes};
use crate::error::{Result, SeriesError};
use crate::storage::StorageBackend;

pub const DEFAULT_CHUNK_ROWS: usize = 4096;

/// How an existing file at the requested path is treated when opening.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// Fails if the file already exists.
    CreateNew,
    /// Discards whatever the file held.
    Truncate,
    /// Opens the file for writing, creating it when missing.
    #[default]
    Append,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileOptions {
    pub compression: CompressionSettings,
    /// Rows per stored chunk. Reads only decompress the chunks they touch.
    pub chunk_rows: usize,
}
impl Default for FileOptions {
    fn default() -> Self {
        Self {
            compression: CompressionSettings::none(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

/// Counts describing the contents of a storage file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub datasets: usize,
    pub chunks: usize,
    pub owners: usize,
    pub stored_bytes: usize,
}

struct DatasetHeader {
    rows: usize,
    columns: usize,
    chunk_rows: usize,
    algorithm: CompressionAlgorithm,
    shuffled: bool,
}

/// Arrays kept in a single SQLite file.
///
/// Each array becomes a `Dataset` row split into `Chunk` rows of at most
/// `chunk_rows` rows each, compressed independently and checksummed over their
/// uncompressed bytes. The component names owning an array are kept in `Owner`.
#[derive(Debug)]
pub struct FileStorage {
    connection: Connection,
    path: PathBuf,
    options: FileOptions,
    read_only: bool,
    // dropped after the connection, removing a file that had no explicit path
    temporary: Option<TempPath>,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(path: P, mode: FileMode, options: FileOptions) -> Result<Self> {
        let path = path.as_ref();
        options.compression.validate()?;
        if options.chunk_rows == 0 {
            return Err(SeriesError::Config("chunk_rows must be positive".to_string()));
        }
        let connection = match mode {
            FileMode::CreateNew => {
                if path.exists() {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} already exists", path.display()),
                    )
                    .into());
                }
                Connection::open(path)?
            }
            FileMode::Truncate => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
                Connection::open(path)?
            }
            FileMode::Append => Connection::open(path)?,
            FileMode::ReadOnly => {
                if !path.exists() {
                    return Err(SeriesError::NotFound(format!("{} does not exist", path.display())));
                }
                Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
        };
        let read_only = mode == FileMode::ReadOnly;
        if read_only {
            check_schema(&connection, path)?;
        } else {
            create_schema(&connection)?;
        }
        let path = fs::canonicalize(path)?;
        info!(path = %path.display(), ?mode, compression = options.compression.algorithm.as_str(), "opened storage file");
        Ok(Self {
            connection,
            path,
            options,
            read_only,
            temporary: None,
        })
    }
    /// Creates a storage file with a generated name, in `directory` if given
    /// and in the system temporary directory otherwise. The file is removed
    /// when the storage is dropped.
    pub fn create_temporary(directory: Option<&Path>, options: FileOptions) -> Result<Self> {
        let file = match directory {
            Some(directory) => tempfile::Builder::new()
                .prefix("seriesclad-")
                .suffix(".db")
                .tempfile_in(directory)?,
            None => tempfile::Builder::new()
                .prefix("seriesclad-")
                .suffix(".db")
                .tempfile()?,
        };
        let temporary = file.into_temp_path();
        let mut storage = Self::open(&temporary, FileMode::Append, options)?;
        storage.temporary = Some(temporary);
        Ok(storage)
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn options(&self) -> FileOptions {
        self.options
    }
    pub fn is_temporary(&self) -> bool {
        self.temporary.is_some()
    }
    /// Releases the file handle, reporting anything SQLite could not flush.
    pub fn close(self) -> Result<()> {
        let FileStorage {
            connection, path, ..
        } = self;
        connection.close().map_err(|(_, e)| SeriesError::from(e))?;
        debug!(path = %path.display(), "closed storage file");
        Ok(())
    }
    /// Copies the backing file to `destination`. Copying onto itself is a
    /// no-op for a read-only file and an error otherwise.
    pub fn copy_to(&self, destination: &Path) -> Result<()> {
        let same = fs::canonicalize(destination).is_ok_and(|d| d == self.path);
        if same {
            if self.read_only {
                warn!(path = %self.path.display(), "storage file is already at the destination");
                return Ok(());
            }
            return Err(SeriesError::Invariant(format!(
                "refusing to overwrite the open storage file {}",
                self.path.display()
            )));
        }
        fs::copy(&self.path, destination)?;
        info!(from = %self.path.display(), to = %destination.display(), "copied storage file");
        Ok(())
    }
    pub fn summary(&self) -> Result<FileSummary> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.connection.query_row(sql, [], |r| r.get(0))?;
            to_usize(n)
        };
        Ok(FileSummary {
            datasets: count("select count(*) from Dataset")?,
            chunks: count("select count(*) from Chunk")?,
            owners: count("select count(*) from Owner")?,
            stored_bytes: count("select coalesce(sum(length(Payload)), 0) from Chunk")?,
        })
    }
    fn header(&self, reference: Uuid) -> Result<DatasetHeader> {
        let found = self.connection.query_row(
            "
            select Rows, Columns, ChunkRows, Compression, Shuffled
              from Dataset
             where Dataset_Reference = ?
            ",
            params![reference.to_string()],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, bool>(4)?,
                ))
            },
        );
        match found {
            Ok((rows, columns, chunk_rows, compression, shuffled)) => Ok(DatasetHeader {
                rows: to_usize(rows)?,
                columns: to_usize(columns)?,
                chunk_rows: to_usize(chunk_rows)?.max(1),
                algorithm: CompressionAlgorithm::parse(&compression)?,
                shuffled,
            }),
            Err(Error::QueryReturnedNoRows) => Err(SeriesError::NotFound(format!(
                "no time series stored under {reference}"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}

fn to_usize(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| SeriesError::DataCorruption {
        message: format!("stored count {n} is negative"),
    })
}

fn create_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        pragma foreign_keys = on;
        create table if not exists Dataset (
            Dataset_Reference text not null,
            Rows integer not null,
            Columns integer not null,
            ChunkRows integer not null,
            Compression text not null,
            CompressionLevel integer not null,
            Shuffled integer not null,
            constraint referenceable_Dataset_Reference primary key (
                Dataset_Reference
            )
        );
        create table if not exists Chunk (
            Dataset_Reference text not null,
            ChunkIndex integer not null,
            Payload blob not null,
            Checksum blob not null,
            constraint Chunk_of_Dataset foreign key (
                Dataset_Reference
            ) references Dataset(Dataset_Reference) on delete cascade,
            constraint unique_Chunk primary key (
                Dataset_Reference,
                ChunkIndex
            )
        );
        create table if not exists Owner (
            Dataset_Reference text not null,
            ComponentName text not null,
            constraint Owner_of_Dataset foreign key (
                Dataset_Reference
            ) references Dataset(Dataset_Reference) on delete cascade,
            constraint unique_Owner primary key (
                Dataset_Reference,
                ComponentName
            )
        );
        ",
    )?;
    Ok(())
}

fn check_schema(connection: &Connection, path: &Path) -> Result<()> {
    let tables: i64 = connection.query_row(
        "select count(*) from sqlite_master where type = 'table' and name in ('Dataset', 'Chunk', 'Owner')",
        [],
        |r| r.get(0),
    )?;
    if tables != 3 {
        return Err(SeriesError::DataCorruption {
            message: format!("{} is not a time series storage file", path.display()),
        });
    }
    Ok(())
}

impl StorageBackend for FileStorage {
    fn store_array(&mut self, reference: Uuid, owner: &str, array: &SeriesArray) -> Result<()> {
        self.check_read_only()?;
        let chunk_rows = self.options.chunk_rows;
        let compression = self.options.compression;
        let key = reference.to_string();
        // chunks are staged and the dataset becomes visible only on commit
        let tx = self.connection.transaction()?;
        tx.execute(
            "
            insert into Dataset (
                Dataset_Reference,
                Rows,
                Columns,
                ChunkRows,
                Compression,
                CompressionLevel,
                Shuffled
            ) values (?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                key,
                array.rows() as i64,
                array.columns() as i64,
                chunk_rows as i64,
                compression.algorithm.as_str(),
                compression.level,
                compression.shuffles()
            ],
        )?;
        {
            let mut add_chunk = tx.prepare_cached(
                "
                insert into Chunk (
                    Dataset_Reference,
                    ChunkIndex,
                    Payload,
                    Checksum
                ) values (?, ?, ?, ?)
                ",
            )?;
            for (index, start) in (0..array.rows()).step_by(chunk_rows).enumerate() {
                let end = (start + chunk_rows).min(array.rows());
                let raw = array.row_bytes(start, end);
                let checksum = blake3::hash(&raw);
                let payload = compression.compress(&raw)?;
                add_chunk.execute(params![key, index as i64, payload, checksum.as_bytes().to_vec()])?;
            }
        }
        tx.execute(
            "insert into Owner (Dataset_Reference, ComponentName) values (?, ?)",
            params![key, owner],
        )?;
        tx.commit()?;
        Ok(())
    }
    fn has_array(&self, reference: Uuid) -> Result<bool> {
        let exists: bool = self.connection.query_row(
            "select exists (select 1 from Dataset where Dataset_Reference = ?)",
            params![reference.to_string()],
            |r| r.get(0),
        )?;
        Ok(exists)
    }
    fn array_shape(&self, reference: Uuid) -> Result<(usize, usize)> {
        let header = self.header(reference)?;
        Ok((header.rows, header.columns))
    }
    fn owners(&self, reference: Uuid) -> Result<Vec<String>> {
        if !self.has_array(reference)? {
            return Err(SeriesError::NotFound(format!("no time series stored under {reference}")));
        }
        let mut statement = self.connection.prepare_cached(
            "select ComponentName from Owner where Dataset_Reference = ? order by ComponentName",
        )?;
        let owners = statement
            .query_map(params![reference.to_string()], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(owners)
    }
    fn add_owner(&mut self, reference: Uuid, owner: &str) -> Result<()> {
        self.check_read_only()?;
        match self.connection.execute(
            "insert into Owner (Dataset_Reference, ComponentName) values (?, ?)",
            params![reference.to_string(), owner],
        ) {
            Ok(_) => Ok(()),
            Err(Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                if self.has_array(reference)? {
                    Err(SeriesError::DuplicateKey(format!("{owner} already references {reference}")))
                } else {
                    Err(SeriesError::NotFound(format!("no time series stored under {reference}")))
                }
            }
            Err(err) => Err(err.into()),
        }
    }
    fn remove_owner(&mut self, reference: Uuid, owner: &str) -> Result<usize> {
        self.check_read_only()?;
        let key = reference.to_string();
        let tx = self.connection.transaction()?;
        let removed = tx.execute(
            "delete from Owner where Dataset_Reference = ? and ComponentName = ?",
            params![key, owner],
        )?;
        if removed == 0 {
            return Err(SeriesError::NotFound(format!("{owner} does not reference {reference}")));
        }
        let remaining: i64 = tx.query_row(
            "select count(*) from Owner where Dataset_Reference = ?",
            params![key],
            |r| r.get(0),
        )?;
        if remaining == 0 {
            tx.execute("delete from Chunk where Dataset_Reference = ?", params![key])?;
            tx.execute("delete from Dataset where Dataset_Reference = ?", params![key])?;
        }
        tx.commit()?;
        to_usize(remaining)
    }
    fn read_rows(&self, reference: Uuid, rows: Range<usize>) -> Result<SeriesArray> {
        let header = self.header(reference)?;
        if rows.start > rows.end || rows.end > header.rows {
            return Err(SeriesError::Selection(format!(
                "rows {rows:?} are outside the {} stored under {reference}",
                header.rows
            )));
        }
        if rows.is_empty() {
            return SeriesArray::matrix(0, header.columns, Vec::new());
        }
        let first_chunk = rows.start / header.chunk_rows;
        let last_chunk = (rows.end - 1) / header.chunk_rows;
        let mut statement = self.connection.prepare_cached(
            "
            select ChunkIndex, Payload, Checksum
              from Chunk
             where Dataset_Reference = ? and ChunkIndex between ? and ?
             order by ChunkIndex
            ",
        )?;
        let chunks = statement
            .query_map(
                params![reference.to_string(), first_chunk as i64, last_chunk as i64],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?, r.get::<_, Vec<u8>>(2)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if chunks.len() != last_chunk - first_chunk + 1 {
            return Err(SeriesError::DataCorruption {
                message: format!("chunks of {reference} are missing"),
            });
        }
        let mut values = Vec::with_capacity(rows.len() * header.columns);
        for (expected, (index, payload, checksum)) in (first_chunk..).zip(chunks) {
            if to_usize(index)? != expected {
                return Err(SeriesError::DataCorruption {
                    message: format!("chunk {expected} of {reference} is missing"),
                });
            }
            let raw = decompress(header.algorithm, header.shuffled, &payload)?;
            if blake3::hash(&raw).as_bytes().as_slice() != checksum.as_slice() {
                return Err(SeriesError::DataCorruption {
                    message: format!("checksum mismatch in chunk {expected} of {reference}"),
                });
            }
            let chunk = values_from_bytes(&raw)?;
            let chunk_start = expected * header.chunk_rows;
            let from = rows.start.max(chunk_start) - chunk_start;
            let to = rows.end.min(chunk_start + header.chunk_rows) - chunk_start;
            let slice = chunk
                .get(from * header.columns..to * header.columns)
                .ok_or_else(|| SeriesError::DataCorruption {
                    message: format!("chunk {expected} of {reference} is shorter than recorded"),
                })?;
            values.extend_from_slice(slice);
        }
        SeriesArray::matrix(rows.len(), header.columns, values)
    }
    fn references(&self) -> Result<Vec<Uuid>> {
        let mut statement = self
            .connection
            .prepare_cached("select Dataset_Reference from Dataset order by Dataset_Reference")?;
        let keys = statement
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        keys.iter()
            .map(|key| {
                Uuid::parse_str(key).map_err(|e| SeriesError::DataCorruption {
                    message: format!("stored reference '{key}' is not a uuid: {e}"),
                })
            })
            .collect()
    }
    fn clear(&mut self) -> Result<()> {
        self.check_read_only()?;
        let tx = self.connection.transaction()?;
        tx.execute_batch(
            "
            delete from Owner;
            delete from Chunk;
            delete from Dataset;
            ",
        )?;
        tx.commit()?;
        Ok(())
    }
    fn num_arrays(&self) -> Result<usize> {
        let n: i64 = self
            .connection
            .query_row("select count(*) from Dataset", [], |r| r.get(0))?;
        to_usize(n)
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
