use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use uuid::Uuid;

use crate::compression::CompressionSettings;
use crate::datatype::SeriesArray;
use crate::error::{Result, SeriesError};
use crate::storage::{OtherHasher, StorageBackend};

#[derive(Debug)]
struct StoredArray {
    array: SeriesArray,
    owners: BTreeSet<String>,
}

/// Keeps arrays in process memory. Nothing survives the process, but the
/// contents can be written out through [`crate::storage::TimeSeriesStorage::serialize`],
/// which applies the compression settings held here.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    arrays: HashMap<Uuid, StoredArray, OtherHasher>,
    compression: CompressionSettings,
    read_only: bool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_compression(compression: CompressionSettings) -> Result<Self> {
        compression.validate()?;
        Ok(Self {
            compression,
            ..Self::default()
        })
    }
    /// Refuses every mutation from now on.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
    pub fn compression(&self) -> CompressionSettings {
        self.compression
    }
    fn stored(&self, reference: Uuid) -> Result<&StoredArray> {
        self.arrays
            .get(&reference)
            .ok_or_else(|| SeriesError::NotFound(format!("no time series stored under {reference}")))
    }
}

impl StorageBackend for InMemoryStorage {
    fn store_array(&mut self, reference: Uuid, owner: &str, array: &SeriesArray) -> Result<()> {
        self.check_read_only()?;
        if self.arrays.contains_key(&reference) {
            return Err(SeriesError::DuplicateKey(format!("{reference} is already stored")));
        }
        self.arrays.insert(
            reference,
            StoredArray {
                array: array.clone(),
                owners: BTreeSet::from([owner.to_string()]),
            },
        );
        Ok(())
    }
    fn has_array(&self, reference: Uuid) -> Result<bool> {
        Ok(self.arrays.contains_key(&reference))
    }
    fn array_shape(&self, reference: Uuid) -> Result<(usize, usize)> {
        let stored = self.stored(reference)?;
        Ok((stored.array.rows(), stored.array.columns()))
    }
    fn owners(&self, reference: Uuid) -> Result<Vec<String>> {
        Ok(self.stored(reference)?.owners.iter().cloned().collect())
    }
    fn add_owner(&mut self, reference: Uuid, owner: &str) -> Result<()> {
        self.check_read_only()?;
        let stored = self
            .arrays
            .get_mut(&reference)
            .ok_or_else(|| SeriesError::NotFound(format!("no time series stored under {reference}")))?;
        stored.owners.insert(owner.to_string());
        Ok(())
    }
    fn remove_owner(&mut self, reference: Uuid, owner: &str) -> Result<usize> {
        self.check_read_only()?;
        let stored = self
            .arrays
            .get_mut(&reference)
            .ok_or_else(|| SeriesError::NotFound(format!("no time series stored under {reference}")))?;
        if !stored.owners.remove(owner) {
            return Err(SeriesError::NotFound(format!(
                "{owner} does not reference {reference}"
            )));
        }
        let remaining = stored.owners.len();
        if remaining == 0 {
            self.arrays.remove(&reference);
        }
        Ok(remaining)
    }
    fn read_rows(&self, reference: Uuid, rows: Range<usize>) -> Result<SeriesArray> {
        let array = &self.stored(reference)?.array;
        if rows.start > rows.end || rows.end > array.rows() {
            return Err(SeriesError::Selection(format!(
                "rows {rows:?} are outside the {} stored under {reference}",
                array.rows()
            )));
        }
        let columns = array.columns();
        SeriesArray::matrix(
            rows.len(),
            columns,
            array.values()[rows.start * columns..rows.end * columns].to_vec(),
        )
    }
    fn references(&self) -> Result<Vec<Uuid>> {
        let mut references: Vec<Uuid> = self.arrays.keys().copied().collect();
        references.sort();
        Ok(references)
    }
    fn clear(&mut self) -> Result<()> {
        self.check_read_only()?;
        self.arrays.clear();
        Ok(())
    }
    fn num_arrays(&self) -> Result<usize> {
        Ok(self.arrays.len())
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
