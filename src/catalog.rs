//! Run catalog.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Run sequence number. Numbers grow monotonically within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sorted run stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: RunId,
    pub path: PathBuf,
}

impl RunMeta {
    pub fn new(id: RunId, path: impl Into<PathBuf>) -> Self {
        RunMeta { id, path: path.into() }
    }
}

/// Catalog manifest error.
#[derive(Debug)]
pub enum CatalogError {
    /// Common I/O error.
    IO(io::Error),
    /// Manifest serialization error.
    Encode(rmp_serde::encode::Error),
    /// Manifest deserialization error.
    Decode(rmp_serde::decode::Error),
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            CatalogError::IO(err) => err,
            CatalogError::Encode(err) => err,
            CatalogError::Decode(err) => err,
        })
    }
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            CatalogError::IO(err) => write!(f, "catalog manifest I/O failed: {}", err),
            CatalogError::Encode(err) => write!(f, "catalog manifest serialization error: {}", err),
            CatalogError::Decode(err) => write!(f, "catalog manifest deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for CatalogError {
    fn from(err: io::Error) -> Self {
        CatalogError::IO(err)
    }
}

/// Ordered list of runs handed from run formation to the merge.
///
/// The catalog is the only source of truth about which runs exist: the merge never scans the file system
/// looking for run files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCatalog {
    runs: Vec<RunMeta>,
}

impl RunCatalog {
    pub fn new() -> Self {
        RunCatalog::default()
    }

    /// Appends a run to the end of the catalog.
    pub fn push(&mut self, run: RunMeta) {
        self.runs.push(run);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runs(&self) -> &[RunMeta] {
        &self.runs
    }

    pub fn ids(&self) -> impl Iterator<Item = RunId> + '_ {
        self.runs.iter().map(|run| run.id)
    }

    /// Removes all runs from the catalog returning them in order.
    pub fn take(&mut self) -> Vec<RunMeta> {
        std::mem::take(&mut self.runs)
    }

    /// Saves the catalog as a MessagePack manifest.
    pub fn write_manifest(&self, path: &Path) -> Result<(), CatalogError> {
        let mut writer = io::BufWriter::new(fs::File::create(path)?);
        rmp_serde::encode::write(&mut writer, self).map_err(CatalogError::Encode)?;
        writer.flush()?;

        return Ok(());
    }

    /// Loads a catalog from a manifest written by [`RunCatalog::write_manifest`].
    pub fn read_manifest(path: &Path) -> Result<Self, CatalogError> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        rmp_serde::decode::from_read(reader).map_err(CatalogError::Decode)
    }
}

impl From<Vec<RunMeta>> for RunCatalog {
    fn from(runs: Vec<RunMeta>) -> Self {
        RunCatalog { runs }
    }
}
