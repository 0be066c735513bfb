//! Archive file access for CASC storage

mod reader;

pub use reader::ArchiveReader;

use crate::error::{CascError, Result};
use crate::types::ArchiveLocation;
use std::path::{Path, PathBuf};

/// A CASC archive file (data.NNN) opened for reading.
pub struct Archive {
    /// Archive ID (the NNN in data.NNN)
    id: u16,
    path: PathBuf,
    reader: ArchiveReader,
}

impl Archive {
    /// Open an archive file.
    pub fn open(id: u16, path: PathBuf) -> Result<Self> {
        let reader = ArchiveReader::open(&path)?;
        Ok(Self { id, path, reader })
    }

    /// Read the encoded bytes at a location within this archive.
    pub fn read_at(&self, location: &ArchiveLocation) -> Result<Vec<u8>> {
        if location.archive_id != self.id {
            return Err(CascError::InvalidArchiveFormat(format!(
                "Location targets archive {}, this is {}",
                location.archive_id, self.id
            )));
        }
        self.reader.read_at(location.offset, location.size as usize)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.reader.size()
    }

    /// Archive filename (e.g. "data.001").
    pub fn filename(&self) -> String {
        format!("data.{:03}", self.id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
