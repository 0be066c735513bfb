//! Archive reader with memory mapping and a file-handle fallback

use crate::error::{CascError, Result};
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Reader for CASC archive files. Memory-maps when possible; otherwise
/// falls back to a seeking file handle behind a mutex so reads can take
/// `&self`.
pub struct ArchiveReader {
    mmap: Option<Mmap>,
    file: Option<Mutex<BufReader<File>>>,
    size: u64,
}

impl ArchiveReader {
    /// Open an archive file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!("Opening archive: {:?} (size: {} bytes)", path, size);

        // Memory-map files up to 2GB; larger ones use the file handle.
        let mmap = if size > 0 && size < 2_147_483_648 {
            match unsafe { MmapOptions::new().map(&file) } {
                Ok(mmap) => Some(mmap),
                Err(e) => {
                    debug!("Failed to memory-map archive, using file reader: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let file = if mmap.is_none() {
            Some(Mutex::new(BufReader::new(file)))
        } else {
            None
        };

        Ok(Self { mmap, file, size })
    }

    /// Read `length` bytes at `offset`.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if offset + length as u64 > self.size {
            return Err(CascError::InvalidArchiveFormat(format!(
                "Read beyond archive bounds: offset={}, length={}, size={}",
                offset, length, self.size
            )));
        }

        if let Some(ref mmap) = self.mmap {
            // Fast path: memory-mapped access
            Ok(mmap[offset as usize..offset as usize + length].to_vec())
        } else if let Some(ref file) = self.file {
            let mut file = file.lock();
            file.seek(SeekFrom::Start(offset))?;
            let mut buffer = vec![0u8; length];
            file.read_exact(&mut buffer)?;
            Ok(buffer)
        } else {
            Err(CascError::InvalidArchiveFormat(
                "Archive reader not initialized".into(),
            ))
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_memory_mapped(&self) -> bool {
        self.mmap.is_some()
    }
}
