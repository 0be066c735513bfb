//! Read/seek stream over an opened file's span list.

use crate::error::CascError;
use crate::storage::CascStorage;
use crate::types::{FileRecord, Span};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::trace;

/// A readable, seekable view of one stored file.
///
/// The file's logical content is the concatenation of its spans. Spans
/// decode lazily on first touch and stay decoded for the stream's life;
/// the storage-level cache additionally shares decoded spans between
/// streams. Reads past end of file are short reads, never errors.
///
/// A span that fails to decode poisons the stream: the failing call
/// reports the corruption and every call after it fails with
/// `InvalidState`.
pub struct FileStream<'s> {
    storage: &'s CascStorage,
    record: FileRecord,
    spans: Vec<Span>,
    /// Logical start offset of each span
    starts: Vec<u64>,
    total_size: u64,
    decoded: Vec<Option<Arc<Vec<u8>>>>,
    position: u64,
    poisoned: bool,
}

impl<'s> FileStream<'s> {
    pub(crate) fn new(storage: &'s CascStorage, spans: Vec<Span>, record: FileRecord) -> Self {
        let mut starts = Vec::with_capacity(spans.len());
        let mut total_size = 0u64;
        for span in &spans {
            starts.push(total_size);
            total_size += span.logical_size;
        }
        let decoded = vec![None; spans.len()];
        Self {
            storage,
            record,
            spans,
            starts,
            total_size,
            decoded,
            position: 0,
            poisoned: false,
        }
    }

    /// Metadata of the opened file.
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Logical (decoded) size in bytes.
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Index of the span containing the given logical offset.
    /// Caller guarantees `offset < total_size`.
    fn span_at(&self, offset: u64) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    /// Decoded bytes of one span, decoding on first touch.
    fn span_data(&mut self, index: usize) -> io::Result<Arc<Vec<u8>>> {
        if let Some(data) = &self.decoded[index] {
            return Ok(Arc::clone(data));
        }

        let span = &self.spans[index];
        trace!("Decoding span {} (ekey {})", index, span.ekey);
        match self.storage.decode_span(span) {
            Ok(data) => {
                self.decoded[index] = Some(Arc::clone(&data));
                Ok(data)
            }
            Err(e) => {
                if matches!(
                    e,
                    CascError::Corruption(_) | CascError::ChecksumMismatch { .. }
                ) {
                    self.poisoned = true;
                }
                Err(io::Error::other(e))
            }
        }
    }
}

impl std::fmt::Debug for FileStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("file_name", &self.record.file_name)
            .field("size", &self.total_size)
            .field("position", &self.position)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl Read for FileStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::other(CascError::InvalidState(
                "stream poisoned by earlier corruption",
            )));
        }
        if buf.is_empty() || self.position >= self.total_size {
            return Ok(0);
        }

        let mut written = 0;
        while written < buf.len() && self.position < self.total_size {
            let index = self.span_at(self.position);
            let data = self.span_data(index)?;

            let offset = (self.position - self.starts[index]) as usize;
            let available = data.len().saturating_sub(offset);
            let n = available.min(buf.len() - written);
            if n == 0 {
                break;
            }
            buf[written..written + n].copy_from_slice(&data[offset..offset + n]);
            written += n;
            self.position += n as u64;
        }

        Ok(written)
    }
}

impl Seek for FileStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.total_size) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        // Past-EOF positions are allowed; reads there return 0 bytes
        self.position = u64::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflow"))?;
        Ok(self.position)
    }
}

impl Write for FileStream<'_> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            CascError::UnsupportedOperation("storage files are read-only"),
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            CascError::UnsupportedOperation("storage files are read-only"),
        ))
    }
}
