//! BLTE header parsing

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;
use tracing::debug;

use super::{BLTE_MAGIC, MD5_LENGTH, Md5};
use crate::error::{CascError, Result};

/// Parsed BLTE stream metadata.
#[derive(Debug, Clone)]
pub struct BlteHeader {
    /// Total size of all chunks when decoded. 0 if unknown
    /// (single-chunk streams do not declare it).
    total_decoded_size: u64,

    /// Chunk information. Contains a single synthetic entry when the
    /// stream has no chunk table.
    chunks: Vec<ChunkInfo>,
}

impl BlteHeader {
    /// Parse a BLTE header from the start of a stream of `length` bytes.
    pub fn parse<R: Read>(f: &mut R, length: u64) -> Result<Self> {
        if length < 8 {
            return Err(CascError::Corruption(format!(
                "BLTE stream truncated: {length} bytes, need at least 8"
            )));
        }

        let mut magic = [0; BLTE_MAGIC.len()];
        f.read_exact(&mut magic)?;
        if magic != BLTE_MAGIC {
            return Err(CascError::Corruption(format!(
                "Invalid BLTE magic: {}",
                hex::encode(magic)
            )));
        }

        let header_length = f.read_u32::<BigEndian>()?;
        if length < u64::from(header_length) {
            return Err(CascError::Corruption(format!(
                "BLTE header overruns stream: header {header_length}, stream {length}"
            )));
        }

        if header_length < 8 + 4 + 24 {
            // Too small for even one table entry: single-chunk stream.
            // An exact-fit one-entry table (36 bytes) must still be
            // parsed, or its checksum would go unverified.
            let header_length = header_length.max(8);
            return Ok(Self {
                total_decoded_size: 0,
                chunks: vec![ChunkInfo::single_chunk(header_length, length)],
            });
        }

        if header_length > 65535 {
            // Arbitrary bound; a table this large is not a real stream.
            return Err(CascError::Corruption(format!(
                "Implausible BLTE header size: {header_length}"
            )));
        }

        let table_format = f.read_u8()?;
        debug!("Chunk table format: {table_format:#x}");
        if table_format != 0x0F {
            return Err(CascError::Corruption(format!(
                "Unsupported chunk table format: {table_format:#x}"
            )));
        }
        let chunk_count = f.read_u24::<BigEndian>()?;

        // The table must exactly fill the remaining header bytes.
        let table_len = header_length - 8 - 4;
        if table_len != chunk_count * 24 {
            return Err(CascError::Corruption(format!(
                "Chunk count {chunk_count} does not match header size {header_length}"
            )));
        }

        let mut chunks = Vec::with_capacity(chunk_count as usize);
        let mut encoded_offset = u64::from(header_length);
        let mut decoded_offset = 0u64;
        for _ in 0..chunk_count {
            let encoded_size = u64::from(f.read_u32::<BigEndian>()?);
            let decoded_size = u64::from(f.read_u32::<BigEndian>()?);

            let mut checksum = [0; MD5_LENGTH];
            f.read_exact(&mut checksum)?;

            chunks.push(ChunkInfo {
                encoded_size,
                decoded_size,
                checksum,
                encoded_offset,
                decoded_offset,
            });

            encoded_offset += encoded_size;
            if encoded_offset > length {
                return Err(CascError::Corruption(format!(
                    "Chunk data overruns stream: need {encoded_offset}, have {length}"
                )));
            }
            decoded_offset += decoded_size;
        }

        Ok(Self {
            total_decoded_size: decoded_offset,
            chunks,
        })
    }

    /// Total decoded size of all chunks, or 0 if unknown.
    pub fn total_decoded_size(&self) -> u64 {
        self.total_decoded_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Information about a chunk, or `None` if out of range.
    #[inline]
    pub fn get_chunk(&self, chunk: usize) -> Option<&ChunkInfo> {
        self.chunks.get(chunk)
    }

    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }
}

/// Information about a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Encoded size, including the mode prefix byte.
    pub encoded_size: u64,

    /// Decoded size, if declared. 0 means a single-chunk stream where
    /// the size is unknown until decoded.
    pub decoded_size: u64,

    /// MD5 of the encoded chunk including the mode byte. All-zero
    /// means unverified (synthetic single-chunk entries).
    pub checksum: Md5,

    /// Offset of the encoded chunk, relative to the stream start.
    pub encoded_offset: u64,

    /// Offset of this chunk in the decoded output.
    pub decoded_offset: u64,
}

impl ChunkInfo {
    /// Synthetic chunk info for single-chunk streams.
    fn single_chunk(header_length: u32, length: u64) -> Self {
        let header_length = u64::from(header_length);
        Self {
            encoded_size: length - header_length,
            decoded_size: 0,
            checksum: [0; MD5_LENGTH],
            encoded_offset: header_length,
            decoded_offset: 0,
        }
    }
}
