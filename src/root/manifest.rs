//! Root manifest wire format (`TSFM`).
//!
//! The root manifest is itself a file in the container: a BLTE-encoded
//! blob addressed by the `Root Key` entry of `.build.info`. Its decoded
//! payload maps file identities (name hashes and data IDs) to content
//! keys and span lists.
//!
//! Layout: a fixed header, then blocks until end of input. Each block
//! carries shared flags, a delta-coded data-ID array, the per-file
//! records, and (for named blocks) a name-hash array.

use crate::error::{CascError, Result};
use crate::types::{CKey, EKey};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, trace};

const ROOT_MAGIC: [u8; 4] = *b"TSFM";

/// Block flag: records in this block carry name hashes.
const BLOCK_HAS_NAME_HASHES: u8 = 0x01;

/// One stored span reference: encoding key plus its decoded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRef {
    pub ekey: EKey,
    pub logical_size: u64,
}

/// One file entry in the root manifest.
#[derive(Debug, Clone)]
pub struct RootRecord {
    pub data_id: u32,
    pub ckey: CKey,
    pub spans: Vec<SpanRef>,
    /// Jenkins3 hashpath of the normalized full path, when known
    pub name_hash: Option<u64>,
    pub locale_flags: u32,
    pub content_flags: u32,
    pub tag_mask: u64,
}

impl RootRecord {
    /// Logical size: the sum of all span sizes.
    pub fn file_size(&self) -> u64 {
        self.spans.iter().map(|s| s.logical_size).sum()
    }
}

/// Parsed root manifest.
#[derive(Debug)]
pub struct RootManifest {
    pub version: u32,
    pub total_file_count: u32,
    pub named_file_count: u32,
    records: Vec<RootRecord>,
    by_name_hash: HashMap<u64, usize>,
    by_data_id: HashMap<u32, usize>,
}

impl RootManifest {
    /// Parse a decoded root manifest payload.
    pub fn parse<R: Read>(f: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        f.read_exact(&mut magic)
            .map_err(|_| CascError::InvalidManifestFormat("Manifest too short".into()))?;
        if magic != ROOT_MAGIC {
            return Err(CascError::InvalidManifestFormat(format!(
                "Bad magic: {}",
                hex::encode(magic)
            )));
        }

        let version = f.read_u32::<LittleEndian>()?;
        let total_file_count = f.read_u32::<LittleEndian>()?;
        let named_file_count = f.read_u32::<LittleEndian>()?;

        debug!(
            "Parsing root manifest: version={}, total={}, named={}",
            version, total_file_count, named_file_count
        );

        if named_file_count > total_file_count {
            return Err(CascError::InvalidManifestFormat(format!(
                "Named count {named_file_count} exceeds total {total_file_count}"
            )));
        }

        let mut records = Vec::with_capacity(total_file_count as usize);
        loop {
            match Self::parse_block(f, &mut records) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(e),
            }
        }

        if records.len() as u32 != total_file_count {
            return Err(CascError::InvalidManifestFormat(format!(
                "Header declares {} records, blocks hold {}",
                total_file_count,
                records.len()
            )));
        }

        let mut by_name_hash = HashMap::new();
        let mut by_data_id = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            if let Some(hash) = record.name_hash {
                by_name_hash.insert(hash, i);
            }
            by_data_id.insert(record.data_id, i);
        }

        Ok(Self {
            version,
            total_file_count,
            named_file_count,
            records,
            by_name_hash,
            by_data_id,
        })
    }

    /// Parse one block. Returns `Ok(false)` on clean end of input.
    fn parse_block<R: Read>(f: &mut R, records: &mut Vec<RootRecord>) -> Result<bool> {
        let record_count = match f.read_u32::<LittleEndian>() {
            Ok(n) => n as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let content_flags = f.read_u32::<LittleEndian>()?;
        let locale_flags = f.read_u32::<LittleEndian>()?;
        let tag_mask = f.read_u64::<LittleEndian>()?;
        let block_flags = f.read_u8()?;
        let has_name_hashes = block_flags & BLOCK_HAS_NAME_HASHES != 0;

        trace!(
            "Root block: {} records, content={:#x}, locale={:#x}, named={}",
            record_count, content_flags, locale_flags, has_name_hashes
        );

        // Delta-coded data IDs: first delta is the absolute ID,
        // subsequent entries advance by 1 + delta.
        let mut data_ids = Vec::with_capacity(record_count);
        let mut data_id = 0u32;
        for i in 0..record_count {
            let delta = f.read_i32::<LittleEndian>()?;
            data_id = if i == 0 {
                u32::try_from(delta).map_err(|_| {
                    CascError::InvalidManifestFormat("Negative initial data ID".into())
                })?
            } else {
                delta
                    .checked_add(1)
                    .and_then(|step| data_id.checked_add_signed(step))
                    .ok_or_else(|| CascError::InvalidManifestFormat("Data ID overflow".into()))?
            };
            data_ids.push(data_id);
        }

        let block_start = records.len();
        for &data_id in &data_ids {
            let mut ckey_bytes = [0u8; 16];
            f.read_exact(&mut ckey_bytes)?;

            let span_count = f.read_u8()?;
            if span_count == 0 {
                return Err(CascError::InvalidManifestFormat(format!(
                    "Record {data_id} has no spans"
                )));
            }

            let mut spans = Vec::with_capacity(span_count as usize);
            for _ in 0..span_count {
                let mut ekey_bytes = [0u8; 16];
                f.read_exact(&mut ekey_bytes)?;
                let logical_size = read_u40le(f)?;
                spans.push(SpanRef {
                    ekey: EKey::new(ekey_bytes),
                    logical_size,
                });
            }

            records.push(RootRecord {
                data_id,
                ckey: CKey::new(ckey_bytes),
                spans,
                name_hash: None,
                locale_flags,
                content_flags,
                tag_mask,
            });
        }

        if has_name_hashes {
            for i in 0..record_count {
                let hash = f.read_u64::<LittleEndian>()?;
                records[block_start + i].name_hash = Some(hash);
            }
        }

        Ok(true)
    }

    /// All records, in manifest order.
    pub fn records(&self) -> &[RootRecord] {
        &self.records
    }

    pub fn record_by_name_hash(&self, hash: u64) -> Option<&RootRecord> {
        self.by_name_hash.get(&hash).map(|&i| &self.records[i])
    }

    pub fn record_by_data_id(&self, data_id: u32) -> Option<&RootRecord> {
        self.by_data_id.get(&data_id).map(|&i| &self.records[i])
    }
}

/// Read a 40-bit little-endian unsigned integer. Sizes throughout the
/// container formats use 5 bytes, enough for 1TB.
fn read_u40le<R: Read>(f: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    f.read_exact(&mut buf[..5])?;
    Ok(u64::from_le_bytes(buf))
}
