//! Parser for `.idx` index files (bucket-based indices)

use crate::error::{CascError, Result};
use crate::types::{ArchiveLocation, EKey, IndexEntry};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

/// Truncated key length used by `.idx` entries.
pub(crate) const TRUNCATED_KEY_LENGTH: usize = 9;

/// A parsed `.idx` file: one bucket's worth of EKey -> location entries.
#[derive(Debug)]
pub struct IdxFile {
    entries: Vec<IndexEntry>,
    bucket: u8,
    version: u16,
}

impl IdxFile {
    /// Parse an `.idx` file from disk.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an `.idx` file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header_size = reader.read_u32::<LittleEndian>()?;
        let header_hash = reader.read_u32::<LittleEndian>()?;

        debug!(
            "Parsing .idx header: size={}, hash={:08x}",
            header_size, header_hash
        );

        if header_size < 8 {
            return Err(CascError::InvalidIndexFormat(format!(
                "Header section too small: {header_size} bytes"
            )));
        }

        let version = reader.read_u16::<LittleEndian>()?;
        let bucket = reader.read_u8()?;
        let length_field_size = reader.read_u8()?;
        let location_field_size = reader.read_u8()?;
        let key_field_size = reader.read_u8()?;
        let segment_bits = reader.read_u8()?;
        reader.read_u8()?; // alignment padding

        trace!(
            "IDX header: version={}, bucket={:02x}, key_size={}, location_size={}, length_size={}, segment_bits={}",
            version, bucket, key_field_size, location_field_size, length_field_size, segment_bits
        );

        if key_field_size as usize != TRUNCATED_KEY_LENGTH && key_field_size != 16 {
            return Err(CascError::InvalidIndexFormat(format!(
                "Invalid key field size: {key_field_size}"
            )));
        }
        if bucket > 0x0F {
            return Err(CascError::InvalidIndexFormat(format!(
                "Invalid bucket index: {bucket:02x}"
            )));
        }
        // Offsets never need more than 40 bits; larger values would
        // overflow the shifts in entry parsing.
        let offset_size = segment_bits.div_ceil(8);
        if !(1..=40).contains(&segment_bits) || location_field_size <= offset_size {
            return Err(CascError::InvalidIndexFormat(format!(
                "Invalid location encoding: location_size={location_field_size}, segment_bits={segment_bits}"
            )));
        }

        // The block table is unused by the read path; skip it.
        let block_count = (header_size - 8) / 8;
        for _ in 0..block_count {
            let _block_start = reader.read_u32::<BigEndian>()?;
            let _block_end = reader.read_u32::<BigEndian>()?;
        }

        // Align to a 16-byte boundary before the entry section.
        let current_pos = 16 + u64::from(header_size);
        let padding = (16 - (current_pos % 16)) % 16;
        if padding > 0 {
            reader.seek(SeekFrom::Current(padding as i64))?;
        }

        let entries_size = reader.read_u32::<LittleEndian>()?;
        let entries_hash = reader.read_u32::<LittleEndian>()?;
        debug!(
            "Entry section: size={}, hash={:08x}",
            entries_size, entries_hash
        );

        let entry_size = u32::from(key_field_size + location_field_size + length_field_size);
        if entries_size % entry_size != 0 {
            return Err(CascError::InvalidIndexFormat(format!(
                "Entry section size {entries_size} not a multiple of entry size {entry_size}"
            )));
        }
        let entry_count = entries_size / entry_size;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count {
            let entry = Self::parse_entry(
                reader,
                key_field_size,
                location_field_size,
                length_field_size,
                segment_bits,
            )?;

            if i < 5 {
                trace!(
                    "Entry {}: ekey={}, archive={}, offset={:x}, size={}",
                    i, entry.ekey, entry.location.archive_id, entry.location.offset,
                    entry.location.size
                );
            }

            entries.push(entry);
        }

        debug!("Parsed {} entries for bucket {:02x}", entries.len(), bucket);

        Ok(Self {
            entries,
            bucket,
            version,
        })
    }

    fn parse_entry<R: Read>(
        reader: &mut R,
        key_size: u8,
        location_size: u8,
        length_size: u8,
        segment_bits: u8,
    ) -> Result<IndexEntry> {
        let mut key_bytes = [0u8; 16];
        reader.read_exact(&mut key_bytes[..key_size as usize])?;
        // Truncated keys keep a zeroed tail; lookups match on the prefix.
        let ekey = EKey::new(key_bytes);

        let offset_size = segment_bits.div_ceil(8);
        let file_size = location_size - offset_size;

        // Archive number, little-endian
        let mut file_bytes = [0u8; 8];
        reader.read_exact(&mut file_bytes[..file_size as usize])?;
        let mut archive_id = u64::from_le_bytes(file_bytes);

        // Offset within the segment, big-endian
        let mut offset = 0u64;
        for _ in 0..offset_size {
            offset = (offset << 8) | u64::from(reader.read_u8()?);
        }

        // The high bits of the offset field spill into the archive number.
        let extra_bits = offset_size * 8 - segment_bits;
        archive_id <<= extra_bits;
        archive_id |= offset >> segment_bits;
        offset &= (1u64 << segment_bits) - 1;

        let size = match length_size {
            4 => reader.read_u32::<LittleEndian>()?,
            3 => {
                let mut bytes = [0u8; 4];
                reader.read_exact(&mut bytes[0..3])?;
                u32::from_le_bytes(bytes)
            }
            2 => u32::from(reader.read_u16::<LittleEndian>()?),
            1 => u32::from(reader.read_u8()?),
            _ => {
                return Err(CascError::InvalidIndexFormat(format!(
                    "Invalid length field size: {length_size}"
                )));
            }
        };

        Ok(IndexEntry {
            ekey,
            location: ArchiveLocation {
                archive_id: archive_id as u16,
                offset,
                size,
            },
        })
    }

    pub fn bucket(&self) -> u8 {
        self.bucket
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }
}
