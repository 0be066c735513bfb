//! BLTE (Block Table Encoded) span decoding.
//!
//! Every stored span in the container is a BLTE stream: a header with an
//! optional chunk table, followed by chunks that each carry a one-byte
//! mode prefix. This module handles parsing and decoding for the
//! read-only modes; encrypted chunks are rejected.

mod decode;
mod header;

pub use decode::{decode_blte, decode_chunk};
pub use header::{BlteHeader, ChunkInfo};

/// BLTE magic bytes
pub const BLTE_MAGIC: [u8; 4] = *b"BLTE";

pub(crate) const MD5_LENGTH: usize = 16;
pub(crate) type Md5 = [u8; MD5_LENGTH];

/// Chunk encoding mode, from the one-byte chunk prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// `N` - stored as-is
    None,
    /// `Z` - zlib
    ZLib,
    /// `4` - LZ4 with a size prefix
    Lz4,
    /// `F` - nested BLTE stream
    Frame,
    /// `E` - encrypted (recognized but unsupported)
    Encrypted,
}

impl EncodingMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(Self::None),
            b'Z' => Some(Self::ZLib),
            b'4' => Some(Self::Lz4),
            b'F' => Some(Self::Frame),
            b'E' => Some(Self::Encrypted),
            _ => None,
        }
    }
}
