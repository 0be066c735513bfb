//! BLTE chunk decoding

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read};
use tracing::{debug, trace};

use super::{BlteHeader, EncodingMode};
use crate::error::{CascError, Result};

/// Decode a complete BLTE stream into its logical bytes.
pub fn decode_blte(data: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(data);
    let header = BlteHeader::parse(&mut cursor, data.len() as u64)?;

    debug!("Decoding BLTE stream with {} chunks", header.chunk_count());

    let mut result = Vec::with_capacity(header.total_decoded_size() as usize);

    for (chunk_index, chunk) in header.chunks().iter().enumerate() {
        let start = chunk.encoded_offset as usize;
        let end = start + chunk.encoded_size as usize;
        let encoded = data.get(start..end).ok_or_else(|| {
            CascError::Corruption(format!(
                "Chunk {chunk_index} extends past stream end ({end} > {})",
                data.len()
            ))
        })?;

        // Zero checksum means unverified (synthetic single-chunk entries).
        if chunk.checksum != [0u8; 16] {
            let actual = md5::compute(encoded).0;
            if actual != chunk.checksum {
                return Err(CascError::ChecksumMismatch {
                    expected: hex::encode(chunk.checksum),
                    actual: hex::encode(actual),
                });
            }
        }

        let decoded = decode_chunk(encoded)?;
        if chunk.decoded_size != 0 && decoded.len() as u64 != chunk.decoded_size {
            return Err(CascError::Corruption(format!(
                "Chunk {chunk_index} decoded to {} bytes, table declares {}",
                decoded.len(),
                chunk.decoded_size
            )));
        }
        result.extend_from_slice(&decoded);
    }

    Ok(result)
}

/// Decode a single chunk, including its mode prefix byte.
pub fn decode_chunk(data: &[u8]) -> Result<Vec<u8>> {
    let Some((&mode_byte, payload)) = data.split_first() else {
        return Err(CascError::Corruption("Empty BLTE chunk".to_string()));
    };

    let mode = EncodingMode::from_byte(mode_byte).ok_or_else(|| {
        CascError::Corruption(format!("Unknown chunk encoding mode: {mode_byte:#04x}"))
    })?;

    trace!("Decoding chunk with mode {:?}", mode);

    match mode {
        EncodingMode::None => Ok(payload.to_vec()),
        EncodingMode::ZLib => decode_zlib(payload),
        EncodingMode::Lz4 => decode_lz4(payload),
        EncodingMode::Frame => decode_blte(payload),
        EncodingMode::Encrypted => Err(CascError::UnsupportedOperation(
            "encrypted BLTE chunks require a key service",
        )),
    }
}

/// Mode 'Z' - zlib
fn decode_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();

    decoder
        .read_to_end(&mut result)
        .map_err(|e| CascError::DecompressionFailed(format!("zlib: {e}")))?;

    debug!("zlib: {} bytes -> {} bytes", data.len(), result.len());
    Ok(result)
}

/// Mode '4' - LZ4 with decoded/encoded size prefix
fn decode_lz4(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 8 {
        return Err(CascError::Corruption(format!(
            "LZ4 chunk too short: {} bytes",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let decoded_size = cursor.read_u32::<LittleEndian>()? as usize;
    let encoded_size = cursor.read_u32::<LittleEndian>()? as usize;

    if encoded_size + 8 != data.len() {
        return Err(CascError::Corruption(format!(
            "LZ4 size mismatch: declared {}, chunk holds {}",
            encoded_size + 8,
            data.len()
        )));
    }

    let result = lz4_flex::decompress(&data[8..], decoded_size)
        .map_err(|e| CascError::DecompressionFailed(format!("LZ4: {e}")))?;

    debug!("LZ4: {} bytes -> {} bytes", data.len(), result.len());
    Ok(result)
}
