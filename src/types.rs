//! Common types used throughout the CASC reader

use std::fmt;

pub(crate) const KEY_LENGTH: usize = 16;

/// Encoding key - MD5 of a file's bytes as stored on disk (post-encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EKey([u8; KEY_LENGTH]);

impl EKey {
    pub const fn new(data: [u8; KEY_LENGTH]) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let mut key = [0u8; KEY_LENGTH];
        if data.len() == KEY_LENGTH {
            key.copy_from_slice(data);
            Some(Self(key))
        } else {
            None
        }
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// First 9 bytes, as stored in `.idx` entries.
    pub fn truncated(&self) -> [u8; 9] {
        let mut truncated = [0u8; 9];
        truncated.copy_from_slice(&self.0[0..9]);
        truncated
    }

    /// Bucket index for this EKey (XOR fold of all bytes, low nibble).
    pub fn bucket_index(&self) -> u8 {
        self.0.iter().fold(0u8, |acc, &byte| acc ^ byte) & 0x0F
    }
}

impl fmt::Display for EKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Content key - MD5 of a file's logical (decoded) content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CKey([u8; KEY_LENGTH]);

impl CKey {
    pub const fn new(data: [u8; KEY_LENGTH]) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let mut key = [0u8; KEY_LENGTH];
        if data.len() == KEY_LENGTH {
            key.copy_from_slice(data);
            Some(Self(key))
        } else {
            None
        }
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_LENGTH]
    }
}

impl fmt::Display for CKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Location of a stored span within an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLocation {
    /// Archive file number (data.NNN)
    pub archive_id: u16,
    /// Offset within the archive file
    pub offset: u64,
    /// Size of the encoded data
    pub size: u32,
}

/// Entry in an index file
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The encoding key for this span
    pub ekey: EKey,
    /// Location in archive
    pub location: ArchiveLocation,
}

/// One resolved span of a file. A file's logical content is the
/// concatenation of its spans, decoded in order.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    /// Encoding key of this span's stored bytes
    pub ekey: EKey,
    /// Where the encoded bytes live on disk
    pub location: ArchiveLocation,
    /// Size of this span once decoded
    pub logical_size: u64,
}

/// Which identity field of a [`FileRecord`] is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameType {
    /// `file_name` is a full file path
    Full,
    /// `file_name` was synthesized from the data ID
    DataId,
    /// `file_name` is the hex form of the content key
    CKey,
    /// `file_name` is the hex form of the encoded key
    EKey,
}

/// Lookup key for [`open_file`](crate::CascStorage::open_file).
#[derive(Debug, Clone)]
pub enum FileLocator<'a> {
    /// Full file path (case-insensitive, `/` and `\` both accepted)
    Path(&'a str),
    /// Numeric file data ID
    DataId(u32),
    /// Content key
    ContentKey(CKey),
    /// Encoded key
    EncodedKey(EKey),
}

impl fmt::Display for FileLocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "path {p:?}"),
            Self::DataId(id) => write!(f, "data id {id}"),
            Self::ContentKey(k) => write!(f, "ckey {k}"),
            Self::EncodedKey(k) => write!(f, "ekey {k}"),
        }
    }
}

/// Feature bitmask advertised by a storage.
///
/// Flag values match the wire encoding reported through
/// [`InfoClass::Features`](crate::storage::InfoClass).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(u32);

impl Features {
    /// File names are supported by the storage.
    pub const FILE_NAMES: u32 = 0x0000_0001;
    /// The root maps names to content keys (otherwise encoded keys).
    pub const ROOT_CKEY: u32 = 0x0000_0002;
    /// Tags are supported by the storage.
    pub const TAGS: u32 = 0x0000_0004;
    /// All files carry name hashes.
    pub const FILE_NAME_HASHES: u32 = 0x0000_0008;
    /// Some files carry name hashes.
    pub const FILE_NAME_HASHES_OPTIONAL: u32 = 0x0000_0010;
    /// Files are indexed by numeric data ID.
    pub const FILE_DATA_IDS: u32 = 0x0000_0020;
    /// Locale flags are meaningful.
    pub const LOCALE_FLAGS: u32 = 0x0000_0040;
    /// Content flags are meaningful.
    pub const CONTENT_FLAGS: u32 = 0x0000_0080;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }
}

/// Product identification for a storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Code name of the product (e.g. "wow")
    pub code_name: String,
    /// Build number, or 0 when it could not be determined
    pub build_number: u32,
}

/// A named tag carried by the storage, with its bit value in the
/// per-file tag mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTag {
    pub name: String,
    pub value: u32,
}

/// One entry describing a file's identity and metadata, as yielded by
/// enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Full name, or a synthesized identifier when the name is unknown
    pub file_name: String,
    /// Which identity field is authoritative
    pub name_type: NameType,
    /// Content key, present only when the root maps names to content hashes
    pub ckey: Option<CKey>,
    /// Encoded key of the first span; always present
    pub ekey: EKey,
    /// Logical (decoded) size in bytes
    pub file_size: u64,
    /// Numeric data ID, if the container indexes by ID
    pub data_id: Option<u32>,
    /// Locale flags, if the storage supports them
    pub locale_flags: Option<u32>,
    /// Content flags, if the storage supports them
    pub content_flags: Option<u32>,
    /// Tag bitmask; 0 when the storage has no tags
    pub tag_mask: u64,
    /// Number of spans composing the file
    pub span_count: u32,
    /// Whether every span is resident in a local archive
    pub local: bool,
}

impl FileRecord {
    /// Name component after the last path separator. Equal to
    /// `file_name` when there is no separator.
    pub fn plain_name(&self) -> &str {
        self.file_name
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ekey_bucket_index() {
        let key = EKey::new([0u8; 16]);
        assert_eq!(key.bucket_index(), 0);

        let mut data = [0u8; 16];
        data[0] = 0x12;
        data[1] = 0x07;
        // 0x12 ^ 0x07 = 0x15, low nibble 0x05
        assert_eq!(EKey::new(data).bucket_index(), 0x05);
    }

    #[test]
    fn test_key_hex_round_trip() {
        let key = EKey::new([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ]);
        let hex = key.to_string();
        assert_eq!(hex, "000102030405060708090a0b0c0d0e0f");
        assert_eq!(EKey::from_hex(&hex), Some(key));
        assert_eq!(EKey::from_hex("abc"), None);
    }

    #[test]
    fn test_truncated_key() {
        let key = EKey::new([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        assert_eq!(key.truncated(), [1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_features_flags() {
        let mut features = Features::empty();
        assert!(!features.contains(Features::FILE_NAMES));

        features.insert(Features::FILE_NAMES);
        features.insert(Features::ROOT_CKEY);
        assert!(features.contains(Features::FILE_NAMES));
        assert!(features.contains(Features::ROOT_CKEY));
        assert!(!features.contains(Features::TAGS));
        assert_eq!(features.bits(), 0x03);
    }

    #[test]
    fn test_plain_name() {
        let mut record = FileRecord {
            file_name: "Interface\\Icons\\icon.blp".to_string(),
            name_type: NameType::Full,
            ckey: None,
            ekey: EKey::new([0u8; 16]),
            file_size: 0,
            data_id: None,
            locale_flags: None,
            content_flags: None,
            tag_mask: 0,
            span_count: 1,
            local: true,
        };
        assert_eq!(record.plain_name(), "icon.blp");

        record.file_name = "toplevel.txt".to_string();
        assert_eq!(record.plain_name(), "toplevel.txt");
    }
}
