//! Fixture builders: complete on-disk storages assembled in tempdirs.

// Not every test binary uses every builder.
#![allow(dead_code)]

use casc_reader::jenkins3::hashpath;
use casc_reader::{ArchiveLocation, CKey, EKey};
use std::path::PathBuf;
use tempfile::TempDir;

/// Route traces through the test harness so failing tests show them.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Wrap logical content in a single-chunk uncompressed BLTE stream.
pub fn blte_none(content: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"BLTE");
    data.extend_from_slice(&0u32.to_be_bytes());
    data.push(b'N');
    data.extend_from_slice(content);
    data
}

/// Wrap logical content in a zlib-compressed BLTE stream.
pub fn blte_zlib(content: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut data = Vec::new();
    data.extend_from_slice(b"BLTE");
    data.extend_from_slice(&0u32.to_be_bytes());
    data.push(b'Z');
    data.extend_from_slice(&compressed);
    data
}

/// Multi-chunk BLTE stream with a checksummed chunk table. Each input
/// is one logical piece, stored uncompressed.
pub fn blte_chunked(pieces: &[&[u8]]) -> Vec<u8> {
    let chunks: Vec<Vec<u8>> = pieces
        .iter()
        .map(|piece| {
            let mut chunk = vec![b'N'];
            chunk.extend_from_slice(piece);
            chunk
        })
        .collect();

    let header_size = 8 + 4 + chunks.len() * 24;
    let mut data = Vec::new();
    data.extend_from_slice(b"BLTE");
    data.extend_from_slice(&(header_size as u32).to_be_bytes());
    data.push(0x0F);
    data.extend_from_slice(&(chunks.len() as u32).to_be_bytes()[1..4]);

    for (chunk, piece) in chunks.iter().zip(pieces) {
        data.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        data.extend_from_slice(&(piece.len() as u32).to_be_bytes());
        data.extend_from_slice(&md5::compute(chunk).0);
    }
    for chunk in &chunks {
        data.extend_from_slice(chunk);
    }
    data
}

/// A BLTE stream whose chunk cannot decode (unknown mode byte).
pub fn blte_corrupt() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"BLTE");
    data.extend_from_slice(&0u32.to_be_bytes());
    data.push(b'X');
    data.extend_from_slice(&[0u8; 8]);
    data
}

struct FileSpec {
    data_id: u32,
    name: Option<String>,
    ckey: CKey,
    spans: Vec<(EKey, u64)>,
}

/// Assembles a complete storage directory: `.build.info`, bucket `.idx`
/// files and a `data.000` archive, plus a root manifest when files are
/// registered.
pub struct StorageBuilder {
    archive: Vec<u8>,
    entries: Vec<(EKey, ArchiveLocation)>,
    files: Vec<FileSpec>,
    product: String,
    version: String,
    tags: String,
}

impl StorageBuilder {
    pub fn new() -> Self {
        init_tracing();
        Self {
            archive: Vec::new(),
            entries: Vec::new(),
            files: Vec::new(),
            product: "wow".to_string(),
            version: "11.0.0.12345".to_string(),
            tags: "Windows x86_64".to_string(),
        }
    }

    /// Store an already-encoded BLTE blob in the archive and index it.
    /// Returns the span's encoding key.
    pub fn add_encoded(&mut self, encoded: &[u8]) -> EKey {
        let ekey = EKey::new(md5::compute(encoded).0);
        let location = ArchiveLocation {
            archive_id: 0,
            offset: self.archive.len() as u64,
            size: encoded.len() as u32,
        };
        self.archive.extend_from_slice(encoded);
        self.entries.push((ekey, location));
        ekey
    }

    /// Store logical content as one uncompressed span.
    pub fn add_content(&mut self, content: &[u8]) -> EKey {
        self.add_encoded(&blte_none(content))
    }

    /// Register a named file in the root manifest. Returns its content
    /// key.
    pub fn add_file(&mut self, name: &str, data_id: u32, spans: &[(EKey, u64)]) -> CKey {
        let ckey = CKey::new(md5::compute(data_id.to_le_bytes()).0);
        self.files.push(FileSpec {
            data_id,
            name: Some(name.to_string()),
            ckey,
            spans: spans.to_vec(),
        });
        ckey
    }

    /// Register an unnamed (ID-only) file in the root manifest.
    pub fn add_unnamed_file(&mut self, data_id: u32, spans: &[(EKey, u64)]) -> CKey {
        let ckey = CKey::new(md5::compute(data_id.to_le_bytes()).0);
        self.files.push(FileSpec {
            data_id,
            name: None,
            ckey,
            spans: spans.to_vec(),
        });
        ckey
    }

    /// Write everything out. Returns the tempdir (keep it alive) and
    /// the storage root path.
    pub fn build(mut self) -> (TempDir, PathBuf) {
        let root_key = if self.files.is_empty() {
            None
        } else {
            let manifest = self.build_manifest();
            Some(self.add_encoded(&blte_none(&manifest)))
        };

        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let data_dir = root.join("Data").join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        std::fs::write(root.join(".build.info"), self.build_info_content(root_key)).unwrap();
        std::fs::write(data_dir.join("data.000"), &self.archive).unwrap();

        for bucket in 0x00..=0x0F {
            let entries: Vec<_> = self
                .entries
                .iter()
                .filter(|(ekey, _)| ekey.bucket_index() == bucket)
                .cloned()
                .collect();
            if entries.is_empty() {
                continue;
            }
            let name = format!("{bucket:02x}00000001.idx");
            std::fs::write(data_dir.join(name), build_idx(bucket, &entries)).unwrap();
        }

        (dir, root)
    }

    fn build_info_content(&self, root_key: Option<EKey>) -> String {
        format!(
            "Branch!STRING:0|Active!DEC:1|Root Key!HEX:16|Tags!STRING:0|Version!STRING:0|Product!STRING:0\n\
             us|1|{}|{}|{}|{}\n",
            root_key.map(|k| k.to_string()).unwrap_or_default(),
            self.tags,
            self.version,
            self.product,
        )
    }

    fn build_manifest(&mut self) -> Vec<u8> {
        // Named files go in the first block, unnamed in the second.
        self.files.sort_by_key(|f| (f.name.is_none(), f.data_id));
        let split = self.files.iter().filter(|f| f.name.is_some()).count();
        let (named, unnamed) = self.files.split_at(split);

        let mut data = Vec::new();
        data.extend_from_slice(b"TSFM");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(self.files.len() as u32).to_le_bytes());
        data.extend_from_slice(&(named.len() as u32).to_le_bytes());

        write_block(&mut data, named, true);
        write_block(&mut data, unnamed, false);
        data
    }
}

fn write_block(data: &mut Vec<u8>, files: &[FileSpec], named: bool) {
    if files.is_empty() {
        return;
    }
    data.extend_from_slice(&(files.len() as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // content flags
    data.extend_from_slice(&0x2u32.to_le_bytes()); // locale flags
    data.extend_from_slice(&0u64.to_le_bytes()); // tag mask
    data.push(u8::from(named));

    let mut prev = 0i64;
    for (i, file) in files.iter().enumerate() {
        let delta = if i == 0 {
            i64::from(file.data_id)
        } else {
            i64::from(file.data_id) - prev - 1
        };
        data.extend_from_slice(&(delta as i32).to_le_bytes());
        prev = i64::from(file.data_id);
    }

    for file in files {
        data.extend_from_slice(file.ckey.as_bytes());
        data.push(file.spans.len() as u8);
        for (ekey, size) in &file.spans {
            data.extend_from_slice(ekey.as_bytes());
            data.extend_from_slice(&size.to_le_bytes()[..5]);
        }
    }

    if named {
        for file in files {
            let hash = file.name.as_deref().map(hashpath).unwrap_or(0);
            data.extend_from_slice(&hash.to_le_bytes());
        }
    }
}

/// Serialize one bucket's `.idx` file in the v7 layout.
pub fn build_idx(bucket: u8, entries: &[(EKey, ArchiveLocation)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&7u16.to_le_bytes());
    data.push(bucket);
    data.push(4); // length field size
    data.push(5); // location field size
    data.push(9); // key field size
    data.push(30); // segment bits
    data.push(0);

    // Align the entry section to 16 bytes
    data.extend_from_slice(&[0u8; 8]);

    let entry_size = 9 + 5 + 4;
    data.extend_from_slice(&((entries.len() * entry_size) as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());

    for (ekey, location) in entries {
        data.extend_from_slice(&ekey.truncated());
        let combined = (u64::from(location.archive_id) << 30) | location.offset;
        data.push((combined >> 32) as u8);
        data.extend_from_slice(&((combined & 0xFFFF_FFFF) as u32).to_be_bytes());
        data.extend_from_slice(&location.size.to_le_bytes());
    }

    data
}
