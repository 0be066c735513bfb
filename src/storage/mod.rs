//! Storage handle: opening a local CASC installation and its files.

mod cursor;
mod stream;

pub use cursor::FileCursor;
pub use stream::FileStream;

use crate::archive::Archive;
use crate::blte::decode_blte;
use crate::build_info::BuildInfo;
use crate::error::{CascError, Result};
use crate::index::{IdxFile, KeyIndex};
use crate::root::{RootRecord, RootResolver};
use crate::types::{
    EKey, Features, FileLocator, FileRecord, NameType, Product, Span, StorageTag,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decoded spans kept hot across streams.
const SPAN_CACHE_CAPACITY: usize = 64;

/// Wire value meaning "flags not set" in manifest records.
const FLAGS_SENTINEL: u32 = u32::MAX;

/// Queryable storage properties, for the buffer-based
/// [`query_info`](CascStorage::query_info) interface. Typed accessors
/// on [`CascStorage`] cover the same data without the buffer dance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoClass {
    /// Number of files fully resident in local archives; `u32le`
    LocalFileCount,
    /// Number of files the storage knows about; `u32le`
    TotalFileCount,
    /// Feature bitmask; `u32le`
    Features,
    /// Not tracked by local storages; always `UnsupportedOperation`
    InstalledLocales,
    /// 28-byte NUL-padded code name, then `build_number u32le`
    Product,
    /// `count u64le`, `reserved u64le`, then per tag `name_len u32le`
    /// (including NUL), `value u32le`, name bytes, NUL
    Tags,
    /// `<root path>:<product code>` bytes, NUL-terminated
    PathProduct,
}

/// An opened local CASC storage.
///
/// Immutable after [`open`](Self::open): index, root and archive tables
/// never change, so lookups take `&self` and the handle is `Sync`.
/// Streams and cursors borrow the storage, which keeps them from
/// outliving it.
pub struct CascStorage {
    root_path: PathBuf,
    build_info: BuildInfo,
    index: KeyIndex,
    archives: HashMap<u16, Archive>,
    root: Option<RootResolver>,
    cache: Mutex<LruCache<EKey, Arc<Vec<u8>>>>,
    total_files: u32,
    local_files: u32,
}

impl CascStorage {
    /// Open the storage rooted at `path`.
    ///
    /// `path` may be the installation root (holding `.build.info` and
    /// `Data/data/`) or the data directory itself; `.build.info` is
    /// then searched in the ancestors. Any failure to locate or read
    /// the container surfaces as [`CascError::OpenFailed`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let given = path.as_ref();
        let root_path = std::fs::canonicalize(given).map_err(|source| CascError::OpenFailed {
            path: given.to_path_buf(),
            source,
        })?;

        let build_info_path = locate_build_info(&root_path)?;
        let build_info = BuildInfo::from_path(&build_info_path)?;
        let data_path = locate_data_dir(&root_path)?;

        info!(
            "Opening {} build {} at {}",
            build_info.product.code_name,
            build_info.product.build_number,
            root_path.display()
        );

        let mut index = KeyIndex::new();
        let mut archives = HashMap::new();
        load_data_dir(&data_path, &mut index, &mut archives)?;
        debug!(
            "Loaded {} index entries from {} buckets, {} archives",
            index.len(),
            index.buckets_loaded(),
            archives.len()
        );

        let mut storage = Self {
            root_path,
            build_info,
            index,
            archives,
            root: None,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SPAN_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            total_files: 0,
            local_files: 0,
        };

        if let Some(root_key) = storage.build_info.root_key {
            let resolver = storage.load_root(&root_key)?;
            storage.register_root_spans(&resolver);
            storage.root = Some(resolver);
        } else {
            debug!("No root key; storage opens with key-only enumeration");
        }

        let records = storage.enumerate_records();
        storage.total_files = records.len() as u32;
        storage.local_files = records.iter().filter(|r| r.local).count() as u32;

        Ok(storage)
    }

    /// Fetch and parse the root manifest addressed by the build's root
    /// key.
    fn load_root(&self, root_key: &EKey) -> Result<RootResolver> {
        // A build that names a root key the local indices cannot
        // resolve is structurally broken, not an ordinary lookup miss.
        let location = self.index.resolve_ekey(root_key).ok_or_else(|| {
            CascError::Corruption(format!(
                "Root manifest {root_key} is not present in the local indices"
            ))
        })?;
        let encoded = self.read_encoded_span(&location)?;
        let decoded = decode_blte(&encoded)?;
        let manifest = crate::root::RootManifest::parse(&mut io::Cursor::new(decoded))?;
        debug!(
            "Root manifest holds {} records ({} named)",
            manifest.total_file_count, manifest.named_file_count
        );
        Ok(RootResolver::new(manifest))
    }

    /// Register every fully-local record's span list under its content
    /// key, so content-key lookups resolve without the manifest.
    fn register_root_spans(&mut self, resolver: &RootResolver) {
        let mut registered = 0usize;
        for record in resolver.records() {
            if record.ckey.is_zero() {
                continue;
            }
            if let Some(spans) = self.spans_for(record) {
                self.index.register_spans(record.ckey, spans);
                registered += 1;
            }
        }
        debug!("Registered {} content keys from the root manifest", registered);
    }

    /// Resolve a record's span references against the local index.
    /// `None` when any span is not resident.
    fn spans_for(&self, record: &RootRecord) -> Option<Vec<Span>> {
        record
            .spans
            .iter()
            .map(|span| {
                self.index.resolve_ekey(&span.ekey).map(|location| Span {
                    ekey: span.ekey,
                    location,
                    logical_size: span.logical_size,
                })
            })
            .collect()
    }

    /// Open a file for reading.
    ///
    /// Accepts any locator kind the storage supports. A locator that
    /// does not resolve end to end, including spans missing from the
    /// local archives, fails with [`CascError::FileNotFound`] naming
    /// the locator.
    pub fn open_file(&self, locator: FileLocator<'_>) -> Result<FileStream<'_>> {
        let not_found = || CascError::FileNotFound(locator.to_string());

        match &locator {
            FileLocator::Path(path) => {
                let root = self.root.as_ref().ok_or_else(not_found)?;
                let record = root.resolve_path(path).ok_or_else(not_found)?;
                let spans = self.spans_for(record).ok_or_else(not_found)?;
                let mut file_record = self.record_from_root(record);
                file_record.file_name = path.to_string();
                file_record.name_type = NameType::Full;
                Ok(FileStream::new(self, spans, file_record))
            }
            FileLocator::DataId(data_id) => {
                let root = self.root.as_ref().ok_or_else(not_found)?;
                let record = root.resolve_data_id(*data_id).ok_or_else(not_found)?;
                let spans = self.spans_for(record).ok_or_else(not_found)?;
                let file_record = self.record_from_root(record);
                Ok(FileStream::new(self, spans, file_record))
            }
            FileLocator::ContentKey(ckey) => {
                let spans = self.index.resolve_ckey(ckey).ok_or_else(not_found)?.to_vec();
                let file_size = spans.iter().map(|s| s.logical_size).sum();
                let record = FileRecord {
                    file_name: ckey.to_string(),
                    name_type: NameType::CKey,
                    ckey: Some(*ckey),
                    ekey: spans[0].ekey,
                    file_size,
                    data_id: None,
                    locale_flags: None,
                    content_flags: None,
                    tag_mask: 0,
                    span_count: spans.len() as u32,
                    local: true,
                };
                Ok(FileStream::new(self, spans, record))
            }
            FileLocator::EncodedKey(ekey) => {
                let ekey = *ekey;
                let location = self.index.resolve_ekey(&ekey).ok_or_else(not_found)?;
                let mut span = Span {
                    ekey,
                    location,
                    logical_size: 0,
                };
                // Size is unknown until the span decodes; do it up
                // front so the stream can report it and seek from end.
                let decoded = self.decode_span(&span)?;
                span.logical_size = decoded.len() as u64;
                let record = FileRecord {
                    file_name: ekey.to_string(),
                    name_type: NameType::EKey,
                    ckey: None,
                    ekey,
                    file_size: span.logical_size,
                    data_id: None,
                    locale_flags: None,
                    content_flags: None,
                    tag_mask: 0,
                    span_count: 1,
                    local: true,
                };
                Ok(FileStream::new(self, vec![span], record))
            }
        }
    }

    /// Enumeration cursor over every file the storage knows about.
    pub fn files(&self) -> FileCursor<'_> {
        FileCursor::new(self)
    }

    /// Full record list: root manifest records in manifest order, then
    /// orphan index entries in key order.
    pub(crate) fn enumerate_records(&self) -> Vec<FileRecord> {
        let mut records = Vec::new();
        let mut claimed: HashSet<[u8; 9]> = HashSet::new();

        if let Some(root) = &self.root {
            for record in root.records() {
                for span in &record.spans {
                    claimed.insert(span.ekey.truncated());
                }
                records.push(self.record_from_root(record));
            }
        }

        let mut orphans: Vec<_> = self
            .index
            .entries()
            .filter(|(ekey, _)| !claimed.contains(&ekey.truncated()))
            .collect();
        orphans.sort_by_key(|&(ekey, _)| ekey);

        for (ekey, location) in orphans {
            records.push(FileRecord {
                file_name: ekey.to_string(),
                name_type: NameType::EKey,
                ckey: None,
                ekey,
                // Logical size is unknown without decoding; report the
                // stored size
                file_size: u64::from(location.size),
                data_id: None,
                locale_flags: None,
                content_flags: None,
                tag_mask: 0,
                span_count: 1,
                local: true,
            });
        }

        records
    }

    fn record_from_root(&self, record: &RootRecord) -> FileRecord {
        let local = self.spans_for(record).is_some();
        FileRecord {
            file_name: format!("FILE{:08}.dat", record.data_id),
            name_type: NameType::DataId,
            ckey: (!record.ckey.is_zero()).then_some(record.ckey),
            ekey: record.spans[0].ekey,
            file_size: record.file_size(),
            data_id: Some(record.data_id),
            locale_flags: (record.locale_flags != FLAGS_SENTINEL).then_some(record.locale_flags),
            content_flags: (record.content_flags != FLAGS_SENTINEL).then_some(record.content_flags),
            tag_mask: record.tag_mask,
            span_count: record.spans.len() as u32,
            local,
        }
    }

    /// Decoded bytes of one span, via the shared cache.
    pub(crate) fn decode_span(&self, span: &Span) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.cache.lock().get(&span.ekey) {
            return Ok(Arc::clone(data));
        }

        let encoded = self.read_encoded_span(&span.location)?;
        let decoded = Arc::new(decode_blte(&encoded)?);
        if span.logical_size != 0 && decoded.len() as u64 != span.logical_size {
            return Err(CascError::Corruption(format!(
                "Span {} decoded to {} bytes, manifest declares {}",
                span.ekey,
                decoded.len(),
                span.logical_size
            )));
        }

        self.cache.lock().put(span.ekey, Arc::clone(&decoded));
        Ok(decoded)
    }

    fn read_encoded_span(&self, location: &crate::types::ArchiveLocation) -> Result<Vec<u8>> {
        let archive = self.archives.get(&location.archive_id).ok_or_else(|| {
            CascError::FileNotFound(format!("archive data.{:03}", location.archive_id))
        })?;
        archive.read_at(location)
    }

    // Typed info accessors.

    /// Number of files fully resident in local archives.
    pub fn local_file_count(&self) -> u32 {
        self.local_files
    }

    /// Number of files the storage knows about, including non-resident
    /// root records and orphan index entries.
    pub fn total_file_count(&self) -> u32 {
        self.total_files
    }

    pub fn product(&self) -> &Product {
        &self.build_info.product
    }

    pub fn tags(&self) -> &[StorageTag] {
        &self.build_info.tags
    }

    /// `<root path>:<product code>`, the form the info query reports.
    pub fn path_product(&self) -> String {
        format!(
            "{}:{}",
            self.root_path.display(),
            self.build_info.product.code_name
        )
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Feature bitmask advertised by this storage.
    pub fn features(&self) -> Features {
        let mut features = self
            .root
            .as_ref()
            .map(RootResolver::features)
            .unwrap_or_default();
        if !self.build_info.tags.is_empty() {
            features.insert(Features::TAGS);
        }
        features
    }

    /// Buffer-based info query, two-phase: a buffer smaller than the
    /// payload fails with [`CascError::InsufficientBuffer`] carrying
    /// the exact required size, and a retry with that size succeeds.
    /// Returns the number of bytes written.
    pub fn query_info(&self, class: InfoClass, buf: &mut [u8]) -> Result<usize> {
        let payload = self.info_payload(class)?;
        if buf.len() < payload.len() {
            return Err(CascError::InsufficientBuffer {
                required: payload.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    fn info_payload(&self, class: InfoClass) -> Result<Vec<u8>> {
        match class {
            InfoClass::LocalFileCount => Ok(self.local_files.to_le_bytes().to_vec()),
            InfoClass::TotalFileCount => Ok(self.total_files.to_le_bytes().to_vec()),
            InfoClass::Features => Ok(self.features().bits().to_le_bytes().to_vec()),
            InfoClass::InstalledLocales => Err(CascError::UnsupportedOperation(
                "installed locales are not tracked by local storages",
            )),
            InfoClass::Product => {
                let mut out = vec![0u8; 32];
                let name = self.build_info.product.code_name.as_bytes();
                let n = name.len().min(27);
                if n < name.len() {
                    warn!("Product code name truncated to {} bytes", n);
                }
                out[..n].copy_from_slice(&name[..n]);
                out[28..32]
                    .copy_from_slice(&self.build_info.product.build_number.to_le_bytes());
                Ok(out)
            }
            InfoClass::Tags => {
                let tags = &self.build_info.tags;
                let mut out = Vec::new();
                out.extend_from_slice(&(tags.len() as u64).to_le_bytes());
                out.extend_from_slice(&0u64.to_le_bytes());
                for tag in tags {
                    out.extend_from_slice(&((tag.name.len() + 1) as u32).to_le_bytes());
                    out.extend_from_slice(&tag.value.to_le_bytes());
                    out.extend_from_slice(tag.name.as_bytes());
                    out.push(0);
                }
                Ok(out)
            }
            InfoClass::PathProduct => {
                let mut out = self.path_product().into_bytes();
                out.push(0);
                Ok(out)
            }
        }
    }
}

impl std::fmt::Debug for CascStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascStorage")
            .field("root_path", &self.root_path)
            .field("product", &self.build_info.product)
            .field("total_files", &self.total_files)
            .field("local_files", &self.local_files)
            .finish_non_exhaustive()
    }
}

/// Find `.build.info` at `start` or one of its ancestors. The data
/// directory sits two levels below the installation root, so two
/// ancestor hops cover a caller passing `Data` or `Data/data`.
fn locate_build_info(start: &Path) -> Result<PathBuf> {
    let mut dir = start;
    for _ in 0..3 {
        let candidate = dir.join(".build.info");
        if candidate.is_file() {
            return Ok(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    Err(CascError::OpenFailed {
        path: start.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "no .build.info found"),
    })
}

/// Find the directory holding `.idx` and `data.NNN` files.
fn locate_data_dir(root: &Path) -> Result<PathBuf> {
    for candidate in [root.join("Data").join("data"), root.join("data")] {
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }
    if root.is_dir() {
        return Ok(root.to_path_buf());
    }
    Err(CascError::OpenFailed {
        path: root.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "no data directory found"),
    })
}

/// Load every `.idx` bucket and `data.NNN` archive in the directory.
fn load_data_dir(
    data_path: &Path,
    index: &mut KeyIndex,
    archives: &mut HashMap<u16, Archive>,
) -> Result<()> {
    let entries = std::fs::read_dir(data_path).map_err(|source| CascError::OpenFailed {
        path: data_path.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(CascError::Io)?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(".idx") {
            match IdxFile::parse_file(&path) {
                Ok(idx) => index.add_idx(&idx),
                Err(e) => warn!("Skipping unreadable index {}: {}", name, e),
            }
        } else if let Some(id) = name
            .strip_prefix("data.")
            .and_then(|suffix| suffix.parse::<u16>().ok())
        {
            archives.insert(id, Archive::open(id, path)?);
        }
    }

    Ok(())
}
