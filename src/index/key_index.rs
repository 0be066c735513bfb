//! In-memory key lookup built from the container's index files.
//!
//! Resolution accepts either key kind: encoded keys hit the `.idx`
//! entries directly, content keys go through the alias table built from
//! the root manifest. Read-only after load, safe to share across threads.

use crate::index::IdxFile;
use crate::index::idx_parser::TRUNCATED_KEY_LENGTH;
use crate::types::{ArchiveLocation, CKey, EKey, Span};
use std::collections::HashMap;
use tracing::debug;

pub struct KeyIndex {
    /// Truncated EKey -> physical location, merged across all buckets
    by_ekey: HashMap<[u8; TRUNCATED_KEY_LENGTH], ArchiveLocation>,
    /// CKey -> ordered span list, registered from the root manifest
    by_ckey: HashMap<CKey, Vec<Span>>,
    buckets_loaded: u16,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self {
            by_ekey: HashMap::new(),
            by_ckey: HashMap::new(),
            buckets_loaded: 0,
        }
    }

    /// Merge one parsed `.idx` file into the index.
    pub fn add_idx(&mut self, idx: &IdxFile) {
        for entry in idx.entries() {
            self.by_ekey.insert(entry.ekey.truncated(), entry.location);
        }
        self.buckets_loaded += 1;
        debug!(
            "Merged bucket {:02x}: {} entries, {} total",
            idx.bucket(),
            idx.len(),
            self.by_ekey.len()
        );
    }

    /// Register a content key's ordered span list, resolved from the
    /// root manifest. Called once per record at load time.
    pub fn register_spans(&mut self, ckey: CKey, spans: Vec<Span>) {
        self.by_ckey.insert(ckey, spans);
    }

    /// Look up a location by encoded key. Matches on the truncated
    /// 9-byte prefix, the form the on-disk index stores.
    pub fn resolve_ekey(&self, ekey: &EKey) -> Option<ArchiveLocation> {
        self.by_ekey.get(&ekey.truncated()).copied()
    }

    /// Look up the ordered span list for a content key. `None` is a
    /// normal miss, not an error.
    pub fn resolve_ckey(&self, ckey: &CKey) -> Option<&[Span]> {
        self.by_ckey.get(ckey).map(Vec::as_slice)
    }

    /// Whether every span of the list is resident in a local archive.
    pub fn is_local(&self, spans: &[Span]) -> bool {
        spans
            .iter()
            .all(|span| self.by_ekey.contains_key(&span.ekey.truncated()))
    }

    /// Number of distinct encoded keys known to the index.
    pub fn len(&self) -> usize {
        self.by_ekey.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ekey.is_empty()
    }

    pub fn buckets_loaded(&self) -> u16 {
        self.buckets_loaded
    }

    /// Iterate all index entries. Keys are the zero-padded truncated
    /// form; order is unspecified.
    pub fn entries(&self) -> impl Iterator<Item = (EKey, ArchiveLocation)> + '_ {
        self.by_ekey.iter().map(|(truncated, location)| {
            let mut full = [0u8; 16];
            full[..TRUNCATED_KEY_LENGTH].copy_from_slice(truncated);
            (EKey::new(full), *location)
        })
    }
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(id: u16, offset: u64) -> ArchiveLocation {
        ArchiveLocation {
            archive_id: id,
            offset,
            size: 64,
        }
    }

    #[test]
    fn test_resolve_ekey_by_truncated_prefix() {
        let mut index = KeyIndex::new();
        let ekey = EKey::new([0x42; 16]);
        // Simulate a loaded entry: truncated key, zero tail
        let mut stored = [0u8; 16];
        stored[..9].copy_from_slice(&ekey.truncated());

        let idx_entries = vec![(EKey::new(stored), location(0, 0x100))];
        for (ekey, loc) in &idx_entries {
            index.by_ekey.insert(ekey.truncated(), *loc);
        }

        // Full key resolves despite the zeroed tail in storage
        assert_eq!(index.resolve_ekey(&ekey), Some(location(0, 0x100)));
        assert_eq!(index.resolve_ekey(&EKey::new([0x43; 16])), None);
    }

    #[test]
    fn test_resolve_ckey_spans() {
        let mut index = KeyIndex::new();
        let ckey = CKey::new([0x01; 16]);
        let span = Span {
            ekey: EKey::new([0x02; 16]),
            location: location(1, 0),
            logical_size: 128,
        };
        index.register_spans(ckey, vec![span]);

        let spans = index.resolve_ckey(&ckey).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].logical_size, 128);
        assert!(index.resolve_ckey(&CKey::new([0xFF; 16])).is_none());
    }

    #[test]
    fn test_is_local() {
        let mut index = KeyIndex::new();
        let present = EKey::new([0x10; 16]);
        index.by_ekey.insert(present.truncated(), location(0, 0));

        let local_span = Span {
            ekey: present,
            location: location(0, 0),
            logical_size: 1,
        };
        let missing_span = Span {
            ekey: EKey::new([0x20; 16]),
            location: location(0, 0),
            logical_size: 1,
        };

        assert!(index.is_local(&[local_span]));
        assert!(!index.is_local(&[local_span, missing_span]));
    }
}
