//! Root resolution: file names and data IDs to content keys.

mod manifest;

pub use manifest::{RootManifest, RootRecord, SpanRef};

use crate::jenkins3::hashpath;
use crate::types::Features;
use tracing::debug;

/// Resolves file identities against the parsed root manifest.
pub struct RootResolver {
    manifest: RootManifest,
}

impl RootResolver {
    pub fn new(manifest: RootManifest) -> Self {
        Self { manifest }
    }

    /// Resolve a full file path. Matching is case-insensitive and
    /// accepts either path separator.
    pub fn resolve_path(&self, path: &str) -> Option<&RootRecord> {
        let hash = hashpath(path);
        let record = self.manifest.record_by_name_hash(hash);
        if record.is_none() {
            debug!("No root entry for path {:?} (hash {:#018x})", path, hash);
        }
        record
    }

    pub fn resolve_data_id(&self, data_id: u32) -> Option<&RootRecord> {
        self.manifest.record_by_data_id(data_id)
    }

    /// All manifest records, in manifest order.
    pub fn records(&self) -> &[RootRecord] {
        self.manifest.records()
    }

    pub fn file_count(&self) -> u32 {
        self.manifest.total_file_count
    }

    /// Storage features implied by the manifest contents.
    pub fn features(&self) -> Features {
        let mut features = Features::empty();
        features.insert(Features::ROOT_CKEY);
        features.insert(Features::FILE_DATA_IDS);
        features.insert(Features::LOCALE_FLAGS);
        features.insert(Features::CONTENT_FLAGS);

        let named = self.manifest.named_file_count;
        if named > 0 {
            features.insert(Features::FILE_NAMES);
            if named == self.manifest.total_file_count {
                features.insert(Features::FILE_NAME_HASHES);
            } else {
                features.insert(Features::FILE_NAME_HASHES_OPTIONAL);
            }
        }

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CKey, EKey};
    use std::io::Cursor;

    fn manifest_with_names(named: &[(&str, u32)], unnamed: &[u32]) -> RootManifest {
        let mut data = Vec::new();
        data.extend_from_slice(b"TSFM");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&((named.len() + unnamed.len()) as u32).to_le_bytes());
        data.extend_from_slice(&(named.len() as u32).to_le_bytes());

        let mut push_block = |ids: &[u32], hashes: Option<Vec<u64>>| {
            if ids.is_empty() {
                return;
            }
            data.extend_from_slice(&(ids.len() as u32).to_le_bytes());
            data.extend_from_slice(&0u32.to_le_bytes());
            data.extend_from_slice(&0xFFu32.to_le_bytes());
            data.extend_from_slice(&0u64.to_le_bytes());
            data.push(u8::from(hashes.is_some()));
            let mut prev = 0u32;
            for (i, &id) in ids.iter().enumerate() {
                let delta = if i == 0 { id as i32 } else { (id - prev - 1) as i32 };
                data.extend_from_slice(&delta.to_le_bytes());
                prev = id;
            }
            for &id in ids {
                data.extend_from_slice(CKey::new([id as u8; 16]).as_bytes());
                data.push(1);
                data.extend_from_slice(EKey::new([id as u8 | 0x80; 16]).as_bytes());
                data.extend_from_slice(&64u64.to_le_bytes()[..5]);
            }
            if let Some(hashes) = hashes {
                for hash in hashes {
                    data.extend_from_slice(&hash.to_le_bytes());
                }
            }
        };

        let named_ids: Vec<u32> = named.iter().map(|&(_, id)| id).collect();
        let hashes: Vec<u64> = named.iter().map(|&(name, _)| hashpath(name)).collect();
        push_block(&named_ids, Some(hashes));
        push_block(unnamed, None);

        RootManifest::parse(&mut Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_resolve_path_normalized() {
        let resolver = RootResolver::new(manifest_with_names(
            &[("Interface\\Icons\\icon.blp", 7)],
            &[],
        ));

        let record = resolver.resolve_path("Interface\\Icons\\icon.blp").unwrap();
        assert_eq!(record.data_id, 7);

        // Forward slashes and case differences hash identically
        assert!(resolver.resolve_path("interface/icons/ICON.BLP").is_some());
        assert!(resolver.resolve_path("interface/icons/other.blp").is_none());
    }

    #[test]
    fn test_resolve_data_id() {
        let resolver = RootResolver::new(manifest_with_names(&[("a.txt", 1)], &[3]));
        assert_eq!(resolver.resolve_data_id(3).unwrap().name_hash, None);
        assert!(resolver.resolve_data_id(99).is_none());
    }

    #[test]
    fn test_features_all_named() {
        let resolver = RootResolver::new(manifest_with_names(&[("a.txt", 1), ("b.txt", 2)], &[]));
        let features = resolver.features();
        assert!(features.contains(Features::FILE_NAMES));
        assert!(features.contains(Features::FILE_NAME_HASHES));
        assert!(!features.contains(Features::FILE_NAME_HASHES_OPTIONAL));
        assert!(features.contains(Features::ROOT_CKEY));
        assert!(features.contains(Features::FILE_DATA_IDS));
    }

    #[test]
    fn test_features_partially_named() {
        let resolver = RootResolver::new(manifest_with_names(&[("a.txt", 1)], &[2]));
        let features = resolver.features();
        assert!(features.contains(Features::FILE_NAME_HASHES_OPTIONAL));
        assert!(!features.contains(Features::FILE_NAME_HASHES));
    }

    #[test]
    fn test_features_no_names() {
        let resolver = RootResolver::new(manifest_with_names(&[], &[1, 2]));
        let features = resolver.features();
        assert!(!features.contains(Features::FILE_NAMES));
        assert!(!features.contains(Features::FILE_NAME_HASHES));
        assert!(!features.contains(Features::FILE_NAME_HASHES_OPTIONAL));
    }
}
