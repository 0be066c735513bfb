//! CASC (Content Addressable Storage Container) reader for local game
//! file storage
//!
//! This crate opens an installed CASC storage on disk and provides
//! key-based file lookup, streamed reads over BLTE-encoded spans, and
//! sequential enumeration of the container's contents. Archives are
//! strictly read-only.

pub mod archive;
pub mod blte;
pub mod build_info;
pub mod error;
pub mod index;
pub mod jenkins3;
pub mod root;
pub mod storage;
pub mod types;

pub use error::{CascError, Result};
pub use storage::{CascStorage, FileCursor, FileStream, InfoClass};
pub use types::{
    ArchiveLocation, CKey, EKey, Features, FileLocator, FileRecord, NameType, Product, Span,
    StorageTag,
};

// Re-export commonly used types
pub use archive::{Archive, ArchiveReader};
pub use blte::decode_blte;
pub use build_info::BuildInfo;
pub use index::{IdxFile, KeyIndex};
pub use root::{RootRecord, RootResolver};
