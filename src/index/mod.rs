//! Key index: `.idx` file parsing and key-to-span lookup

mod idx_parser;
mod key_index;

pub use idx_parser::IdxFile;
pub use key_index::KeyIndex;
