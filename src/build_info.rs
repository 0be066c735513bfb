//! `.build.info` parser for installation metadata.
//!
//! The `.build.info` file is a BPSV (pipe-separated values) file at the
//! installation root. The first line is the schema, `Name!TYPE:size`
//! per column; following lines are rows. It identifies the installed
//! product, its build version, the storage tags, and the root manifest
//! key.
//!
//! Columns used here:
//! - `Active!DEC:1` -- whether this entry is active (1 = active)
//! - `Product!STRING:0` -- product code (e.g., "wow")
//! - `Version!STRING:0` -- version string; the build number is its last
//!   dotted component
//! - `Tags!STRING:0` -- space-separated tag names
//! - `Root Key!HEX:16` -- encoding key of the root manifest blob

use crate::error::{CascError, Result};
use crate::types::{EKey, Product, StorageTag};
use std::path::Path;
use tracing::{debug, warn};

/// Parsed BPSV document: schema column names plus raw rows.
struct BpsvDocument {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl BpsvDocument {
    fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let schema = lines
            .next()
            .ok_or_else(|| CascError::InvalidBuildInfo("Empty file".into()))?;

        let mut columns = Vec::new();
        for field in schema.split('|') {
            let name = field
                .split('!')
                .next()
                .ok_or_else(|| CascError::InvalidBuildInfo(format!("Bad schema field {field:?}")))?;
            if name.is_empty() {
                return Err(CascError::InvalidBuildInfo(format!(
                    "Bad schema field {field:?}"
                )));
            }
            columns.push(name.to_string());
        }

        let mut rows = Vec::new();
        for line in lines {
            let values: Vec<String> = line.split('|').map(str::to_string).collect();
            if values.len() != columns.len() {
                return Err(CascError::InvalidBuildInfo(format!(
                    "Row has {} fields, schema has {}",
                    values.len(),
                    columns.len()
                )));
            }
            rows.push(values);
        }

        Ok(Self { columns, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn get<'a>(&'a self, row: &'a [String], name: &str) -> Option<&'a str> {
        self.column(name).map(|i| row[i].as_str())
    }
}

/// The active `.build.info` entry, reduced to the fields the storage
/// needs.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub product: Product,
    /// Full version string as written (e.g. "11.0.7.58238")
    pub version: String,
    /// Tags in file order; each tag's mask value is its bit position
    pub tags: Vec<StorageTag>,
    /// Encoding key of the root manifest, when the column is present
    pub root_key: Option<EKey>,
}

impl BuildInfo {
    /// Parse `.build.info` content and extract the active entry.
    pub fn parse_str(content: &str) -> Result<Self> {
        let document = BpsvDocument::parse(content)?;

        let row = document
            .rows
            .iter()
            .find(|row| document.get(row, "Active") == Some("1"))
            .ok_or_else(|| CascError::InvalidBuildInfo("No active entry".into()))?;

        let code_name = document
            .get(row, "Product")
            .unwrap_or("unknown")
            .to_string();

        let version = document.get(row, "Version").unwrap_or("").to_string();
        let build_number = version
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| {
                warn!("No build number in version string {:?}", version);
                0
            });

        let tags: Vec<StorageTag> = document
            .get(row, "Tags")
            .map(|s| {
                s.split_whitespace()
                    .enumerate()
                    .map(|(i, name)| StorageTag {
                        name: name.to_string(),
                        value: i as u32,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let root_key = match document.get(row, "Root Key") {
            Some(hex) if !hex.is_empty() => Some(EKey::from_hex(hex).ok_or_else(|| {
                CascError::InvalidBuildInfo(format!("Bad root key {hex:?}"))
            })?),
            _ => None,
        };

        debug!(
            "Active build: product={}, build={}, {} tags, root key {}",
            code_name,
            build_number,
            tags.len(),
            if root_key.is_some() { "present" } else { "absent" }
        );

        Ok(Self {
            product: Product {
                code_name,
                build_number,
            },
            version,
            tags,
            root_key,
        })
    }

    /// Read and parse `.build.info` from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CascError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }
}
