//! Checksums of emitted artifacts
//!
//! Every file a [`FileWriter`](crate::writer::FileWriter) emits is recorded in
//! `checksums.sha256` (`<hex>  <relative path>` per line, sorted). An artifact whose
//! content hashes to the recorded value is not rewritten.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// File name of the manifest inside an output directory
pub const MANIFEST_FILE: &str = "checksums.sha256";

/// SHA256 checksum of artifact content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum of text content
    pub fn of(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this checksum
    pub fn verify(&self, content: &str) -> bool {
        *self == Self::of(content)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Checksum {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Relative artifact path → checksum
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, Checksum>,
}

impl ChecksumManifest {
    /// Parse `sha256sum`-style lines; malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let (hash, path) = line.split_once("  ")?;
                let hash = hash.trim();
                let path = path.trim();
                (!hash.is_empty() && !path.is_empty()).then(|| (path.to_string(), Checksum::from(hash)))
            })
            .collect();
        Self { entries }
    }

    /// Load the manifest of an output directory; missing means empty
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(MANIFEST_FILE), self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, checksum)| format!("{}  {}\n", checksum, path))
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<&Checksum> {
        self.entries.get(path)
    }

    /// Record a checksum; returns whether it differs from the previous one
    pub fn record(&mut self, path: impl Into<String>, checksum: Checksum) -> bool {
        let path = path.into();
        let changed = self.entries.get(&path) != Some(&checksum);
        self.entries.insert(path, checksum);
        changed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
