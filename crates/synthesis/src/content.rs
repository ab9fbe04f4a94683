//! Memory-directory scanner feeding the content gate.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::atomic::sha256_hex;
use crate::error::Result;
use crate::state::SourceCheckpoint;

const MEMORY_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Character totals for every memory source under a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub total_chars: u64,
    pub sources: BTreeMap<String, SourceCheckpoint>,
}

impl ContentSnapshot {
    /// Sources that are new or whose checksum moved since `previous`.
    pub fn changed_since<'a>(
        &'a self,
        previous: &'a BTreeMap<String, SourceCheckpoint>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.sources
            .iter()
            .filter(move |(path, cp)| previous.get(*path).map(|old| old.sha256 != cp.sha256).unwrap_or(true))
            .map(|(path, _)| path.as_str())
    }
}

/// Walk `root` for `.md` / `.txt` files.  A missing directory is empty.
pub fn scan_memory(root: &Path) -> Result<ContentSnapshot> {
    let mut snapshot = ContentSnapshot::default();
    if !root.exists() {
        debug!(root = %root.display(), "memory directory missing; treating as empty");
        return Ok(snapshot);
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk loop"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_memory = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| MEMORY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_memory {
            continue;
        }

        let bytes = std::fs::read(path)?;
        let chars = String::from_utf8_lossy(&bytes).chars().count() as u64;
        let key = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        snapshot.total_chars += chars;
        snapshot.sources.insert(
            key,
            SourceCheckpoint {
                chars,
                sha256: sha256_hex(&bytes),
            },
        );
    }

    debug!(
        files = snapshot.sources.len(),
        total_chars = snapshot.total_chars,
        "memory scanned"
    );
    Ok(snapshot)
}
