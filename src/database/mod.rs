pub mod download;
pub mod fetcher;
pub mod registry;

pub use download::HttpDownloader;
pub use fetcher::{DatabaseFetcher, Downloader, Notifier, UserPrompt};
pub use registry::{DatabaseEvent, DatabaseManager, StateStore};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::vfs::ZipRef;

/// Metadata file marking a directory as an analysis database
pub const DB_METADATA_FILE: &str = "database.yml";

/// Marker used by databases produced before the metadata file existed
pub const DB_LEGACY_MARKER: &str = ".dbinfo";

/// Compressed source snapshot shipped inside a database directory
pub const SOURCE_ARCHIVE_NAME: &str = "src.zip";

/// How deep below an extraction root the database directory may be nested.
/// Archives usually wrap their contents in a single top-level directory.
const MAX_SEARCH_DEPTH: usize = 3;

/// A registered analysis database.
///
/// Created only by the import pipeline; mutated only through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseItem {
    /// Display name, unique within the managed storage namespace
    pub name: String,
    /// Absolute path of the validated database directory
    pub database_path: PathBuf,
    /// Compressed source snapshot, browsed through the virtual filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_archive: Option<PathBuf>,
    /// Set when post-import validation fails; errored items stay listed for
    /// inspection and removal but cannot become current
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatabaseItem {
    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Virtual path addressing the root of the source archive, if any
    pub fn source_root(&self) -> Option<String> {
        self.source_archive
            .as_ref()
            .map(|archive| ZipRef::root(archive).encode())
    }
}

/// Check that `dir` has the expected database layout.
pub async fn validate_database(dir: &Path) -> Result<()> {
    if has_marker(dir).await {
        Ok(())
    } else {
        Err(Error::InvalidDatabase(format!(
            "'{}' does not contain a '{DB_METADATA_FILE}' file",
            dir.display()
        )))
    }
}

/// Locate the database directory at or below `root`: the directory holding
/// the metadata marker. Archives commonly nest the database one level down,
/// so the search descends a bounded number of levels, breadth first.
pub async fn find_database_dir(root: &Path) -> Result<PathBuf> {
    let mut level = vec![root.to_path_buf()];
    for _ in 0..MAX_SEARCH_DEPTH {
        let mut next = Vec::new();
        for dir in level {
            if has_marker(&dir).await {
                return Ok(dir);
            }
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(child) = read_dir.next_entry().await? {
                if child.file_type().await?.is_dir() {
                    next.push(child.path());
                }
            }
        }
        // Deterministic search order regardless of directory enumeration
        next.sort();
        level = next;
    }

    Err(Error::InvalidDatabase(format!(
        "no '{DB_METADATA_FILE}' file found under '{}'",
        root.display()
    )))
}

/// The source archive inside a database directory, when present. Its
/// absence is not an error: not every database keeps its sources.
pub async fn source_archive_in(database_dir: &Path) -> Option<PathBuf> {
    let candidate = database_dir.join(SOURCE_ARCHIVE_NAME);
    match tokio::fs::metadata(&candidate).await {
        Ok(m) if m.is_file() => Some(candidate),
        _ => None,
    }
}

async fn has_marker(dir: &Path) -> bool {
    for marker in [DB_METADATA_FILE, DB_LEGACY_MARKER] {
        if let Ok(m) = tokio::fs::metadata(dir.join(marker)).await {
            if m.is_file() {
                return true;
            }
        }
    }
    false
}
