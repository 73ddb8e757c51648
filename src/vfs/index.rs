use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Archive index entry - cached metadata about a single file or directory
/// in an archive. Carries everything needed to read the entry lazily later.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Normalized path within the archive (forward slashes, no leading slash)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    pub is_dir: bool,
    /// Offset of the local file header in the archive
    pub local_header_offset: u64,
    pub compressed_size: u64,
    pub compression_method: u16,
    pub crc32: u32,
}

/// Result of a stat operation on a virtual path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub size: u64,
}

/// A single child in a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Parsed view of one archive: a flat entry map plus a derived directory
/// tree. The tree is computed once from the entry list and never mutated;
/// directories that exist only implicitly (a file at `a/b/c.txt` with no
/// explicit `a/` entry) are synthesized during construction.
#[derive(Debug)]
pub struct ArchiveIndex {
    archive_path: PathBuf,
    entries: HashMap<String, ArchiveEntry>,
    /// Directory path -> child name -> is_dir. Root ("") is always present.
    tree: HashMap<String, BTreeMap<String, bool>>,
}

/// Normalize an in-archive path: forward slashes, no leading or trailing
/// slash, no empty or `.` segments. A `..` segment survives normalization
/// only by escaping the archive, so it is rejected outright.
pub fn normalize_entry_path(raw: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Error::MaliciousPath(raw.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

impl ArchiveIndex {
    /// Build an index from parsed entries. Entry paths must already be
    /// normalized (the parser rejects traversal segments before this point).
    pub fn new(archive_path: PathBuf, entry_list: Vec<ArchiveEntry>) -> Self {
        let mut entries = HashMap::with_capacity(entry_list.len());
        let mut tree: HashMap<String, BTreeMap<String, bool>> = HashMap::new();
        tree.insert(String::new(), BTreeMap::new());

        for entry in entry_list {
            Self::record_in_tree(&mut tree, &entry.path, entry.is_dir);
            entries.insert(entry.path.clone(), entry);
        }

        ArchiveIndex {
            archive_path,
            entries,
            tree,
        }
    }

    /// Insert a path into the tree, synthesizing intermediate directories.
    fn record_in_tree(
        tree: &mut HashMap<String, BTreeMap<String, bool>>,
        path: &str,
        is_dir: bool,
    ) {
        if path.is_empty() {
            return;
        }
        let mut parent = String::new();
        let segments: Vec<&str> = path.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            let last = i == segments.len() - 1;
            let child_is_dir = !last || is_dir;
            let siblings = tree.entry(parent.clone()).or_default();
            // A directory marking wins over an earlier file-shaped sighting
            let flag = siblings.entry(segment.to_string()).or_insert(child_is_dir);
            *flag = *flag || child_is_dir;

            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(segment);
            if child_is_dir {
                tree.entry(parent.clone()).or_default();
            }
        }
    }

    /// Path of the archive file this index was parsed from
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Look up an explicit entry by normalized path
    pub fn find_entry(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.get(path)
    }

    /// Iterate over every explicit entry in the archive
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    /// Iterate over file (non-directory) entries, e.g. for full extraction
    pub fn file_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values().filter(|e| !e.is_dir)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stat a path within the archive. The root ("") is always a directory.
    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let path = normalize_entry_path(path)?;
        if let Some(entry) = self.entries.get(&path) {
            return Ok(FileStat {
                is_dir: entry.is_dir,
                size: entry.size,
            });
        }
        // Implicit directory, or the root of an empty archive
        if self.tree.contains_key(&path) {
            return Ok(FileStat {
                is_dir: true,
                size: 0,
            });
        }
        Err(Error::NotFound(path))
    }

    /// List the immediate children of a directory, sorted by name.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize_entry_path(path)?;
        if let Some(children) = self.tree.get(&path) {
            return Ok(children
                .iter()
                .map(|(name, is_dir)| DirEntry {
                    name: name.clone(),
                    is_dir: *is_dir,
                })
                .collect());
        }
        if self.entries.contains_key(&path) {
            return Err(Error::NotADirectory(path));
        }
        Err(Error::NotFound(path))
    }
}
