use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::debug;

use crate::archive::zip;
use crate::error::{Error, Result};
use crate::vfs::ArchiveIndex;

const DEFAULT_CAPACITY: usize = 100;

/// Modification signature of an archive file at parse time. A cached index
/// is only reused while the file on disk still matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Fingerprint {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

struct CachedIndex {
    index: Arc<ArchiveIndex>,
    fingerprint: Fingerprint,
}

struct CacheState {
    entries: LruCache<PathBuf, CachedIndex>,
    /// Per-archive parse locks; concurrent opens of one path serialize here
    /// so the parse runs once and later callers hit the cache.
    locks: HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
}

/// In-memory cache of parsed archive indexes, keyed by canonical archive
/// path. Every `open` re-checks the file's fingerprint before reusing a
/// cached index, so a replaced or rewritten archive is reparsed and a
/// deleted one reports `ArchiveNotFound` instead of stale contents.
pub struct ArchiveCache {
    state: Arc<Mutex<CacheState>>,
}

impl ArchiveCache {
    /// Create a new archive cache with a maximum number of entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).expect("nonzero default"));
        ArchiveCache {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                locks: HashMap::new(),
            })),
        }
    }

    /// Open an archive, reusing the cached index when the file is unchanged.
    ///
    /// At most one parse per archive path runs at a time: a second `open`
    /// issued while the first is parsing awaits the same parse and receives
    /// the identical `Arc<ArchiveIndex>` without reading the file again.
    pub async fn open(&self, archive_path: &Path) -> Result<Arc<ArchiveIndex>> {
        let canonical = match tokio::fs::canonicalize(archive_path).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Archive was deleted or moved; drop whatever we had for it
                self.drop_entry(archive_path);
                return Err(Error::ArchiveNotFound(archive_path.to_path_buf()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let parse_lock = {
            let mut state = self.state.lock().expect("cache lock poisoned");
            state.locks.entry(canonical.clone()).or_default().clone()
        };
        let _guard = parse_lock.lock().await;

        // Fingerprint the file before deciding whether the cache is fresh
        let metadata = match tokio::fs::metadata(&canonical).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Archive was deleted or moved; drop whatever we had for it
                self.drop_entry(&canonical);
                return Err(Error::ArchiveNotFound(archive_path.to_path_buf()));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let fingerprint = Fingerprint::of(&metadata);

        {
            let mut state = self.state.lock().expect("cache lock poisoned");
            if let Some(cached) = state.entries.get(&canonical) {
                if cached.fingerprint == fingerprint {
                    return Ok(Arc::clone(&cached.index));
                }
                debug!(archive = %canonical.display(), "archive changed on disk, reparsing");
                state.entries.pop(&canonical);
            }
        }

        debug!(archive = %canonical.display(), "parsing archive index");
        let index = Arc::new(zip::build_index(&canonical).await?);
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.put(
            canonical,
            CachedIndex {
                index: Arc::clone(&index),
                fingerprint,
            },
        );
        Ok(index)
    }

    /// Forcibly drop a cached entry, e.g. when the caller knows the archive
    /// was replaced. The next `open` reparses.
    pub fn invalidate(&self, archive_path: &Path) {
        self.drop_entry(archive_path);
        if let Ok(canonical) = std::fs::canonicalize(archive_path) {
            self.drop_entry(&canonical);
        }
    }

    /// Clear the cache entirely (workspace close / storage teardown)
    pub fn evict_all(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.clear();
        state.locks.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_entry(&self, path: &Path) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.entries.pop(path);
        state.locks.remove(path);
    }
}

impl Default for ArchiveCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Clone for ArchiveCache {
    fn clone(&self) -> Self {
        ArchiveCache {
            state: Arc::clone(&self.state),
        }
    }
}
