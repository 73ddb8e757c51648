use std::path::Path;

use crate::error::{Error, Result};

use super::zip::{build_index_sync, read_entry_sync};

/// Extract every entry of the archive at `archive` into `dest`.
///
/// Used by the import pipeline: an imported database has to exist as a real
/// directory tree so the query engine can read it directly. Entry paths come
/// out of the index already normalized and traversal-free, so joining them
/// under `dest` cannot escape it.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_sync(&archive, &dest))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn extract_sync(archive: &Path, dest: &Path) -> Result<()> {
    let index = build_index_sync(archive)?;

    std::fs::create_dir_all(dest)?;
    for entry in index.entries() {
        let target = dest.join(&entry.path);
        if entry.is_dir {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let data = read_entry_sync(archive, entry)?;
            std::fs::write(&target, data)?;
        }
    }

    Ok(())
}
