use bytes::Bytes;

use crate::archive::zip;
use crate::cache::ArchiveCache;
use crate::error::{Error, Result};

use super::index::{DirEntry, FileStat};
use super::path::ZipRef;

/// Read-only filesystem over archive contents, addressed by encoded virtual
/// paths. Mirrors a generic filesystem capability (stat / list / read) so
/// the rest of the tool can treat files inside an archive uniformly with
/// real directories.
///
/// Every operation decodes the virtual path, obtains the archive's index
/// through the cache (which may trigger a parse on first access) and then
/// delegates; archive errors propagate unchanged.
pub struct ArchiveFs {
    cache: ArchiveCache,
}

impl ArchiveFs {
    pub fn new(cache: ArchiveCache) -> Self {
        ArchiveFs { cache }
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    pub async fn stat(&self, vpath: &str) -> Result<FileStat> {
        let zip_ref = ZipRef::decode(vpath)?;
        let index = self.cache.open(zip_ref.archive()).await?;
        index.stat(&zip_ref.entry)
    }

    /// List a directory inside an archive, sorted by name
    pub async fn read_directory(&self, vpath: &str) -> Result<Vec<DirEntry>> {
        let zip_ref = ZipRef::decode(vpath)?;
        let index = self.cache.open(zip_ref.archive()).await?;
        index.list_directory(&zip_ref.entry)
    }

    /// Read and decompress a file inside an archive
    pub async fn read_file(&self, vpath: &str) -> Result<Bytes> {
        let zip_ref = ZipRef::decode(vpath)?;
        let index = self.cache.open(zip_ref.archive()).await?;
        zip::read_entry(&index, &zip_ref.entry).await
    }

    pub async fn write_file(&self, _vpath: &str, _contents: &[u8]) -> Result<()> {
        Err(Error::ReadOnlyFilesystem)
    }

    pub async fn create_directory(&self, _vpath: &str) -> Result<()> {
        Err(Error::ReadOnlyFilesystem)
    }

    pub async fn delete(&self, _vpath: &str) -> Result<()> {
        Err(Error::ReadOnlyFilesystem)
    }

    pub async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(Error::ReadOnlyFilesystem)
    }
}
