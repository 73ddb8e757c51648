use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::archive::extract_archive;
use crate::error::{Error, Result};

use super::registry::DatabaseManager;
use super::{DatabaseItem, find_database_dir, source_archive_in, validate_database};

/// Progress callback: (bytes so far, total bytes when the server said)
pub type Progress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// User-prompt collaborator. `None` means the user declined, which cancels
/// the surrounding operation without an error message.
#[async_trait]
pub trait UserPrompt: Send + Sync {
    async fn ask_for_input(&self, prompt: &str) -> Option<String>;
    async fn choose_folder(&self) -> Option<PathBuf>;
}

/// Download collaborator: stream a URL into a local file with progress
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path, progress: Progress<'_>) -> Result<()>;
}

/// Notification collaborator for user-visible messages
pub trait Notifier: Send + Sync {
    fn report_error(&self, message: &str);
    fn report_info(&self, message: &str);
}

/// Orchestrates database imports: folder, local archive, or URL. Each
/// operation validates its source, claims a unique name in managed storage,
/// materializes the database there, and registers it. Any temp state is
/// removed before a failure is surfaced, and a declined prompt terminates
/// the operation silently.
pub struct DatabaseFetcher {
    storage_path: PathBuf,
    prompt: Arc<dyn UserPrompt>,
    downloader: Arc<dyn Downloader>,
    notifier: Arc<dyn Notifier>,
}

impl DatabaseFetcher {
    pub fn new(
        storage_path: impl Into<PathBuf>,
        prompt: Arc<dyn UserPrompt>,
        downloader: Arc<dyn Downloader>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        DatabaseFetcher {
            storage_path: storage_path.into(),
            prompt,
            downloader,
            notifier,
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Import a database that already exists as a directory on disk.
    pub async fn import_folder(
        &self,
        manager: &mut DatabaseManager,
        folder: &Path,
    ) -> Result<DatabaseItem> {
        let result = self.import_folder_inner(manager, folder).await;
        self.finish(result)
    }

    /// Ask the user to pick a folder, then import it.
    pub async fn prompt_import_folder(
        &self,
        manager: &mut DatabaseManager,
    ) -> Result<DatabaseItem> {
        let result = match self.prompt.choose_folder().await {
            Some(folder) => self.import_folder_inner(manager, &folder).await,
            None => Err(Error::UserCancelled),
        };
        self.finish(result)
    }

    /// Import a database from a local archive: extract fully, locate and
    /// validate the database directory, move it into managed storage.
    pub async fn import_local_archive(
        &self,
        manager: &mut DatabaseManager,
        archive: &Path,
    ) -> Result<DatabaseItem> {
        let base = archive
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let result = self.import_archive_inner(manager, archive, &base).await;
        self.finish(result)
    }

    /// Prompt for a URL, download the archive to a temp file with progress,
    /// then import it. The temp file is gone by the time this returns,
    /// whatever the outcome.
    pub async fn import_from_url(
        &self,
        manager: &mut DatabaseManager,
        progress: Progress<'_>,
    ) -> Result<DatabaseItem> {
        let result = self.import_from_url_inner(manager, progress).await;
        self.finish(result)
    }

    async fn import_from_url_inner(
        &self,
        manager: &mut DatabaseManager,
        progress: Progress<'_>,
    ) -> Result<DatabaseItem> {
        let url = self
            .prompt
            .ask_for_input("URL of the database archive to download")
            .await
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(Error::UserCancelled)?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Download(format!("unsupported URL: {url}")));
        }

        tokio::fs::create_dir_all(&self.storage_path).await?;
        // NamedTempFile removes itself on drop, covering every failure path
        // out of this function as well as the success path (the downloaded
        // archive is not needed once extracted)
        let download = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".zip")
            .tempfile_in(&self.storage_path)?;

        info!(%url, "downloading database archive");
        self.downloader.download(&url, download.path(), progress).await?;

        self.import_archive_inner(manager, download.path(), &name_from_url(&url))
            .await
    }

    async fn import_folder_inner(
        &self,
        manager: &mut DatabaseManager,
        folder: &Path,
    ) -> Result<DatabaseItem> {
        match tokio::fs::metadata(folder).await {
            Ok(m) if m.is_dir() => {}
            _ => {
                return Err(Error::InvalidDatabase(format!(
                    "'{}' is not a directory",
                    folder.display()
                )));
            }
        }
        validate_database(folder).await?;

        let base = folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reservation = manager.reserve_name(&self.storage_path, &base);
        let dest = self.storage_path.join(reservation.name());

        tokio::fs::create_dir_all(&self.storage_path).await?;
        debug!(src = %folder.display(), dest = %dest.display(), "copying database folder");
        if let Err(e) = copy_dir(folder, &dest).await {
            let _ = tokio::fs::remove_dir_all(&dest).await;
            return Err(e);
        }

        self.register(manager, reservation.name(), dest.clone(), dest)
            .await
    }

    async fn import_archive_inner(
        &self,
        manager: &mut DatabaseManager,
        archive: &Path,
        base_name: &str,
    ) -> Result<DatabaseItem> {
        tokio::fs::create_dir_all(&self.storage_path).await?;

        // Claim the final name before the slow work, so a concurrent import
        // aiming at the same base name settles on a different one up front
        // instead of being rejected after its extraction finished
        let reservation = manager.reserve_name(&self.storage_path, base_name);
        let root = self.storage_path.join(reservation.name());

        // Extract into a temp dir next to the final location, so the move
        // into place is an atomic rename on the same filesystem. The temp
        // dir removes itself on drop on every failure path below.
        let temp = tempfile::Builder::new()
            .prefix(".import-")
            .tempdir_in(&self.storage_path)?;

        debug!(archive = %archive.display(), "extracting database archive");
        extract_archive(archive, temp.path()).await?;

        let db_dir = find_database_dir(temp.path()).await?;
        let relative = db_dir
            .strip_prefix(temp.path())
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
            .to_path_buf();

        let extracted = temp.keep();
        if let Err(e) = tokio::fs::rename(&extracted, &root).await {
            let _ = tokio::fs::remove_dir_all(&extracted).await;
            return Err(e.into());
        }

        let database_path = root.join(relative);
        self.register(manager, reservation.name(), root, database_path)
            .await
    }

    /// Build the item, register it, and make it current when nothing is.
    /// `root` is the storage directory to delete if registration fails.
    async fn register(
        &self,
        manager: &mut DatabaseManager,
        name: &str,
        root: PathBuf,
        database_path: PathBuf,
    ) -> Result<DatabaseItem> {
        let item = DatabaseItem {
            name: name.to_string(),
            source_archive: source_archive_in(&database_path).await,
            database_path,
            error: None,
        };

        let registration = manager.add_item(item.clone()).and_then(|()| {
            if manager.current_item().is_none() {
                manager.set_current(Some(&item))
            } else {
                Ok(())
            }
        });
        if let Err(e) = registration {
            // Roll back whichever half of the registration went through
            let _ = manager.remove_item(&item);
            let _ = tokio::fs::remove_dir_all(&root).await;
            return Err(e);
        }

        info!(name = %item.name, "database imported");
        Ok(item)
    }

    /// Operation boundary: report the outcome through the notification
    /// collaborator. A declined prompt produces no message at all.
    fn finish(&self, result: Result<DatabaseItem>) -> Result<DatabaseItem> {
        match &result {
            Ok(item) => self
                .notifier
                .report_info(&format!("Imported database '{}'", item.name)),
            Err(e) if e.is_reportable() => self
                .notifier
                .report_error(&format!("Failed to import database: {e}")),
            Err(_) => {}
        }
        result
    }
}

/// Display name for a database downloaded from `url`: the last path
/// segment, minus any `.zip` extension and query/fragment noise.
fn name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let base = last.strip_suffix(".zip").unwrap_or(last);
    if base.is_empty() {
        "database".to_string()
    } else {
        base.to_string()
    }
}

async fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_sync(&src, &dest))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    Ok(())
}

fn copy_dir_sync(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_sync(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
