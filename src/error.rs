use std::path::PathBuf;

/// Failure modes across archive access, the virtual filesystem, and the
/// database import pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The archive could not be parsed as a valid ZIP container.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An entry path would escape the archive via `..` traversal.
    #[error("entry path escapes the archive: {0}")]
    MaliciousPath(String),

    /// The archive file itself does not exist on disk.
    #[error("archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// No entry at the given path.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A file entry was used where a directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A directory entry was used where a file was required.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A string could not be decoded as a virtual archive path.
    #[error("malformed virtual path: {0}")]
    MalformedVirtualPath(String),

    /// Write-shaped operation attempted on the archive view.
    #[error("archive filesystem is read-only")]
    ReadOnlyFilesystem,

    /// The directory does not have the expected database layout.
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    /// A database with the same on-disk identity is already registered.
    #[error("database already registered: {0}")]
    AlreadyRegistered(String),

    /// The user declined a prompt. Not reported as an error.
    #[error("operation cancelled")]
    UserCancelled,

    /// Network download failed.
    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should be surfaced to the user. A declined prompt
    /// terminates the operation silently.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Error::UserCancelled)
    }
}
