pub mod index;
pub mod path;
pub mod provider;

pub use index::{ArchiveEntry, ArchiveIndex, DirEntry, FileStat, normalize_entry_path};
pub use path::ZipRef;
pub use provider::ArchiveFs;
