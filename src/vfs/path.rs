use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// URI scheme prefix for paths that resolve into an archive
pub const SCHEME: &str = "zip-archive://";

/// Separator between the archive component and the in-archive entry path
const SEPARATOR: &str = "!/";

/// Address of an entry inside an archive file: the pair (absolute archive
/// path, entry path within it), encoded as a single opaque string so the
/// rest of the tool can pass it around like any other path.
///
/// Encoding: `zip-archive://<archive>!/<entry>` where `%` and `!` in the
/// archive component are percent-escaped. The escaped archive component can
/// never contain a literal `!`, so the first `!/` in the string is always
/// the separator; the entry component is carried verbatim. An empty entry
/// component addresses the archive's root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipRef {
    pub archive: PathBuf,
    pub entry: String,
}

impl ZipRef {
    pub fn new(archive: impl AsRef<Path>, entry: impl Into<String>) -> Self {
        ZipRef {
            archive: archive.as_ref().to_path_buf(),
            entry: entry.into(),
        }
    }

    /// Address the root directory of an archive
    pub fn root(archive: impl AsRef<Path>) -> Self {
        Self::new(archive, "")
    }

    /// Render as an opaque virtual path string
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(
            SCHEME.len() + self.archive.as_os_str().len() + SEPARATOR.len() + self.entry.len(),
        );
        out.push_str(SCHEME);
        for ch in self.archive.to_string_lossy().chars() {
            match ch {
                '%' => out.push_str("%25"),
                '!' => out.push_str("%21"),
                other => out.push(other),
            }
        }
        out.push_str(SEPARATOR);
        out.push_str(&self.entry);
        out
    }

    /// Parse a virtual path string. Total over anything `encode` produced;
    /// anything else fails with `MalformedVirtualPath`.
    pub fn decode(raw: &str) -> Result<Self> {
        let malformed = || Error::MalformedVirtualPath(raw.to_string());

        let rest = raw.strip_prefix(SCHEME).ok_or_else(malformed)?;
        let sep = rest.find(SEPARATOR).ok_or_else(malformed)?;
        let (escaped_archive, after) = rest.split_at(sep);
        let entry = &after[SEPARATOR.len()..];

        let mut archive = String::with_capacity(escaped_archive.len());
        let mut chars = escaped_archive.chars();
        while let Some(ch) = chars.next() {
            if ch == '%' {
                match (chars.next(), chars.next()) {
                    (Some('2'), Some('5')) => archive.push('%'),
                    (Some('2'), Some('1')) => archive.push('!'),
                    _ => return Err(malformed()),
                }
            } else {
                archive.push(ch);
            }
        }

        let archive = PathBuf::from(archive);
        if !archive.is_absolute() {
            return Err(malformed());
        }

        Ok(ZipRef {
            archive,
            entry: entry.to_string(),
        })
    }

    /// The archive file this reference points into
    pub fn archive(&self) -> &Path {
        &self.archive
    }
}

impl std::fmt::Display for ZipRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
