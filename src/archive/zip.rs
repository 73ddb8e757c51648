use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::read::DeflateDecoder;

use crate::error::{Error, Result};
use crate::vfs::{ArchiveEntry, ArchiveIndex, normalize_entry_path};

/// Maximum size to read for the End of Central Directory search (64KB should be enough)
const EOCD_SEARCH_SIZE: u64 = 65536;

/// Minimum size for EOCD (4 bytes signature + 18 bytes data)
const MIN_EOCD_SIZE: usize = 22;

/// Central Directory File Header minimum size (fixed portion)
const CDFH_MIN_SIZE: usize = 46;

/// Local File Header minimum size (fixed portion)
const LOCAL_HEADER_MIN_SIZE: usize = 30;

/// ZIP compression methods
const COMPRESSION_STORED: u16 = 0;
const COMPRESSION_DEFLATE: u16 = 8;

/// Maximum allowed decompressed size (1GB) to prevent zip bombs
const MAX_DECOMPRESSED_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum compression ratio allowed (1000:1) to detect zip bombs
const MAX_COMPRESSION_RATIO: u64 = 1000;

/// Information extracted from the End of Central Directory record
#[derive(Debug)]
struct EocdInfo {
    central_dir_offset: u64,
    central_dir_size: u64,
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptArchive(msg.into())
}

/// Parse the central directory of the archive at `path` and build an index
/// of its entries. Reads only the directory metadata; file contents are
/// decompressed lazily by [`read_entry`].
pub async fn build_index(path: &Path) -> Result<ArchiveIndex> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || build_index_sync(&path))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Read and decompress a single entry from an archive, addressed by its
/// normalized in-archive path.
pub async fn read_entry(index: &ArchiveIndex, entry_path: &str) -> Result<Bytes> {
    let normalized = normalize_entry_path(entry_path)?;
    let entry = match index.find_entry(&normalized) {
        Some(entry) => entry,
        None => {
            // The root and inferred directories have no explicit entry but
            // are still directories, not missing files
            return match index.stat(&normalized) {
                Ok(stat) if stat.is_dir => Err(Error::IsADirectory(normalized)),
                _ => Err(Error::NotFound(normalized)),
            };
        }
    };
    if entry.is_dir {
        return Err(Error::IsADirectory(normalized));
    }

    let entry = entry.clone();
    let archive_path = index.archive_path().to_path_buf();
    let data = tokio::task::spawn_blocking(move || read_entry_sync(&archive_path, &entry))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    Ok(Bytes::from(data))
}

pub(crate) fn build_index_sync(path: &Path) -> Result<ArchiveIndex> {
    let mut file = open_archive(path)?;
    let size = file.metadata()?.len();

    if size < MIN_EOCD_SIZE as u64 {
        return Err(corrupt("file too small to be a valid ZIP archive"));
    }

    // Step 1: read the tail of the file to locate the End of Central Directory
    let tail_size = EOCD_SEARCH_SIZE.min(size);
    let eocd_data = read_range(&mut file, size - tail_size, tail_size)?;

    // Step 2: parse the EOCD to find the central directory location
    let eocd_info = find_eocd(&eocd_data)?;

    let cd_end = eocd_info
        .central_dir_offset
        .checked_add(eocd_info.central_dir_size)
        .ok_or_else(|| corrupt("central directory bounds overflow"))?;

    if cd_end > size {
        return Err(corrupt(format!(
            "central directory extends beyond file bounds (offset {} + size {} > file size {})",
            eocd_info.central_dir_offset, eocd_info.central_dir_size, size
        )));
    }

    // Step 3: read and parse the central directory headers
    let central_dir_data = read_range(
        &mut file,
        eocd_info.central_dir_offset,
        eocd_info.central_dir_size,
    )?;
    let entries = parse_central_directory(&central_dir_data, size)?;

    Ok(ArchiveIndex::new(path.to_path_buf(), entries))
}

pub(crate) fn read_entry_sync(archive_path: &Path, entry: &ArchiveEntry) -> Result<Vec<u8>> {
    // Zip bomb protection: decompressed size limit
    if entry.size > MAX_DECOMPRESSED_SIZE {
        return Err(corrupt(format!(
            "file too large to extract safely: {} bytes exceeds {} byte limit",
            entry.size, MAX_DECOMPRESSED_SIZE
        )));
    }

    // Zip bomb protection: compression ratio limit
    if entry.compressed_size > 0 && entry.size / entry.compressed_size > MAX_COMPRESSION_RATIO {
        return Err(corrupt(format!(
            "suspicious compression ratio detected ({:.0}:1), file may be a zip bomb",
            entry.size as f64 / entry.compressed_size as f64
        )));
    }

    let mut file = open_archive(archive_path)?;
    let file_size = file.metadata()?.len();

    if entry.local_header_offset >= file_size {
        return Err(corrupt(format!(
            "invalid local header offset {} for file size {}",
            entry.local_header_offset, file_size
        )));
    }

    // Read the local file header to find where the data actually starts
    let local_header = read_range(
        &mut file,
        entry.local_header_offset,
        LOCAL_HEADER_MIN_SIZE as u64,
    )?;

    if local_header.len() < LOCAL_HEADER_MIN_SIZE
        || !local_header.starts_with(&[0x50, 0x4b, 0x03, 0x04])
    {
        return Err(corrupt("invalid local file header signature"));
    }

    // Filename length (offset 26) and extra field length (offset 28)
    let filename_len = u16::from_le_bytes([local_header[26], local_header[27]]) as u64;
    let extra_len = u16::from_le_bytes([local_header[28], local_header[29]]) as u64;

    let data_offset = entry
        .local_header_offset
        .checked_add(LOCAL_HEADER_MIN_SIZE as u64)
        .and_then(|v| v.checked_add(filename_len))
        .and_then(|v| v.checked_add(extra_len))
        .ok_or_else(|| corrupt("data offset calculation overflow"))?;

    let data_end = data_offset
        .checked_add(entry.compressed_size)
        .ok_or_else(|| corrupt("data end calculation overflow"))?;

    if data_end > file_size {
        return Err(corrupt(format!(
            "compressed data extends beyond file bounds (offset {} + size {} > file size {})",
            data_offset, entry.compressed_size, file_size
        )));
    }

    if entry.compressed_size == 0 {
        if entry.size != 0 {
            return Err(corrupt(format!(
                "compressed size is 0 but uncompressed size is {}",
                entry.size
            )));
        }
        if entry.crc32 != 0 {
            return Err(corrupt(format!(
                "empty file has non-zero CRC-32 (expected 0, got {:#010x})",
                entry.crc32
            )));
        }
        return Ok(Vec::new());
    }

    let compressed_data = read_range(&mut file, data_offset, entry.compressed_size)?;

    let decompressed = match entry.compression_method {
        COMPRESSION_STORED => {
            if entry.compressed_size != entry.size {
                return Err(corrupt(format!(
                    "stored file has mismatched sizes (compressed={}, uncompressed={})",
                    entry.compressed_size, entry.size
                )));
            }
            compressed_data
        }
        COMPRESSION_DEFLATE => {
            let mut decoder = DeflateDecoder::new(&compressed_data[..]);
            // Checked capacity so malicious size fields cannot force a huge allocation
            let capacity = (entry.size as usize).min(MAX_DECOMPRESSED_SIZE as usize);
            let mut decompressed = Vec::with_capacity(capacity);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| corrupt(format!("failed to decompress deflate data: {e}")))?;
            decompressed
        }
        other => {
            return Err(corrupt(format!(
                "unsupported compression method: {other}, only stored (0) and deflate (8) are supported"
            )));
        }
    };

    if decompressed.len() as u64 != entry.size {
        return Err(corrupt(format!(
            "decompressed size mismatch: expected {} bytes, got {} bytes",
            entry.size,
            decompressed.len()
        )));
    }

    let mut crc = flate2::Crc::new();
    crc.update(&decompressed);
    if crc.sum() != entry.crc32 {
        return Err(corrupt(format!(
            "CRC-32 checksum mismatch: expected {:#010x}, got {:#010x}",
            entry.crc32,
            crc.sum()
        )));
    }

    Ok(decompressed)
}

fn open_archive(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ArchiveNotFound(PathBuf::from(path))
        } else {
            Error::Io(e)
        }
    })
}

fn read_range(file: &mut File, offset: u64, length: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)
        .map_err(|e| corrupt(format!("truncated read at offset {offset}: {e}")))?;
    Ok(buf)
}

/// Find the End of Central Directory record in the buffer.
fn find_eocd(data: &[u8]) -> Result<EocdInfo> {
    // EOCD signature: 0x06054b50 (little endian)
    const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

    // Search backwards from the end for the EOCD signature
    for i in (0..=data.len().saturating_sub(MIN_EOCD_SIZE)).rev() {
        if data[i..].starts_with(&EOCD_SIGNATURE) {
            let eocd = &data[i..];

            if eocd.len() < MIN_EOCD_SIZE {
                continue;
            }

            // Disk number (offset 4) and disk with CD start (offset 6)
            let disk_number = u16::from_le_bytes([eocd[4], eocd[5]]);
            let disk_with_cd = u16::from_le_bytes([eocd[6], eocd[7]]);

            if disk_number != 0 || disk_with_cd != 0 {
                return Err(corrupt(format!(
                    "multi-disk ZIP archives are not supported (disk {disk_number}, CD disk {disk_with_cd})"
                )));
            }

            let central_dir_size_raw = u32::from_le_bytes([eocd[12], eocd[13], eocd[14], eocd[15]]);
            let central_dir_offset_raw =
                u32::from_le_bytes([eocd[16], eocd[17], eocd[18], eocd[19]]);

            // ZIP64 uses 0xFFFFFFFF as a placeholder
            if central_dir_size_raw == u32::MAX || central_dir_offset_raw == u32::MAX {
                return Err(corrupt(
                    "ZIP64 archives are not supported (central directory fields use ZIP64 placeholder values)",
                ));
            }

            return Ok(EocdInfo {
                central_dir_offset: central_dir_offset_raw as u64,
                central_dir_size: central_dir_size_raw as u64,
            });
        }
    }

    Err(corrupt("could not find End of Central Directory record"))
}

/// Parse central directory file headers into archive entries.
///
/// Central Directory File Header format (46 bytes fixed + variable):
/// - 4 bytes: signature (0x02014b50)
/// - 2 bytes: version made by
/// - 2 bytes: version needed to extract
/// - 2 bytes: general purpose bit flag
/// - 2 bytes: compression method
/// - 2 bytes: last mod file time
/// - 2 bytes: last mod file date
/// - 4 bytes: crc-32
/// - 4 bytes: compressed size
/// - 4 bytes: uncompressed size
/// - 2 bytes: file name length
/// - 2 bytes: extra field length
/// - 2 bytes: file comment length
/// - 2 bytes: disk number start
/// - 2 bytes: internal file attributes
/// - 4 bytes: external file attributes
/// - 4 bytes: relative offset of local header
/// - (variable): file name, extra field, file comment
fn parse_central_directory(data: &[u8], archive_size: u64) -> Result<Vec<ArchiveEntry>> {
    const CDFH_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];

    let mut entries = Vec::new();
    let mut pos = 0;

    while pos + CDFH_MIN_SIZE <= data.len() {
        if !data[pos..].starts_with(&CDFH_SIGNATURE) {
            // Reached end of central directory entries
            break;
        }

        let general_purpose_flag = u16::from_le_bytes([data[pos + 8], data[pos + 9]]);

        // Data descriptors (bit 3) put sizes after the data; not supported
        if general_purpose_flag & 0x0008 != 0 {
            return Err(corrupt(
                "ZIP entries with data descriptors (bit 3 set) are not supported",
            ));
        }

        let compression_method = u16::from_le_bytes([data[pos + 10], data[pos + 11]]);

        let crc32 = u32::from_le_bytes([
            data[pos + 16],
            data[pos + 17],
            data[pos + 18],
            data[pos + 19],
        ]);

        let compressed_size_raw = u32::from_le_bytes([
            data[pos + 20],
            data[pos + 21],
            data[pos + 22],
            data[pos + 23],
        ]);

        let uncompressed_size_raw = u32::from_le_bytes([
            data[pos + 24],
            data[pos + 25],
            data[pos + 26],
            data[pos + 27],
        ]);

        let local_header_offset_raw = u32::from_le_bytes([
            data[pos + 42],
            data[pos + 43],
            data[pos + 44],
            data[pos + 45],
        ]);

        if compressed_size_raw == u32::MAX
            || uncompressed_size_raw == u32::MAX
            || local_header_offset_raw == u32::MAX
        {
            return Err(corrupt(
                "ZIP64 entries are not supported (entry uses ZIP64 placeholder values)",
            ));
        }

        let compressed_size = compressed_size_raw as u64;
        let uncompressed_size = uncompressed_size_raw as u64;
        let local_header_offset = local_header_offset_raw as u64;

        if local_header_offset >= archive_size {
            return Err(corrupt(format!(
                "invalid local header offset {local_header_offset} for archive size {archive_size}"
            )));
        }

        let filename_len = u16::from_le_bytes([data[pos + 28], data[pos + 29]]) as usize;
        let extra_len = u16::from_le_bytes([data[pos + 30], data[pos + 31]]) as usize;
        let comment_len = u16::from_le_bytes([data[pos + 32], data[pos + 33]]) as usize;

        let total_entry_size = CDFH_MIN_SIZE
            .checked_add(filename_len)
            .and_then(|v| v.checked_add(extra_len))
            .and_then(|v| v.checked_add(comment_len))
            .ok_or_else(|| corrupt(format!("central directory entry size overflow at position {pos}")))?;

        let end = pos
            .checked_add(total_entry_size)
            .ok_or_else(|| corrupt(format!("central directory entry position overflow at position {pos}")))?;

        if end > data.len() {
            return Err(corrupt(format!(
                "truncated central directory entry at position {pos}"
            )));
        }

        let filename_bytes = &data[pos + CDFH_MIN_SIZE..pos + CDFH_MIN_SIZE + filename_len];
        let is_utf8 = (general_purpose_flag & (1 << 11)) != 0;

        let filename = if is_utf8 {
            String::from_utf8_lossy(filename_bytes).to_string()
        } else {
            // Legacy encoding - preserve byte values as chars
            // This handles CP437 and similar single-byte encodings
            filename_bytes.iter().map(|&b| b as char).collect()
        };

        // Directories are marked by a trailing slash
        let is_dir = filename.ends_with('/');

        // Traversal segments fail the whole parse: nothing from an archive
        // that tries to escape its own entry set is addressable
        let path = normalize_entry_path(&filename)?;
        if !path.is_empty() {
            entries.push(ArchiveEntry {
                path,
                size: uncompressed_size,
                is_dir,
                local_header_offset,
                compressed_size,
                compression_method,
                crc32,
            });
        }

        pos += total_entry_size;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_eocd_with_valid_signature() {
        let mut data = vec![0u8; 100];
        let eocd_pos = 50;

        // EOCD signature
        data[eocd_pos..eocd_pos + 4].copy_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        // Disk numbers (must be 0)
        data[eocd_pos + 4..eocd_pos + 8].copy_from_slice(&[0, 0, 0, 0]);
        // Central directory size
        data[eocd_pos + 12..eocd_pos + 16].copy_from_slice(&1000u32.to_le_bytes());
        // Central directory offset
        data[eocd_pos + 16..eocd_pos + 20].copy_from_slice(&5000u32.to_le_bytes());

        let info = find_eocd(&data).unwrap();
        assert_eq!(info.central_dir_size, 1000);
        assert_eq!(info.central_dir_offset, 5000);
    }

    #[test]
    fn find_eocd_rejects_multi_disk() {
        let mut data = vec![0u8; MIN_EOCD_SIZE];
        data[0..4].copy_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        data[4..6].copy_from_slice(&1u16.to_le_bytes());

        let err = find_eocd(&data).unwrap_err();
        assert!(err.to_string().contains("ulti-disk"));
    }

    #[test]
    fn find_eocd_rejects_zip64() {
        let mut data = vec![0u8; MIN_EOCD_SIZE];
        data[0..4].copy_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        data[4..8].copy_from_slice(&[0, 0, 0, 0]);
        data[12..16].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = find_eocd(&data).unwrap_err();
        assert!(err.to_string().contains("ZIP64"));
    }

    #[test]
    fn find_eocd_not_found() {
        let data = vec![0u8; 100];
        assert!(matches!(find_eocd(&data), Err(Error::CorruptArchive(_))));
    }

    /// Write a minimal CDFH record for `name` at `pos`
    fn write_cdfh(
        data: &mut [u8],
        pos: usize,
        name: &str,
        flags: u16,
        method: u16,
        crc32: u32,
        compressed: u32,
        uncompressed: u32,
        offset: u32,
    ) -> usize {
        data[pos..pos + 4].copy_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
        data[pos + 8..pos + 10].copy_from_slice(&flags.to_le_bytes());
        data[pos + 10..pos + 12].copy_from_slice(&method.to_le_bytes());
        data[pos + 16..pos + 20].copy_from_slice(&crc32.to_le_bytes());
        data[pos + 20..pos + 24].copy_from_slice(&compressed.to_le_bytes());
        data[pos + 24..pos + 28].copy_from_slice(&uncompressed.to_le_bytes());
        data[pos + 28..pos + 30].copy_from_slice(&(name.len() as u16).to_le_bytes());
        data[pos + 30..pos + 32].copy_from_slice(&0u16.to_le_bytes());
        data[pos + 32..pos + 34].copy_from_slice(&0u16.to_le_bytes());
        data[pos + 42..pos + 46].copy_from_slice(&offset.to_le_bytes());
        data[pos + 46..pos + 46 + name.len()].copy_from_slice(name.as_bytes());
        pos + CDFH_MIN_SIZE + name.len()
    }

    #[test]
    fn parse_central_directory_rejects_data_descriptor() {
        let mut data = vec![0u8; 100];
        write_cdfh(&mut data, 0, "test", 0x0008, 8, 0, 0, 0, 0);

        let err = parse_central_directory(&data, 10000).unwrap_err();
        assert!(err.to_string().contains("data descriptor"));
    }

    #[test]
    fn parse_central_directory_validates_offset() {
        let mut data = vec![0u8; 100];
        write_cdfh(&mut data, 0, "test", 0, 8, 0, 100, 200, 50000);

        let err = parse_central_directory(&data, 1000).unwrap_err();
        assert!(err.to_string().contains("invalid local header offset"));
    }

    #[test]
    fn parse_central_directory_single_entry() {
        let mut data = vec![0u8; 100];
        write_cdfh(&mut data, 0, "test.txt", 0, 8, 0x12345678, 500, 1000, 100);

        let entries = parse_central_directory(&data, 10000).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.path, "test.txt");
        assert_eq!(entry.size, 1000);
        assert!(!entry.is_dir);
        assert_eq!(entry.local_header_offset, 100);
        assert_eq!(entry.compressed_size, 500);
        assert_eq!(entry.compression_method, 8);
        assert_eq!(entry.crc32, 0x12345678);
    }

    #[test]
    fn parse_central_directory_utf8_filename() {
        let mut data = vec![0u8; 100];
        // UTF-8 bit (bit 11) set
        write_cdfh(&mut data, 0, "日本.txt", 0x0800, 0, 0, 0, 0, 0);

        let entries = parse_central_directory(&data, 10000).unwrap();
        assert_eq!(entries[0].path, "日本.txt");
    }

    #[test]
    fn parse_central_directory_directory_entry() {
        let mut data = vec![0u8; 100];
        write_cdfh(&mut data, 0, "src/", 0, 0, 0, 0, 0, 0);

        let entries = parse_central_directory(&data, 10000).unwrap();
        assert_eq!(entries[0].path, "src");
        assert!(entries[0].is_dir);
    }

    #[test]
    fn parse_central_directory_rejects_traversal_entries() {
        let mut data = vec![0u8; 120];
        write_cdfh(&mut data, 0, "../escape.txt", 0, 0, 0, 0, 0, 0);

        assert!(matches!(
            parse_central_directory(&data, 10000),
            Err(Error::MaliciousPath(_))
        ));
    }

    #[test]
    fn parse_central_directory_two_entries() {
        let mut data = vec![0u8; 200];
        let next = write_cdfh(&mut data, 0, "a.txt", 0, 0, 0, 3, 3, 0);
        write_cdfh(&mut data, next, "b/c.txt", 0, 0, 0, 4, 4, 40);

        let entries = parse_central_directory(&data, 10000).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, "b/c.txt");
        assert_eq!(entries[1].local_header_offset, 40);
    }
}
