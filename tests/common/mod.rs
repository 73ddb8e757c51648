//! Shared test fixtures: a minimal ZIP writer so tests can build real
//! archives on disk without shelling out.

use std::io::Read;
use std::path::Path;

/// Builds a ZIP archive in memory, entry by entry.
#[derive(Default)]
pub struct FixtureZip {
    data: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

impl FixtureZip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(mut self, name: &str) -> Self {
        let name = format!("{}/", name.trim_end_matches('/'));
        self.push_entry(&name, &[], &[], METHOD_STORED, 0);
        self
    }

    pub fn add_file(mut self, name: &str, contents: &[u8]) -> Self {
        let mut crc = flate2::Crc::new();
        crc.update(contents);
        self.push_entry(name, contents, contents, METHOD_STORED, crc.sum());
        self
    }

    pub fn add_file_deflate(mut self, name: &str, contents: &[u8]) -> Self {
        let mut crc = flate2::Crc::new();
        crc.update(contents);
        let mut encoder =
            flate2::read::DeflateEncoder::new(contents, flate2::Compression::default());
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .expect("deflate of in-memory data");
        self.push_entry(name, contents, &compressed, METHOD_DEFLATE, crc.sum());
        self
    }

    fn push_entry(
        &mut self,
        name: &str,
        contents: &[u8],
        stored: &[u8],
        method: u16,
        crc32: u32,
    ) {
        let offset = self.data.len() as u32;
        let name_bytes = name.as_bytes();

        // Local file header
        self.data.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
        self.data.extend_from_slice(&20u16.to_le_bytes()); // version needed
        self.data.extend_from_slice(&0u16.to_le_bytes()); // flags
        self.data.extend_from_slice(&method.to_le_bytes());
        self.data.extend_from_slice(&0u16.to_le_bytes()); // mod time
        self.data.extend_from_slice(&0u16.to_le_bytes()); // mod date
        self.data.extend_from_slice(&crc32.to_le_bytes());
        self.data
            .extend_from_slice(&(stored.len() as u32).to_le_bytes());
        self.data
            .extend_from_slice(&(contents.len() as u32).to_le_bytes());
        self.data
            .extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        self.data.extend_from_slice(&0u16.to_le_bytes()); // extra len
        self.data.extend_from_slice(name_bytes);
        self.data.extend_from_slice(stored);

        // Central directory file header
        self.central.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
        self.central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        self.central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        self.central.extend_from_slice(&0u16.to_le_bytes()); // flags
        self.central.extend_from_slice(&method.to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes()); // mod time
        self.central.extend_from_slice(&0u16.to_le_bytes()); // mod date
        self.central.extend_from_slice(&crc32.to_le_bytes());
        self.central
            .extend_from_slice(&(stored.len() as u32).to_le_bytes());
        self.central
            .extend_from_slice(&(contents.len() as u32).to_le_bytes());
        self.central
            .extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        self.central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        self.central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        self.central.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        self.central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        self.central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        self.central.extend_from_slice(&offset.to_le_bytes());
        self.central.extend_from_slice(name_bytes);

        self.count += 1;
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.data;
        let cd_offset = out.len() as u32;
        out.extend_from_slice(&self.central);
        let cd_size = out.len() as u32 - cd_offset;

        // End of central directory record
        out.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // disk with CD
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out
    }

    pub fn write_to(self, path: &Path) {
        std::fs::write(path, self.build()).expect("write zip fixture");
    }
}

/// A zip laid out like a database source archive
pub fn sample_source_zip() -> FixtureZip {
    FixtureZip::new()
        .add_dir("src")
        .add_file("src/main.c", b"int main(void) { return 0; }\n")
        .add_file_deflate("src/util.c", b"static int add(int a, int b) { return a + b; }\n")
        .add_file("README.md", b"# sample\n")
}
