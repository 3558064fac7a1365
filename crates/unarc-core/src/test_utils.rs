//! Test utilities for building in-memory archives.
//!
//! TAR, ZIP, and 7z fixtures come from the writers of the crates the codecs
//! read with. ZIP archives needing a specific method, checksum, or comment
//! and all RAR archives are assembled byte by byte.
//!
//! # Panics
//!
//! All functions in this module may panic on I/O errors since they are
//! designed for test use only where panics are acceptable.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc, clippy::cast_possible_truncation)]

use std::io::Cursor;
use std::io::Write;

/// Creates an in-memory TAR archive from a list of entries.
///
/// Each entry is a tuple of (path, content). Files are created with mode
/// 0o644 and a zero modification time.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::create_test_tar;
///
/// let tar_data = create_test_tar(&[("file.txt", b"hello"), ("dir/nested.txt", b"world")]);
/// ```
#[must_use]
pub fn create_test_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = TarTestBuilder::new();
    for (path, data) in entries {
        builder = builder.add_file(path, data);
    }
    builder.build()
}

/// Creates an in-memory ZIP archive from a list of entries.
///
/// Each entry is a tuple of (path, content). Files are stored uncompressed.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::create_test_zip;
///
/// let zip_data = create_test_zip(&[("file.txt", b"hello"), ("dir/nested.txt", b"world")]);
/// ```
#[must_use]
pub fn create_test_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;
    use zip::write::ZipWriter;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);

    for (path, data) in entries {
        zip.start_file(*path, options).unwrap();
        zip.write_all(data).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

/// Builder for TAR test archives with files and directories.
///
/// Names longer than the 100-byte header field get a GNU long-name record.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::TarTestBuilder;
///
/// let tar_data = TarTestBuilder::new()
///     .add_directory("dir/")
///     .add_file("dir/file.txt", b"content")
///     .build();
/// ```
pub struct TarTestBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl TarTestBuilder {
    /// Creates a new TAR test builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    /// Adds a regular file to the archive.
    #[must_use]
    pub fn add_file(mut self, path: &str, data: &[u8]) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        self.builder.append_data(&mut header, path, data).unwrap();
        self
    }

    /// Adds a regular file whose header name field holds `name` verbatim.
    ///
    /// Lets tests store names that are not valid UTF-8. `name` must fit the
    /// 100-byte field.
    #[must_use]
    pub fn add_raw_name(mut self, name: &[u8], data: &[u8]) -> Self {
        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        self.builder.append(&header, data).unwrap();
        self
    }

    /// Adds a directory to the archive.
    #[must_use]
    pub fn add_directory(mut self, path: &str) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Directory);
        header.set_cksum();
        self.builder
            .append_data(&mut header, path, std::io::empty())
            .unwrap();
        self
    }

    /// Builds and returns the TAR archive data.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

impl Default for TarTestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compression method of a [`ZipFixture`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMethod {
    /// Method 0.
    Stored,
    /// Method 8, raw deflate.
    Deflated,
    /// Method 12.
    Bzip2,
}

impl ZipMethod {
    const fn code(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
            Self::Bzip2 => 12,
        }
    }

    fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Stored => data.to_vec(),
            Self::Deflated => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            Self::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
        }
    }
}

struct ZipFixtureEntry {
    name: String,
    data: Vec<u8>,
    method: ZipMethod,
    crc32: u32,
}

/// Byte-level ZIP builder for archives the `zip` writer cannot produce
/// directly: chosen methods, wrong checksums, archive comments.
///
/// Every entry carries the timestamp [`DOS_DATE`](Self::DOS_DATE) /
/// [`DOS_TIME`](Self::DOS_TIME). Names ending in `/` are directories.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::ZipFixture;
/// use unarc_core::test_utils::ZipMethod;
///
/// let zip_data = ZipFixture::new()
///     .add("notes.txt", b"some notes", ZipMethod::Deflated)
///     .comment(b"release bundle")
///     .build();
/// ```
#[derive(Default)]
pub struct ZipFixture {
    entries: Vec<ZipFixtureEntry>,
    comment: Vec<u8>,
}

impl ZipFixture {
    /// 2024-03-14.
    pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (3 << 5) | 14;
    /// 09:26:52.
    pub const DOS_TIME: u16 = (9 << 11) | (26 << 5) | (52 / 2);

    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry with its correct CRC-32.
    #[must_use]
    pub fn add(self, name: &str, data: &[u8], method: ZipMethod) -> Self {
        let crc32 = crc32fast::hash(data);
        self.add_with_crc(name, data, method, crc32)
    }

    /// Adds an entry declaring `crc32` as its checksum.
    #[must_use]
    pub fn add_with_crc(mut self, name: &str, data: &[u8], method: ZipMethod, crc32: u32) -> Self {
        self.entries.push(ZipFixtureEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            crc32,
        });
        self
    }

    /// Sets the archive comment.
    #[must_use]
    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Builds and returns the ZIP archive data.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let offset = out.len() as u32;
            let packed = entry.method.compress(&entry.data);
            let name = entry.name.as_bytes();
            let external_attrs: u32 = if entry.name.ends_with('/') { 0x10 } else { 0 };

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&entry.method.code().to_le_bytes());
            out.extend_from_slice(&Self::DOS_TIME.to_le_bytes());
            out.extend_from_slice(&Self::DOS_DATE.to_le_bytes());
            out.extend_from_slice(&entry.crc32.to_le_bytes());
            out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(&packed);

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&entry.method.code().to_le_bytes());
            central.extend_from_slice(&Self::DOS_TIME.to_le_bytes());
            central.extend_from_slice(&Self::DOS_DATE.to_le_bytes());
            central.extend_from_slice(&entry.crc32.to_le_bytes());
            central.extend_from_slice(&(packed.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]);
            central.extend_from_slice(&external_attrs.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name);
        }

        let central_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Header generation of a [`RarFixture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RarVersion {
    /// RAR 1.5 to 4.x block headers.
    V4,
    /// RAR 5.0 block headers.
    V5,
}

struct RarFixtureEntry {
    name: String,
    data: Vec<u8>,
    directory: bool,
    compressed: bool,
}

/// Byte-level RAR builder producing archives of stored entries.
///
/// RAR4 entries carry [`DOS_DATE`](Self::DOS_DATE) /
/// [`DOS_TIME`](Self::DOS_TIME); RAR5 entries carry
/// [`UNIX_MTIME`](Self::UNIX_MTIME). All header and data checksums are
/// valid.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::RarFixture;
/// use unarc_core::test_utils::RarVersion;
///
/// let rar_data = RarFixture::new(RarVersion::V5)
///     .comment(b"archive comment")
///     .add_directory("docs")
///     .add_file("docs/readme.txt", b"read me")
///     .build();
/// ```
pub struct RarFixture {
    version: RarVersion,
    comment: Option<Vec<u8>>,
    entries: Vec<RarFixtureEntry>,
}

impl RarFixture {
    /// 2023-11-02.
    pub const DOS_DATE: u16 = ((2023 - 1980) << 9) | (11 << 5) | 2;
    /// 17:45:10.
    pub const DOS_TIME: u16 = (17 << 11) | (45 << 5) | (10 / 2);
    /// 2023-11-14 22:13:20 UTC.
    pub const UNIX_MTIME: u32 = 1_700_000_000;

    /// Creates an empty fixture.
    #[must_use]
    pub fn new(version: RarVersion) -> Self {
        Self {
            version,
            comment: None,
            entries: Vec::new(),
        }
    }

    /// Adds a stored file.
    #[must_use]
    pub fn add_file(mut self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, false);
        self
    }

    /// Adds a directory.
    #[must_use]
    pub fn add_directory(mut self, name: &str) -> Self {
        self.push(name, b"", true, false);
        self
    }

    /// Adds a file whose header declares a compressing method.
    ///
    /// The data is written as is, so the entry lists normally but cannot be
    /// read.
    #[must_use]
    pub fn add_compressed(mut self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, true);
        self
    }

    /// Sets the archive comment, written as a stored comment service block.
    #[must_use]
    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = Some(comment.to_vec());
        self
    }

    fn push(&mut self, name: &str, data: &[u8], directory: bool, compressed: bool) {
        self.entries.push(RarFixtureEntry {
            name: name.to_string(),
            data: data.to_vec(),
            directory,
            compressed,
        });
    }

    /// Builds and returns the RAR archive data.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        match self.version {
            RarVersion::V4 => self.build_v4(),
            RarVersion::V5 => self.build_v5(),
        }
    }

    fn build_v4(self) -> Vec<u8> {
        let mut out = vec![0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
        out.extend(rar4_block(0x73, 0, &[0u8; 6]));
        if let Some(comment) = &self.comment {
            out.extend(rar4_file_block(0x7A, "CMT", comment, false, false));
        }
        for entry in &self.entries {
            out.extend(rar4_file_block(
                0x74,
                &entry.name,
                &entry.data,
                entry.directory,
                entry.compressed,
            ));
        }
        out.extend(rar4_block(0x7B, 0x4000, &[]));
        out
    }

    fn build_v5(self) -> Vec<u8> {
        let mut out = vec![0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
        out.extend(rar5_block(1, None, &vint(0)));
        if let Some(comment) = &self.comment {
            out.extend(rar5_file_block(3, "CMT", comment, false, false));
        }
        for entry in &self.entries {
            out.extend(rar5_file_block(
                2,
                &entry.name,
                &entry.data,
                entry.directory,
                entry.compressed,
            ));
        }
        out.extend(rar5_block(5, None, &vint(0)));
        out
    }
}

fn rar4_block(kind: u8, flags: u16, body: &[u8]) -> Vec<u8> {
    let mut header = vec![kind];
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&((7 + body.len()) as u16).to_le_bytes());
    header.extend_from_slice(body);
    let crc = crc32fast::hash(&header) as u16;

    let mut block = crc.to_le_bytes().to_vec();
    block.extend(header);
    block
}

fn rar4_file_block(kind: u8, name: &str, data: &[u8], directory: bool, compressed: bool) -> Vec<u8> {
    let flags = 0x8000 | if directory { 0x00E0 } else { 0 };
    let ftime = (u32::from(RarFixture::DOS_DATE) << 16) | u32::from(RarFixture::DOS_TIME);
    let attributes: u32 = if directory { 0x10 } else { 0x20 };

    let mut body = Vec::new();
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.push(3);
    body.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    body.extend_from_slice(&ftime.to_le_bytes());
    body.push(29);
    body.push(if compressed { 0x33 } else { 0x30 });
    body.extend_from_slice(&(name.len() as u16).to_le_bytes());
    body.extend_from_slice(&attributes.to_le_bytes());
    body.extend_from_slice(name.as_bytes());

    let mut block = rar4_block(kind, flags, &body);
    block.extend_from_slice(data);
    block
}

fn vint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn rar5_block(kind: u64, data_len: Option<usize>, body: &[u8]) -> Vec<u8> {
    let mut header = vint(kind);
    header.extend(vint(if data_len.is_some() { 0x0002 } else { 0 }));
    if let Some(len) = data_len {
        header.extend(vint(len as u64));
    }
    header.extend_from_slice(body);

    let mut sized = vint(header.len() as u64);
    sized.extend(header);
    let mut block = crc32fast::hash(&sized).to_le_bytes().to_vec();
    block.extend(sized);
    block
}

fn rar5_file_block(kind: u64, name: &str, data: &[u8], directory: bool, compressed: bool) -> Vec<u8> {
    let file_flags = if directory { 0x0001 | 0x0002 } else { 0x0002 | 0x0004 };
    let mut body = vint(file_flags);
    body.extend(vint(data.len() as u64));
    body.extend(vint(if directory { 0x10 } else { 0x20 }));
    body.extend_from_slice(&RarFixture::UNIX_MTIME.to_le_bytes());
    if !directory {
        body.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    }
    body.extend(vint(if compressed { 3 << 7 } else { 0 }));
    body.extend(vint(1));
    body.extend(vint(name.len() as u64));
    body.extend_from_slice(name.as_bytes());

    let data_len = (!directory).then_some(data.len());
    let mut block = rar5_block(kind, data_len, &body);
    block.extend_from_slice(data);
    block
}

/// Builder for 7z test archives, one compressed block per file.
///
/// # Examples
///
/// ```
/// use unarc_core::test_utils::SevenZFixture;
///
/// let sevenz_data = SevenZFixture::new()
///     .add_directory("dir")
///     .add_file("dir/file.txt", b"content")
///     .build();
/// ```
pub struct SevenZFixture {
    writer: sevenz_rust2::ArchiveWriter<Cursor<Vec<u8>>>,
}

impl SevenZFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: sevenz_rust2::ArchiveWriter::new(Cursor::new(Vec::new())).unwrap(),
        }
    }

    /// Adds a file.
    #[must_use]
    pub fn add_file(mut self, name: &str, data: &[u8]) -> Self {
        self.writer
            .push_archive_entry(sevenz_rust2::ArchiveEntry::new_file(name), Some(data))
            .unwrap();
        self
    }

    /// Adds a directory.
    #[must_use]
    pub fn add_directory(mut self, name: &str) -> Self {
        self.writer
            .push_archive_entry::<&[u8]>(sevenz_rust2::ArchiveEntry::new_directory(name), None)
            .unwrap();
        self
    }

    /// Adds files packed together into one solid block.
    #[must_use]
    pub fn add_solid(mut self, files: &[(&str, &[u8])]) -> Self {
        let entries = files
            .iter()
            .map(|(name, _)| sevenz_rust2::ArchiveEntry::new_file(name))
            .collect();
        let readers = files
            .iter()
            .map(|(_, data)| sevenz_rust2::SourceReader::new(*data))
            .collect();
        self.writer.push_archive_entries(entries, readers).unwrap();
        self
    }

    /// Builds and returns the 7z archive data.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.writer.finish().unwrap().into_inner()
    }
}

impl Default for SevenZFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_tar() {
        let tar_data = create_test_tar(&[("file.txt", b"hello")]);
        assert_eq!(tar_data.len() % 512, 0);
    }

    #[test]
    fn test_zip_fixture_layout() {
        let data = ZipFixture::new()
            .add("a", b"a", ZipMethod::Stored)
            .comment(b"c")
            .build();
        assert_eq!(&data[..4], b"PK\x03\x04");
        assert_eq!(data.last(), Some(&b'c'));
    }

    #[test]
    fn test_rar_fixture_signatures() {
        let v4 = RarFixture::new(RarVersion::V4).build();
        let v5 = RarFixture::new(RarVersion::V5).build();
        assert_eq!(&v4[..7], b"Rar!\x1A\x07\x00");
        assert_eq!(&v5[..8], b"Rar!\x1A\x07\x01\x00");
    }

    #[test]
    fn test_vint_encoding() {
        assert_eq!(vint(0), [0x00]);
        assert_eq!(vint(127), [0x7F]);
        assert_eq!(vint(128), [0x80, 0x01]);
    }
}
