//! RAR archive codec.
//!
//! Reads the block structure of both RAR generations:
//!
//! - RAR 1.5 to 4.x: fixed-width little-endian headers guarded by the low 16
//!   bits of a CRC-32
//! - RAR 5.0: variable-length integer headers guarded by a full CRC-32
//!
//! Entries stored without compression can be read. Compressed, encrypted, and
//! volume-spanning entries are listed but fail to decode; archives whose
//! headers are encrypted fail to open.
//!
//! Iteration ends only at an end-of-archive block. Running out of stream
//! before one, or a block whose data area extends past the end of the stream,
//! means the archive is truncated.

use std::io;
use std::io::Read;
use std::io::SeekFrom;

use crate::ArchiveOptions;
use crate::stream::ByteSource;

use super::ArchiveType;
use super::common;
use super::common::PayloadCrc;
use super::detect::RAR4_MAGIC;
use super::detect::RAR5_MAGIC;
use super::traits::EntryRecord;
use super::traits::FormatCodec;

const RAR4_MAIN_HEAD: u8 = 0x73;
const RAR4_FILE_HEAD: u8 = 0x74;
const RAR4_SERVICE_HEAD: u8 = 0x7A;
const RAR4_END_HEAD: u8 = 0x7B;

const RAR4_LONG_BLOCK: u16 = 0x8000;
const RAR4_MAIN_ENCRYPTED_HEADERS: u16 = 0x0080;
const RAR4_FILE_SPLIT: u16 = 0x0003;
const RAR4_FILE_ENCRYPTED: u16 = 0x0004;
const RAR4_FILE_DIRECTORY: u16 = 0x00E0;
const RAR4_FILE_LARGE: u16 = 0x0100;
const RAR4_FILE_UNICODE: u16 = 0x0200;
const RAR4_METHOD_STORE: u8 = 0x30;

const RAR5_MAIN: u64 = 1;
const RAR5_FILE: u64 = 2;
const RAR5_SERVICE: u64 = 3;
const RAR5_ENCRYPTION: u64 = 4;
const RAR5_END: u64 = 5;

const RAR5_HAS_EXTRA: u64 = 0x0001;
const RAR5_HAS_DATA: u64 = 0x0002;
const RAR5_SPLIT: u64 = 0x0018;
const RAR5_FILE_DIRECTORY: u64 = 0x0001;
const RAR5_FILE_HAS_MTIME: u64 = 0x0002;
const RAR5_FILE_HAS_CRC: u64 = 0x0004;
const RAR5_EXTRA_ENCRYPTION: u64 = 0x01;
const RAR5_EXTRA_TIME: u64 = 0x03;
const RAR5_TIME_UNIX: u64 = 0x0001;
const RAR5_TIME_HAS_MTIME: u64 = 0x0002;

/// Upper bound on a RAR5 header, per the format's own limit.
const RAR5_MAX_HEADER: u64 = 2 * 1024 * 1024;

/// Name of the service block holding the archive comment.
const COMMENT_SERVICE: &[u8] = b"CMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    Rar4,
    Rar5,
}

/// File or service block fields shared by both generations.
#[derive(Debug, Clone)]
struct FileBlock {
    raw_name: Vec<u8>,
    name: Option<String>,
    size: u64,
    packed_size: u64,
    data_start: u64,
    filetime: u64,
    crc32: Option<u32>,
    directory: bool,
    readable: bool,
}

#[derive(Debug)]
enum Block {
    Main { encrypted_headers: bool },
    Encryption,
    File(FileBlock),
    Service(FileBlock),
    End,
    Other,
}

#[derive(Debug)]
struct ParsedBlock {
    block: Block,
    next: u64,
}

#[derive(Debug, Clone)]
struct RarEntry {
    record: EntryRecord,
    data_start: u64,
    packed_size: u64,
    crc32: Option<u32>,
    readable: bool,
    next_block: u64,
}

#[derive(Debug, Clone, Copy)]
struct Comment {
    data_start: u64,
    size: u64,
}

/// RAR codec over a seekable stream.
#[derive(Debug)]
pub struct RarCodec<S> {
    stream: S,
    version: Version,
    verify_checksums: bool,
    stream_len: u64,
    entries_start: u64,
    next_block: u64,
    current: Option<RarEntry>,
    read_pos: u64,
    crc: PayloadCrc,
    comment: Option<Comment>,
    eof: bool,
}

impl<S: ByteSource> RarCodec<S> {
    fn detect_version(stream: &mut S) -> io::Result<Option<(Version, u64)>> {
        let mut signature = [0u8; 8];
        stream.seek(SeekFrom::Start(0))?;
        stream.read_exact(&mut signature)?;
        if signature == RAR5_MAGIC {
            Ok(Some((Version::Rar5, RAR5_MAGIC.len() as u64)))
        } else if signature[..7] == RAR4_MAGIC {
            Ok(Some((Version::Rar4, RAR4_MAGIC.len() as u64)))
        } else {
            Ok(None)
        }
    }

    /// Parses the block at `pos`.
    fn read_block(&mut self, pos: u64) -> io::Result<ParsedBlock> {
        if pos >= self.stream_len {
            return Err(truncated("archive ends without an end-of-archive block"));
        }
        self.stream.seek(SeekFrom::Start(pos))?;
        let parsed = match self.version {
            Version::Rar4 => self.read_rar4_block(pos)?,
            Version::Rar5 => self.read_rar5_block(pos)?,
        };
        if parsed.next <= pos {
            return Err(invalid("block does not advance"));
        }
        if parsed.next > self.stream_len {
            return Err(truncated("block data runs past the end of the archive"));
        }
        Ok(parsed)
    }

    fn read_rar4_block(&mut self, pos: u64) -> io::Result<ParsedBlock> {
        let mut fixed = [0u8; 7];
        self.stream.read_exact(&mut fixed)?;
        let crc = u16::from_le_bytes([fixed[0], fixed[1]]);
        let kind = fixed[2];
        let flags = u16::from_le_bytes([fixed[3], fixed[4]]);
        let head_size = usize::from(u16::from_le_bytes([fixed[5], fixed[6]]));
        if head_size < fixed.len() {
            return Err(invalid("header shorter than its fixed part"));
        }

        let mut header = vec![0u8; head_size];
        header[..fixed.len()].copy_from_slice(&fixed);
        self.stream.read_exact(&mut header[fixed.len()..])?;
        #[allow(clippy::cast_possible_truncation)]
        let computed = crc32fast::hash(&header[2..]) as u16;
        if self.verify_checksums && computed != crc {
            return Err(invalid("header CRC mismatch"));
        }

        let mut fields = Fields::new(&header);
        fields.skip(fixed.len())?;
        let is_file = kind == RAR4_FILE_HEAD || kind == RAR4_SERVICE_HEAD;
        let mut data_size = if is_file || flags & RAR4_LONG_BLOCK != 0 {
            u64::from(fields.u32()?)
        } else {
            0
        };

        let block = match kind {
            RAR4_MAIN_HEAD => Block::Main {
                encrypted_headers: flags & RAR4_MAIN_ENCRYPTED_HEADERS != 0,
            },
            RAR4_END_HEAD => Block::End,
            RAR4_FILE_HEAD | RAR4_SERVICE_HEAD => {
                let low_size = u64::from(fields.u32()?);
                let _host_os = fields.u8()?;
                let file_crc = fields.u32()?;
                let ftime = fields.u32()?;
                let _unpack_version = fields.u8()?;
                let method = fields.u8()?;
                let name_size = usize::from(fields.u16()?);
                let _attributes = fields.u32()?;

                let mut size = low_size;
                if flags & RAR4_FILE_LARGE != 0 {
                    data_size |= u64::from(fields.u32()?) << 32;
                    size |= u64::from(fields.u32()?) << 32;
                }
                let stored_name = fields.bytes(name_size)?;
                let name = if flags & RAR4_FILE_UNICODE == 0 {
                    std::str::from_utf8(stored_name).ok().map(str::to_owned)
                } else {
                    match stored_name.iter().position(|b| *b == 0) {
                        Some(nul) => decode_rar4_unicode(&stored_name[..nul], &stored_name[nul + 1..]),
                        None => std::str::from_utf8(stored_name).ok().map(str::to_owned),
                    }
                };

                #[allow(clippy::cast_possible_truncation)]
                let filetime = common::filetime_from_dos((ftime >> 16) as u16, ftime as u16);
                let file = FileBlock {
                    raw_name: stored_name.to_vec(),
                    name,
                    size,
                    packed_size: data_size,
                    data_start: pos + head_size as u64,
                    filetime,
                    crc32: Some(file_crc),
                    directory: flags & RAR4_FILE_DIRECTORY == RAR4_FILE_DIRECTORY,
                    readable: method == RAR4_METHOD_STORE
                        && flags & (RAR4_FILE_SPLIT | RAR4_FILE_ENCRYPTED) == 0,
                };
                if kind == RAR4_FILE_HEAD {
                    Block::File(file)
                } else {
                    Block::Service(file)
                }
            }
            _ => Block::Other,
        };

        let next = (pos + head_size as u64)
            .checked_add(data_size)
            .ok_or_else(|| invalid("block size overflows"))?;
        Ok(ParsedBlock { block, next })
    }

    fn read_rar5_block(&mut self, pos: u64) -> io::Result<ParsedBlock> {
        let mut crc_bytes = [0u8; 4];
        self.stream.read_exact(&mut crc_bytes)?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let size_bytes = read_vint_bytes(&mut self.stream)?;
        let header_size = Fields::new(&size_bytes).vint()?;
        if header_size == 0 || header_size > RAR5_MAX_HEADER {
            return Err(invalid("header size out of range"));
        }
        #[allow(clippy::cast_possible_truncation)]
        let mut header = vec![0u8; header_size as usize];
        self.stream.read_exact(&mut header)?;

        if self.verify_checksums {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&size_bytes);
            hasher.update(&header);
            if hasher.finalize() != stored_crc {
                return Err(invalid("header CRC mismatch"));
            }
        }

        let mut fields = Fields::new(&header);
        let kind = fields.vint()?;
        let flags = fields.vint()?;
        let extra_size = if flags & RAR5_HAS_EXTRA == 0 {
            0
        } else {
            fields.vint()?
        };
        let data_size = if flags & RAR5_HAS_DATA == 0 {
            0
        } else {
            fields.vint()?
        };
        let data_start = pos + (crc_bytes.len() + size_bytes.len()) as u64 + header_size;

        let block = match kind {
            RAR5_MAIN => Block::Main {
                encrypted_headers: false,
            },
            RAR5_ENCRYPTION => Block::Encryption,
            RAR5_END => Block::End,
            RAR5_FILE | RAR5_SERVICE => {
                let file_flags = fields.vint()?;
                let size = fields.vint()?;
                let _attributes = fields.vint()?;
                let mtime = if file_flags & RAR5_FILE_HAS_MTIME == 0 {
                    None
                } else {
                    Some(fields.u32()?)
                };
                let crc32 = if file_flags & RAR5_FILE_HAS_CRC == 0 {
                    None
                } else {
                    Some(fields.u32()?)
                };
                let compression = fields.vint()?;
                let _host_os = fields.vint()?;
                let name_len = usize::try_from(fields.vint()?)
                    .map_err(|_| invalid("name length out of range"))?;
                let raw_name = fields.bytes(name_len)?.to_vec();

                let extra = usize::try_from(extra_size)
                    .ok()
                    .and_then(|len| header.len().checked_sub(len))
                    .map(|start| &header[start..])
                    .ok_or_else(|| invalid("extra area out of range"))?;
                let extra = parse_rar5_extra(extra)?;

                let filetime = extra
                    .filetime
                    .or_else(|| mtime.map(|t| common::filetime_from_unix(u64::from(t))))
                    .unwrap_or(0);
                let method = (compression >> 7) & 0x07;
                let file = FileBlock {
                    name: String::from_utf8(raw_name.clone()).ok(),
                    raw_name,
                    size,
                    packed_size: data_size,
                    data_start,
                    filetime,
                    crc32,
                    directory: file_flags & RAR5_FILE_DIRECTORY != 0,
                    readable: method == 0 && !extra.encrypted && flags & RAR5_SPLIT == 0,
                };
                if kind == RAR5_FILE {
                    Block::File(file)
                } else {
                    Block::Service(file)
                }
            }
            _ => Block::Other,
        };

        let next = data_start
            .checked_add(data_size)
            .ok_or_else(|| invalid("block size overflows"))?;
        Ok(ParsedBlock { block, next })
    }

    /// Walks blocks from `pos` to the next non-directory file entry.
    fn scan_from(&mut self, mut pos: u64) -> io::Result<Option<RarEntry>> {
        loop {
            let parsed = self.read_block(pos)?;
            match parsed.block {
                Block::File(file) if !file.directory => {
                    return Ok(Some(RarEntry {
                        record: EntryRecord {
                            name: file.name,
                            raw_name: Some(file.raw_name),
                            offset: pos,
                            size: file.size,
                            filetime: file.filetime,
                        },
                        data_start: file.data_start,
                        packed_size: file.packed_size,
                        crc32: file.crc32,
                        readable: file.readable,
                        next_block: parsed.next,
                    }));
                }
                Block::End => return Ok(None),
                _ => pos = parsed.next,
            }
        }
    }

    fn commit(&mut self, entry: RarEntry) {
        self.next_block = entry.next_block;
        self.current = Some(entry);
        self.read_pos = 0;
        self.crc = PayloadCrc::new();
        self.eof = false;
    }

    fn read_payload(&mut self, out: &mut [u8]) -> io::Result<()> {
        let entry = self
            .current
            .as_ref()
            .ok_or_else(|| invalid("no current entry"))?;
        if !entry.readable {
            return Err(io::Error::other(
                "entry is compressed, encrypted, or split across volumes",
            ));
        }
        if entry.record.size > entry.packed_size {
            return Err(invalid("stored entry is larger than its data area"));
        }
        let end = self
            .read_pos
            .checked_add(out.len() as u64)
            .filter(|end| *end <= entry.record.size)
            .ok_or_else(|| invalid("read past end of entry"))?;

        self.stream
            .seek(SeekFrom::Start(entry.data_start + self.read_pos))?;
        self.stream.read_exact(out)?;
        self.crc.update(out);
        self.read_pos = end;

        if end == entry.record.size && self.verify_checksums {
            if let Some(expected) = entry.crc32 {
                if !self.crc.matches(expected) {
                    return Err(invalid("data CRC mismatch"));
                }
            }
        }
        Ok(())
    }

    /// Locates a stored comment service block right after the main header.
    fn find_comment(&mut self) -> Option<Comment> {
        match self.read_block(self.entries_start) {
            Ok(ParsedBlock {
                block: Block::Service(file),
                ..
            }) if file.raw_name == COMMENT_SERVICE && file.readable => Some(Comment {
                data_start: file.data_start,
                size: file.size.min(file.packed_size),
            }),
            _ => None,
        }
    }
}

impl<S: ByteSource> FormatCodec<S> for RarCodec<S> {
    const TYPE: ArchiveType = ArchiveType::Rar;

    fn open(mut stream: S, options: ArchiveOptions) -> Option<Self> {
        let (version, main_start) = match Self::detect_version(&mut stream) {
            Ok(Some(found)) => found,
            Ok(None) => {
                log::debug!("rar: signature not found");
                return None;
            }
            Err(e) => {
                log::debug!("rar: cannot read signature: {e}");
                return None;
            }
        };
        let stream_len = stream.length().ok()?;

        let mut codec = Self {
            stream,
            version,
            verify_checksums: options.verify_checksums,
            stream_len,
            entries_start: main_start,
            next_block: main_start,
            current: None,
            read_pos: 0,
            crc: PayloadCrc::new(),
            comment: None,
            eof: false,
        };

        match codec.read_block(main_start) {
            Ok(ParsedBlock {
                block: Block::Main { encrypted_headers: false },
                next,
            }) => {
                codec.entries_start = next;
                codec.next_block = next;
            }
            Ok(ParsedBlock {
                block: Block::Main { encrypted_headers: true } | Block::Encryption,
                ..
            }) => {
                log::debug!("rar: archive headers are encrypted");
                return None;
            }
            Ok(_) => {
                log::debug!("rar: main archive header missing");
                return None;
            }
            Err(e) => {
                log::debug!("rar: invalid main archive header: {e}");
                return None;
            }
        }

        codec.comment = codec.find_comment();
        log::debug!("rar: opened {version:?} archive");
        Some(codec)
    }

    fn parse_next(&mut self) -> bool {
        match self.scan_from(self.next_block) {
            Ok(Some(entry)) => {
                self.commit(entry);
                true
            }
            Ok(None) => {
                self.eof = true;
                false
            }
            Err(e) => {
                log::warn!("rar: invalid block at offset {}: {e}", self.next_block);
                false
            }
        }
    }

    fn parse_at(&mut self, offset: u64) -> bool {
        if offset < self.entries_start {
            log::warn!("rar: offset {offset} lies inside the archive header");
            return false;
        }
        match self.scan_from(offset) {
            Ok(Some(entry)) => {
                self.commit(entry);
                true
            }
            Ok(None) => {
                log::warn!("rar: no entry at offset {offset}");
                false
            }
            Err(e) => {
                log::warn!("rar: invalid block at offset {offset}: {e}");
                false
            }
        }
    }

    fn find_by_name(&mut self, name: &[u8]) -> bool {
        let mut pos = self.entries_start;
        loop {
            match self.scan_from(pos) {
                Ok(Some(entry)) if entry.record.name_matches(name) => {
                    self.commit(entry);
                    return true;
                }
                Ok(Some(entry)) => pos = entry.next_block,
                Ok(None) => return false,
                Err(e) => {
                    log::warn!(
                        "rar: lookup of {:?} stopped at offset {pos}: {e}",
                        String::from_utf8_lossy(name)
                    );
                    return false;
                }
            }
        }
    }

    fn at_eof(&self) -> bool {
        self.eof
    }

    fn entry(&self) -> Option<&EntryRecord> {
        self.current.as_ref().map(|entry| &entry.record)
    }

    fn decompress(&mut self, out: &mut [u8]) -> bool {
        match self.read_payload(out) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("rar: cannot read payload: {e}");
                false
            }
        }
    }

    fn global_comment(&mut self, buf: Option<&mut [u8]>) -> usize {
        let Some(comment) = self.comment else {
            return 0;
        };
        let size = usize::try_from(comment.size).unwrap_or(usize::MAX);
        let Some(buf) = buf else {
            return size;
        };

        let n = buf.len().min(size);
        let read = self
            .stream
            .seek(SeekFrom::Start(comment.data_start))
            .and_then(|_| self.stream.read_exact(&mut buf[..n]));
        match read {
            Ok(()) => n,
            Err(e) => {
                log::warn!("rar: cannot read archive comment: {e}");
                0
            }
        }
    }

    fn into_stream(self) -> S {
        self.stream
    }
}

/// Fields from a RAR5 extra area that affect reading.
#[derive(Debug, Default)]
struct Rar5Extra {
    encrypted: bool,
    filetime: Option<u64>,
}

fn parse_rar5_extra(area: &[u8]) -> io::Result<Rar5Extra> {
    let mut extra = Rar5Extra::default();
    let mut fields = Fields::new(area);
    while !fields.is_empty() {
        let record_size = usize::try_from(fields.vint()?)
            .map_err(|_| invalid("extra record size out of range"))?;
        let body = fields.bytes(record_size)?;
        let mut record = Fields::new(body);
        match record.vint()? {
            RAR5_EXTRA_ENCRYPTION => extra.encrypted = true,
            RAR5_EXTRA_TIME => {
                let time_flags = record.vint()?;
                if time_flags & RAR5_TIME_HAS_MTIME != 0 {
                    extra.filetime = Some(if time_flags & RAR5_TIME_UNIX == 0 {
                        record.u64()?
                    } else {
                        common::filetime_from_unix(u64::from(record.u32()?))
                    });
                }
            }
            _ => {}
        }
    }
    Ok(extra)
}

/// Decodes the compressed UTF-16 name RAR 2.x to 4.x stores after the
/// ASCII fallback name.
///
/// Decoding stops at the first truncated unit; whatever was decoded up to
/// that point is kept.
fn decode_rar4_unicode(ascii: &[u8], encoded: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(ascii.len());
    decode_rar4_units(ascii, encoded, &mut units);
    if units.is_empty() {
        return std::str::from_utf8(ascii).ok().map(str::to_owned);
    }
    String::from_utf16(&units).ok()
}

fn decode_rar4_units(ascii: &[u8], encoded: &[u8], units: &mut Vec<u16>) -> Option<()> {
    let (&high, mut enc) = encoded.split_first()?;
    let high = u16::from(high) << 8;
    let mut flags = 0u8;
    let mut flag_bits = 0u8;

    while !enc.is_empty() {
        if flag_bits == 0 {
            (flags, enc) = (enc[0], &enc[1..]);
            flag_bits = 8;
        }
        match flags >> 6 {
            0 => {
                units.push(u16::from(*enc.first()?));
                enc = enc.get(1..)?;
            }
            1 => {
                units.push(u16::from(*enc.first()?) | high);
                enc = enc.get(1..)?;
            }
            2 => {
                units.push(u16::from_le_bytes([*enc.first()?, *enc.get(1)?]));
                enc = enc.get(2..)?;
            }
            _ => {
                let length = *enc.first()?;
                enc = enc.get(1..)?;
                if length & 0x80 == 0 {
                    for _ in 0..u16::from(length) + 2 {
                        units.push(u16::from(*ascii.get(units.len())?));
                    }
                } else {
                    let correction = *enc.first()?;
                    enc = enc.get(1..)?;
                    for _ in 0..u16::from(length & 0x7F) + 2 {
                        let byte = ascii.get(units.len())?.wrapping_add(correction);
                        units.push(u16::from(byte) | high);
                    }
                }
            }
        }
        flags <<= 2;
        flag_bits -= 2;
    }
    Some(())
}

/// Reads the raw bytes of one RAR5 variable-length integer from the stream.
fn read_vint_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(3);
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        bytes.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            return Ok(bytes);
        }
        if bytes.len() == 10 {
            return Err(invalid("variable-length integer too long"));
        }
    }
}

/// Bounds-checked little-endian field reader over a header buffer.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| invalid("header field runs past the header"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> io::Result<()> {
        self.bytes(len).map(|_| ())
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> io::Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> io::Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> io::Result<u64> {
        let lo = u64::from(self.u32()?);
        let hi = u64::from(self.u32()?);
        Ok(lo | (hi << 32))
    }

    fn vint(&mut self) -> io::Result<u64> {
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F).checked_shl(shift).unwrap_or(0);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(invalid("variable-length integer too long"))
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn truncated(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg.to_string())
}
