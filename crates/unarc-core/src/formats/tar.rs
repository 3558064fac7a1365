//! Tar archive codec.
//!
//! Header parsing is delegated to the `tar` crate, one record at a time: each
//! step builds a fresh `tar::Archive` over the stream positioned at a record
//! boundary and takes its first entry. GNU long names and PAX extensions are
//! therefore folded into the record they describe, and a record's offset is
//! the position of its first header block. Payloads are stored uncompressed,
//! so reads go straight to the stream.
//!
//! Only a zero block ends the archive. A stream that runs out before one, or
//! a record whose payload extends past the end of the stream, is truncated.

use std::io;
use std::io::SeekFrom;

use crate::ArchiveOptions;
use crate::stream::ByteSource;

use super::ArchiveType;
use super::common;
use super::traits::EntryRecord;
use super::traits::FormatCodec;

const BLOCK_SIZE: u64 = 512;

/// Byte range of the checksum field inside a header block.
const CKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// A parsed record together with where its payload lives.
#[derive(Debug, Clone)]
struct TarRecord {
    entry: EntryRecord,
    data_start: u64,
    next_header: u64,
}

enum Scan {
    Record(TarRecord),
    End,
}

/// Tar codec over a seekable stream.
#[derive(Debug)]
pub struct TarCodec<S> {
    stream: S,
    stream_len: u64,
    next_header: u64,
    current: Option<TarRecord>,
    read_pos: u64,
    eof: bool,
}

impl<S: ByteSource> TarCodec<S> {
    /// Checks the checksum of the first header block.
    ///
    /// Tar has no magic number shared by all variants; a valid header
    /// checksum is the most reliable signature available.
    fn has_valid_first_header(stream: &mut S) -> io::Result<bool> {
        let mut header = tar::Header::new_old();
        stream.seek(SeekFrom::Start(0))?;
        stream.read_exact(header.as_mut_bytes())?;

        let Ok(stored) = header.cksum() else {
            return Ok(false);
        };
        let computed: u32 = header
            .as_bytes()
            .iter()
            .enumerate()
            .map(|(i, b)| {
                if CKSUM_RANGE.contains(&i) {
                    u32::from(b' ')
                } else {
                    u32::from(*b)
                }
            })
            .sum();
        Ok(stored == computed)
    }

    /// Parses records from `pos` until a regular file or the end marker.
    ///
    /// Directories, links, devices, and global PAX headers carry no payload
    /// and are stepped over.
    fn scan_from(&mut self, mut pos: u64) -> io::Result<Scan> {
        loop {
            if pos
                .checked_add(BLOCK_SIZE)
                .is_none_or(|end| end > self.stream_len)
            {
                return Err(truncated("archive ends without an end-of-archive marker"));
            }
            let mut block = [0u8; BLOCK_SIZE as usize];
            self.stream.seek(SeekFrom::Start(pos))?;
            self.stream.read_exact(&mut block)?;
            if block.iter().all(|b| *b == 0) {
                return Ok(Scan::End);
            }

            self.stream.seek(SeekFrom::Start(pos))?;
            let mut archive = tar::Archive::new(&mut self.stream);
            let mut entries = archive.entries()?;
            let Some(entry) = entries.next() else {
                return Err(truncated("record ends inside its headers"));
            };
            let entry = entry?;

            let entry_type = entry.header().entry_type();
            let is_file = matches!(
                entry_type,
                tar::EntryType::Regular | tar::EntryType::Continuous
            );
            let size = if is_file {
                entry.size()
            } else {
                entry.header().entry_size()?
            };
            let data_start = pos
                .checked_add(entry.raw_file_position())
                .ok_or_else(|| invalid("record position overflows"))?;
            let next_header = size
                .div_ceil(BLOCK_SIZE)
                .checked_mul(BLOCK_SIZE)
                .and_then(|padded| data_start.checked_add(padded))
                .ok_or_else(|| invalid("record size overflows"))?;
            if data_start.saturating_add(size) > self.stream_len {
                return Err(truncated("record payload runs past the end of the archive"));
            }

            if !is_file {
                log::debug!("tar: skipping {entry_type:?} record at offset {pos}");
                pos = next_header;
                continue;
            }

            let filetime = entry
                .header()
                .mtime()
                .map_or(0, common::filetime_from_unix);
            let raw_name = entry.path_bytes().into_owned();
            return Ok(Scan::Record(TarRecord {
                entry: EntryRecord::from_raw_name(raw_name, pos, size, filetime),
                data_start,
                next_header,
            }));
        }
    }

    fn commit(&mut self, record: TarRecord) {
        self.next_header = record.next_header;
        self.current = Some(record);
        self.read_pos = 0;
        self.eof = false;
    }

    fn read_payload(&mut self, out: &mut [u8]) -> io::Result<()> {
        let record = self
            .current
            .as_ref()
            .ok_or_else(|| invalid("no current entry"))?;
        let end = self
            .read_pos
            .checked_add(out.len() as u64)
            .filter(|end| *end <= record.entry.size)
            .ok_or_else(|| invalid("read past end of entry"))?;

        self.stream
            .seek(SeekFrom::Start(record.data_start + self.read_pos))?;
        self.stream.read_exact(out)?;
        self.read_pos = end;
        Ok(())
    }
}

impl<S: ByteSource> FormatCodec<S> for TarCodec<S> {
    const TYPE: ArchiveType = ArchiveType::Tar;

    fn open(mut stream: S, _options: ArchiveOptions) -> Option<Self> {
        let stream_len = stream.length().ok()?;
        match Self::has_valid_first_header(&mut stream) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("tar: first header checksum mismatch");
                return None;
            }
            Err(e) => {
                log::debug!("tar: cannot read first header: {e}");
                return None;
            }
        }
        Some(Self {
            stream,
            stream_len,
            next_header: 0,
            current: None,
            read_pos: 0,
            eof: false,
        })
    }

    fn parse_next(&mut self) -> bool {
        match self.scan_from(self.next_header) {
            Ok(Scan::Record(record)) => {
                self.commit(record);
                true
            }
            Ok(Scan::End) => {
                self.eof = true;
                false
            }
            Err(e) => {
                log::warn!("tar: invalid record at offset {}: {e}", self.next_header);
                false
            }
        }
    }

    fn parse_at(&mut self, offset: u64) -> bool {
        match self.scan_from(offset) {
            Ok(Scan::Record(record)) => {
                self.commit(record);
                true
            }
            Ok(Scan::End) => {
                log::warn!("tar: no entry at offset {offset}");
                false
            }
            Err(e) => {
                log::warn!("tar: invalid record at offset {offset}: {e}");
                false
            }
        }
    }

    fn find_by_name(&mut self, name: &[u8]) -> bool {
        let mut pos = 0;
        loop {
            match self.scan_from(pos) {
                Ok(Scan::Record(record)) if record.entry.name_matches(name) => {
                    self.commit(record);
                    return true;
                }
                Ok(Scan::Record(record)) => pos = record.next_header,
                Ok(Scan::End) => return false,
                Err(e) => {
                    log::warn!(
                        "tar: lookup of {:?} stopped at offset {pos}: {e}",
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
        self.current.as_ref().map(|record| &record.entry)
    }

    fn decompress(&mut self, out: &mut [u8]) -> bool {
        match self.read_payload(out) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("tar: payload read failed: {e}");
                false
            }
        }
    }

    fn into_stream(self) -> S {
        self.stream
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn truncated(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg.to_string())
}
