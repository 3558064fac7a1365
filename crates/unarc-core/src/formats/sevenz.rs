//! 7z archive codec.
//!
//! The archive header (the file table) is read once at open. An entry's
//! offset is its index into that table.
//!
//! Payloads are decoded through `sevenz_rust2`'s block decoder, which only
//! hands out a reader for the duration of a callback and can only decode a
//! block front to back. Decoded bytes are therefore kept in a window: a read
//! inside the window is a copy, and a read past it decodes the entry's block
//! once more and keeps the next stretch. Windows double in length, up to a
//! cap, so a sequential read of an entry decodes its block a logarithmic
//! number of times.

use std::io;
use std::io::Read;
use std::io::SeekFrom;

use sevenz_rust2::Archive;
use sevenz_rust2::BlockDecoder;
use sevenz_rust2::Password;

use crate::ArchiveOptions;
use crate::stream::ByteSource;

use super::ArchiveType;
use super::traits::EntryRecord;
use super::traits::FormatCodec;

/// Length of the first window decoded for an entry.
const FIRST_WINDOW: usize = 256 * 1024;

/// Upper bound on the window length.
const MAX_WINDOW: usize = 64 * 1024 * 1024;

/// Entry metadata cached from the archive header.
#[derive(Debug, Clone)]
struct TableEntry {
    record: EntryRecord,
    is_directory: bool,
    /// Block holding the entry's data, `None` for entries without data.
    block: Option<usize>,
}

/// Decoded payload bytes `[start, start + data.len())` of the current entry.
#[derive(Debug)]
struct Window {
    start: u64,
    data: Vec<u8>,
    next_len: usize,
}

impl Window {
    const fn new() -> Self {
        Self {
            start: 0,
            data: Vec::new(),
            next_len: FIRST_WINDOW,
        }
    }

    /// Copies bytes starting at payload position `pos`, returning how many.
    fn copy_out(&self, pos: u64, out: &mut [u8]) -> usize {
        let Some(offset) = pos
            .checked_sub(self.start)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|offset| *offset < self.data.len())
        else {
            return 0;
        };
        let n = out.len().min(self.data.len() - offset);
        out[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

/// 7z codec over a seekable stream.
#[derive(Debug)]
pub struct SevenZCodec<S> {
    stream: S,
    archive: Archive,
    table: Vec<TableEntry>,
    next_index: usize,
    current: Option<usize>,
    read_pos: u64,
    window: Window,
    eof: bool,
}

impl<S: ByteSource> SevenZCodec<S> {
    fn build_table(archive: &Archive) -> Vec<TableEntry> {
        archive
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let filetime = if file.has_last_modified_date {
                    u64::from(file.last_modified_date)
                } else {
                    0
                };
                TableEntry {
                    record: EntryRecord {
                        name: Some(file.name.clone()),
                        raw_name: None,
                        offset: index as u64,
                        size: file.size,
                        filetime,
                    },
                    is_directory: file.is_directory(),
                    block: archive
                        .stream_map
                        .file_block_index
                        .get(index)
                        .copied()
                        .flatten(),
                }
            })
            .collect()
    }

    /// Index of the first non-directory entry at or after `index`.
    fn file_at_or_after(&self, index: usize) -> Option<usize> {
        self.table
            .iter()
            .enumerate()
            .skip(index)
            .find(|(_, e)| !e.is_directory)
            .map(|(i, _)| i)
    }

    fn commit(&mut self, index: usize) {
        self.current = Some(index);
        self.next_index = index + 1;
        self.read_pos = 0;
        self.window = Window::new();
        self.eof = false;
    }

    fn read_payload(&mut self, out: &mut [u8]) -> Result<(), sevenz_rust2::Error> {
        let index = self.current.ok_or_else(|| other("no current entry"))?;
        let size = self.table[index].record.size;
        let end = self
            .read_pos
            .checked_add(out.len() as u64)
            .filter(|end| *end <= size)
            .ok_or_else(|| other("read past end of entry"))?;

        let mut filled = 0;
        while filled < out.len() {
            let pos = self.read_pos + filled as u64;
            let copied = self.window.copy_out(pos, &mut out[filled..]);
            if copied > 0 {
                filled += copied;
                continue;
            }
            let wanted = (out.len() - filled).max(self.window.next_len);
            self.refill(index, pos, wanted)?;
            self.window.next_len = self.window.next_len.saturating_mul(2).min(MAX_WINDOW);
        }
        self.read_pos = end;
        Ok(())
    }

    /// Decodes the entry's block again and keeps up to `wanted` payload bytes
    /// from position `pos` on.
    fn refill(&mut self, index: usize, pos: u64, wanted: usize) -> Result<(), sevenz_rust2::Error> {
        let block = self.table[index]
            .block
            .ok_or_else(|| other("entry has no data stream"))?;
        let remaining = self.table[index].record.size - pos;
        let wanted = wanted.min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut data = std::mem::take(&mut self.window.data);
        data.clear();
        data.try_reserve_exact(wanted)
            .map_err(|_| other("cannot allocate decode window"))?;

        let password = Password::empty();
        let target = &self.archive.files[index];
        let mut reached = false;
        let decoder = BlockDecoder::new(1, block, &self.archive, &password, &mut self.stream);
        decoder.for_each_entries(&mut |entry, reader| {
            if !std::ptr::eq(entry, target) {
                io::copy(reader, &mut io::sink())?;
                return Ok(true);
            }
            io::copy(&mut (&mut *reader).take(pos), &mut io::sink())?;
            (&mut *reader).take(wanted as u64).read_to_end(&mut data)?;
            reached = true;
            Ok(false)
        })?;

        if !reached {
            return Err(other("entry not reached while decoding"));
        }
        if data.len() < wanted {
            return Err(other("entry data ends early"));
        }
        self.window.start = pos;
        self.window.data = data;
        Ok(())
    }
}

impl<S: ByteSource> FormatCodec<S> for SevenZCodec<S> {
    const TYPE: ArchiveType = ArchiveType::SevenZ;

    fn open(mut stream: S, _options: ArchiveOptions) -> Option<Self> {
        let archive = match stream
            .seek(SeekFrom::Start(0))
            .map_err(sevenz_rust2::Error::from)
            .and_then(|_| Archive::read(&mut stream, &Password::empty()))
        {
            Ok(archive) => archive,
            Err(e) => {
                log::debug!("7z: cannot read archive header: {e}");
                return None;
            }
        };
        let table = Self::build_table(&archive);
        log::debug!("7z: opened archive with {} entries", table.len());
        Some(Self {
            stream,
            archive,
            table,
            next_index: 0,
            current: None,
            read_pos: 0,
            window: Window::new(),
            eof: false,
        })
    }

    fn parse_next(&mut self) -> bool {
        match self.file_at_or_after(self.next_index) {
            Some(index) => {
                self.commit(index);
                true
            }
            None => {
                self.eof = true;
                false
            }
        }
    }

    fn parse_at(&mut self, offset: u64) -> bool {
        let entry = usize::try_from(offset)
            .ok()
            .filter(|index| self.table.get(*index).is_some_and(|e| !e.is_directory));
        match entry {
            Some(index) => {
                self.commit(index);
                true
            }
            None => {
                log::warn!("7z: no file entry at index {offset}");
                false
            }
        }
    }

    fn find_by_name(&mut self, name: &[u8]) -> bool {
        let found = self
            .table
            .iter()
            .position(|e| !e.is_directory && e.record.name_matches(name));
        match found {
            Some(index) => {
                self.commit(index);
                true
            }
            None => false,
        }
    }

    fn at_eof(&self) -> bool {
        self.eof
    }

    fn entry(&self) -> Option<&EntryRecord> {
        self.current
            .and_then(|index| self.table.get(index))
            .map(|e| &e.record)
    }

    fn decompress(&mut self, out: &mut [u8]) -> bool {
        match self.read_payload(out) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("7z: cannot decode payload: {e}");
                false
            }
        }
    }

    fn into_stream(self) -> S {
        self.stream
    }
}

fn other(msg: &'static str) -> sevenz_rust2::Error {
    sevenz_rust2::Error::Other(msg.into())
}
