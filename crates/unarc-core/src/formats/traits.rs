//! Capability interface every format codec implements.

use crate::ArchiveOptions;
use crate::stream::ByteSource;

use super::ArchiveType;

/// Metadata of the entry a codec is currently positioned on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Decoded entry name, if the name could be decoded.
    pub name: Option<String>,
    /// Name bytes exactly as stored in the archive.
    pub raw_name: Option<Vec<u8>>,
    /// Opaque position of the entry record, accepted by `parse_at`.
    pub offset: u64,
    /// Declared uncompressed size.
    pub size: u64,
    /// Modification time as Windows FILETIME ticks, 0 if not recorded.
    pub filetime: u64,
}

impl EntryRecord {
    /// Builds a record whose name is the UTF-8 reading of `raw_name`.
    pub(crate) fn from_raw_name(raw_name: Vec<u8>, offset: u64, size: u64, filetime: u64) -> Self {
        let name = std::str::from_utf8(&raw_name).ok().map(str::to_owned);
        Self {
            name,
            raw_name: Some(raw_name),
            offset,
            size,
            filetime,
        }
    }

    /// Compares `name` byte for byte against the stored name, then against
    /// the decoded name.
    pub(crate) fn name_matches(&self, name: &[u8]) -> bool {
        self.raw_name.as_deref() == Some(name)
            || self.name.as_ref().map(String::as_bytes) == Some(name)
    }
}

/// Header parsing and payload decoding for one container format.
///
/// Failures are reported as `false` (or `None` from [`open`](Self::open)),
/// with details going to the log. A `false` from
/// [`parse_next`](Self::parse_next) is ambiguous on purpose: callers tell a
/// clean end of archive from a corrupt record by asking
/// [`at_eof`](Self::at_eof).
///
/// Implementations only move their cursor on success. Every payload read
/// seeks the stream explicitly, so lookups that scan the stream never
/// disturb a partially read entry.
pub trait FormatCodec<S: ByteSource>: Sized {
    /// Format implemented by this codec.
    const TYPE: ArchiveType;

    /// Binds the codec to `stream`, checking the format signature.
    ///
    /// Returns `None` if the stream does not hold this format; the stream is
    /// dropped, and so released, in that case.
    fn open(stream: S, options: ArchiveOptions) -> Option<Self>;

    /// Advances to the next entry in stream order.
    fn parse_next(&mut self) -> bool;

    /// Re-parses the entry whose record starts at `offset`.
    fn parse_at(&mut self, offset: u64) -> bool;

    /// Positions the cursor on the first entry named exactly `name`.
    fn find_by_name(&mut self, name: &[u8]) -> bool;

    /// Returns `true` once `parse_next` has run into the end of the archive.
    fn at_eof(&self) -> bool;

    /// Returns the entry the cursor is positioned on.
    fn entry(&self) -> Option<&EntryRecord>;

    /// Decodes the next `out.len()` payload bytes of the current entry.
    fn decompress(&mut self, out: &mut [u8]) -> bool;

    /// Copies the archive comment into `buf`, or returns its length when
    /// `buf` is `None`.
    fn global_comment(&mut self, buf: Option<&mut [u8]>) -> usize {
        let _ = buf;
        0
    }

    /// Releases the codec and hands back its stream.
    fn into_stream(self) -> S;
}
