//! Archive session: one codec bound to one stream, with a single cursor.

use std::borrow::Cow;
use std::path::Path;

use crate::ArchiveError;
use crate::ArchiveOptions;
use crate::Result;
use crate::entry::Entry;
use crate::formats::ArchiveType;
use crate::formats::Codec;
use crate::stream::ByteStream;

/// Where the session cursor currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No entry has been visited yet.
    Unset,
    /// Positioned on an entry.
    Entry,
    /// Iteration ran past the last entry.
    Eof,
}

/// An open archive.
///
/// The session owns its codec and consumes its [`ByteStream`]. Whether
/// closing the session also releases the underlying source depends on how
/// the stream was built (see [`ByteStream`]).
///
/// Cursor-moving calls take `&mut self` and hand out an [`Entry`] that
/// borrows the session, so an entry view can never outlive the position it
/// describes.
///
/// # Examples
///
/// ```no_run
/// use unarc_core::Archive;
/// use unarc_core::ArchiveOptions;
/// use unarc_core::ArchiveType;
///
/// let mut archive = Archive::open_file(ArchiveType::Zip, "bundle.zip", ArchiveOptions::default())?;
/// while let Some(mut entry) = archive.next()? {
///     let data = entry.read_to_bound(16 * 1024 * 1024)?;
///     println!("{}: {} bytes", entry.name().unwrap_or("?"), data.len());
/// }
/// archive.close();
/// # Ok::<(), unarc_core::ArchiveError>(())
/// ```
#[derive(Debug)]
pub struct Archive<'s> {
    codec: Codec<ByteStream<'s>>,
    state: CursorState,
    read_pos: u64,
    owns_stream: bool,
}

impl<'s> Archive<'s> {
    /// Opens `stream` as an archive of type `format`.
    ///
    /// The format is never guessed; see [`ArchiveType::from_magic`] for a
    /// helper that does.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveOpenFailed` if the stream does not hold a readable
    /// archive of that type. The stream is released in that case.
    pub fn open(format: ArchiveType, stream: ByteStream<'s>, options: ArchiveOptions) -> Result<Self> {
        let owns_stream = stream.is_owned();
        let codec = Codec::open(format, stream, options)
            .ok_or(ArchiveError::ArchiveOpenFailed { format })?;
        log::debug!("opened {format} archive (owned stream: {owns_stream})");
        Ok(Self {
            codec,
            state: CursorState::Unset,
            read_pos: 0,
            owns_stream,
        })
    }

    /// Opens an archive held in memory.
    ///
    /// # Errors
    ///
    /// Returns `StreamOpenFailed` for an empty buffer and
    /// `ArchiveOpenFailed` if the buffer is not a `format` archive.
    pub fn from_memory(
        format: ArchiveType,
        data: impl Into<Cow<'s, [u8]>>,
        options: ArchiveOptions,
    ) -> Result<Self> {
        Self::open(format, ByteStream::from_memory(data)?, options)
    }

    /// Returns the archive format.
    #[must_use]
    pub const fn format(&self) -> ArchiveType {
        self.codec.archive_type()
    }

    /// Returns the cursor state.
    #[must_use]
    pub const fn state(&self) -> CursorState {
        self.state
    }

    /// Returns `true` if closing the session also releases the stream.
    #[must_use]
    pub const fn owns_stream(&self) -> bool {
        self.owns_stream
    }

    /// Returns `true` once [`next`](Self::next) has run past the last entry.
    ///
    /// Repositioning with [`seek_to_offset`](Self::seek_to_offset) or
    /// [`find_by_name`](Self::find_by_name) clears the flag.
    #[must_use]
    pub fn at_eof(&self) -> bool {
        self.state == CursorState::Eof
    }

    /// Advances to the next entry.
    ///
    /// Returns `Ok(None)` at the end of the archive, and keeps doing so on
    /// every further call.
    ///
    /// # Errors
    ///
    /// Returns `ParseFailed` if the next entry record is corrupt or
    /// truncated. The cursor stays where it was.
    pub fn next(&mut self) -> Result<Option<Entry<'_, 's>>> {
        if self.state == CursorState::Eof {
            return Ok(None);
        }
        if self.codec.parse_next() {
            self.enter();
            return Ok(Some(Entry::new(self)));
        }
        if self.codec.at_eof() {
            log::debug!("reached end of {} archive", self.format());
            self.state = CursorState::Eof;
            return Ok(None);
        }
        Err(ArchiveError::ParseFailed {
            format: self.format(),
        })
    }

    /// Repositions the cursor on the entry whose record starts at `offset`.
    ///
    /// `offset` must come from [`Entry::offset`] of this same session.
    /// Seeking to the same offset twice yields the same entry, and its
    /// payload can be read again from the start.
    ///
    /// # Errors
    ///
    /// Returns `ParseFailed` if no entry starts at `offset`. The cursor stays
    /// where it was.
    pub fn seek_to_offset(&mut self, offset: u64) -> Result<Entry<'_, 's>> {
        if !self.codec.parse_at(offset) {
            return Err(ArchiveError::ParseFailed {
                format: self.format(),
            });
        }
        log::debug!("repositioned {} archive at offset {offset}", self.format());
        self.enter();
        Ok(Entry::new(self))
    }

    /// Positions the cursor on the first entry named exactly `name`.
    ///
    /// Names are compared byte for byte, against the bytes stored in the
    /// archive as well as the decoded name, so entries whose names are not
    /// valid UTF-8 can still be found. On a miss the cursor, including an
    /// end-of-archive state, is left untouched.
    pub fn find_by_name(&mut self, name: impl AsRef<[u8]>) -> bool {
        let name = name.as_ref();
        if self.codec.find_by_name(name) {
            self.enter();
            true
        } else {
            log::debug!(
                "no entry named {:?} in {} archive",
                String::from_utf8_lossy(name),
                self.format()
            );
            false
        }
    }

    /// Returns a view of the entry the cursor is positioned on.
    pub fn current(&mut self) -> Option<Entry<'_, 's>> {
        if self.state == CursorState::Entry {
            Some(Entry::new(self))
        } else {
            None
        }
    }

    /// Returns the length of the archive comment in bytes, 0 if there is
    /// none.
    pub fn global_comment_size(&mut self) -> usize {
        self.codec.global_comment(None)
    }

    /// Copies the archive comment into `buf`, truncating it if `buf` is
    /// shorter, and returns the number of bytes copied.
    pub fn read_global_comment(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        self.codec.global_comment(Some(buf))
    }

    /// Closes the session.
    ///
    /// Owned streams are released with it; a borrowed source is handed back
    /// to its owner and may be rewound and reused.
    pub fn close(self) {
        log::debug!("closing {} archive", self.format());
        self.codec.into_stream().close();
    }

    fn enter(&mut self) {
        self.state = CursorState::Entry;
        self.read_pos = 0;
    }

    pub(crate) fn codec(&self) -> &Codec<ByteStream<'s>> {
        &self.codec
    }

    pub(crate) fn codec_mut(&mut self) -> &mut Codec<ByteStream<'s>> {
        &mut self.codec
    }

    pub(crate) const fn read_pos(&self) -> u64 {
        self.read_pos
    }

    pub(crate) fn advance_read_pos(&mut self, n: u64) {
        self.read_pos += n;
    }
}

impl Archive<'static> {
    /// Opens an archive file.
    ///
    /// # Errors
    ///
    /// Returns `StreamOpenFailed` if the file cannot be opened and
    /// `ArchiveOpenFailed` if it is not a `format` archive.
    pub fn open_file<P: AsRef<Path>>(format: ArchiveType, path: P, options: ArchiveOptions) -> Result<Self> {
        Self::open(format, ByteStream::open_file(path)?, options)
    }
}
