//! Byte streams backing an archive session.
//!
//! A [`ByteStream`] is either *owned* by the session that consumes it (built
//! from a path or a memory buffer) or *borrowed* from the caller (any
//! [`ByteSource`]). The distinction is fixed by the constructor used:
//!
//! - [`ByteStream::open_file`] and [`ByteStream::from_memory`] build owned
//!   streams. Closing the session releases them.
//! - [`ByteStream::borrowed`] wraps a caller-supplied source. Closing the
//!   session only ends the borrow; the source stays usable by the caller.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use crate::ArchiveError;
use crate::Result;

/// A seekable, readable source of archive bytes.
///
/// Implemented for every `Read + Seek` type, so files, cursors, and custom
/// readers can all be handed to [`ByteStream::borrowed`].
pub trait ByteSource: Read + Seek {
    /// Returns the total length of the source in bytes.
    ///
    /// The current read position is preserved.
    fn length(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        if pos != len {
            self.seek(SeekFrom::Start(pos))?;
        }
        Ok(len)
    }
}

impl<T: Read + Seek + ?Sized> ByteSource for T {}

enum Backend<'a> {
    File(BufReader<File>),
    Memory(Cursor<Cow<'a, [u8]>>),
    Borrowed(&'a mut (dyn ByteSource + 'a)),
}

/// Byte stream consumed by exactly one archive session.
///
/// # Examples
///
/// ```
/// use unarc_core::ByteStream;
/// use std::io::Cursor;
///
/// let owned = ByteStream::from_memory(&b"some bytes"[..])?;
/// assert!(owned.is_owned());
///
/// let mut source = Cursor::new(b"other bytes".to_vec());
/// let borrowed = ByteStream::borrowed(&mut source);
/// assert!(!borrowed.is_owned());
/// # Ok::<(), unarc_core::ArchiveError>(())
/// ```
pub struct ByteStream<'a> {
    backend: Backend<'a>,
}

impl ByteStream<'static> {
    /// Opens a file for reading.
    ///
    /// # Errors
    ///
    /// Returns `StreamOpenFailed` if the path cannot be opened for reading.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ArchiveError::StreamOpenFailed(io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            ))
        })?;
        log::debug!("opened file stream {}", path.display());
        Ok(Self {
            backend: Backend::File(BufReader::new(file)),
        })
    }
}

impl<'a> ByteStream<'a> {
    /// Creates an owned stream over an in-memory buffer.
    ///
    /// The buffer may be borrowed (`&[u8]`) or owned (`Vec<u8>`); either way
    /// the stream handle itself belongs to the session. Several streams may
    /// view the same borrowed buffer independently.
    ///
    /// # Errors
    ///
    /// Returns `StreamOpenFailed` if the buffer is empty, since no archive
    /// header fits in zero bytes.
    pub fn from_memory(data: impl Into<Cow<'a, [u8]>>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(ArchiveError::StreamOpenFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "memory buffer is empty",
            )));
        }
        Ok(Self {
            backend: Backend::Memory(Cursor::new(data)),
        })
    }

    /// Wraps a caller-supplied source without taking ownership of it.
    ///
    /// The caller keeps the source alive for at least as long as the session
    /// and gets it back, unclosed, once the session is closed or dropped.
    pub fn borrowed<S: ByteSource + 'a>(source: &'a mut S) -> Self {
        Self {
            backend: Backend::Borrowed(source),
        }
    }

    /// Returns `true` if releasing this stream also releases its source.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        !matches!(self.backend, Backend::Borrowed(_))
    }

    /// Releases the stream.
    ///
    /// Owned files are closed; borrowed sources are handed back untouched.
    pub fn close(self) {
        log::debug!("closing byte stream (owned: {})", self.is_owned());
    }

    fn source(&mut self) -> &mut dyn ByteSource {
        match &mut self.backend {
            Backend::File(file) => file,
            Backend::Memory(cursor) => cursor,
            Backend::Borrowed(source) => &mut **source,
        }
    }
}

impl Read for ByteStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source().read(buf)
    }
}

impl Seek for ByteStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.source().seek(pos)
    }
}

impl fmt::Debug for ByteStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.backend {
            Backend::File(_) => "file",
            Backend::Memory(_) => "memory",
            Backend::Borrowed(_) => "borrowed",
        };
        f.debug_struct("ByteStream").field("backend", &kind).finish()
    }
}
