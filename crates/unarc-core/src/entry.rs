//! Entry view and bounded payload reader.

use std::io;
use std::time::SystemTime;

use crate::ArchiveError;
use crate::Result;
use crate::archive::Archive;
use crate::formats::ArchiveType;
use crate::formats::EntryRecord;
use crate::formats::common;

/// View of the entry a session is positioned on.
///
/// An `Entry` mutably borrows its [`Archive`], so it cannot be held across a
/// call that moves the cursor:
///
/// ```compile_fail
/// use unarc_core::Archive;
/// use unarc_core::ArchiveOptions;
/// use unarc_core::ArchiveType;
///
/// let mut archive = Archive::from_memory(ArchiveType::Zip, &b"PK\x05\x06"[..], ArchiveOptions::default()).unwrap();
/// let first = archive.next().unwrap().unwrap();
/// let second = archive.next().unwrap();
/// println!("{:?}", first.name());
/// ```
///
/// Payload bytes are read sequentially. `Entry` also implements
/// [`std::io::Read`], so it can be drained with [`std::io::copy`].
#[derive(Debug)]
pub struct Entry<'a, 's> {
    archive: &'a mut Archive<'s>,
}

impl<'a, 's> Entry<'a, 's> {
    pub(crate) fn new(archive: &'a mut Archive<'s>) -> Self {
        Self { archive }
    }

    fn record(&self) -> Option<&EntryRecord> {
        self.archive.codec().entry()
    }

    /// Returns the entry name, if it could be decoded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.record().and_then(|r| r.name.as_deref())
    }

    /// Returns the name bytes as stored in the archive.
    ///
    /// `None` for 7z, whose header only stores decoded names.
    #[must_use]
    pub fn raw_name(&self) -> Option<&[u8]> {
        self.record().and_then(|r| r.raw_name.as_deref())
    }

    /// Returns the position of the entry record, for use with
    /// [`Archive::seek_to_offset`].
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.record().map_or(0, |r| r.offset)
    }

    /// Returns the declared uncompressed size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.record().map_or(0, |r| r.size)
    }

    /// Returns the modification time as Windows FILETIME ticks (100 ns
    /// intervals since 1601-01-01 UTC), 0 if the archive does not record one.
    #[must_use]
    pub fn filetime(&self) -> u64 {
        self.record().map_or(0, |r| r.filetime)
    }

    /// Returns the modification time, if recorded and representable.
    #[must_use]
    pub fn modified(&self) -> Option<SystemTime> {
        common::system_time_from_filetime(self.filetime())
    }

    /// Returns the number of payload bytes not read yet.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.archive.read_pos())
    }

    /// Returns the format of the archive the entry belongs to.
    #[must_use]
    pub fn format(&self) -> ArchiveType {
        self.archive.format()
    }

    /// Reads exactly `buf.len()` payload bytes, continuing where the last
    /// read stopped.
    ///
    /// An empty buffer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DecompressFailed` if the payload cannot be decoded, the
    /// stored checksum does not match, or fewer than `buf.len()` bytes are
    /// left in the entry.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if !self.archive.codec_mut().decompress(buf) {
            return Err(ArchiveError::DecompressFailed {
                format: self.format(),
            });
        }
        self.archive.advance_read_pos(buf.len() as u64);
        Ok(())
    }

    /// Reads the rest of the payload into a new buffer, refusing entries
    /// whose declared size exceeds `limit`.
    ///
    /// The size check happens before any allocation, so a hostile header
    /// cannot make this call reserve more than `limit` bytes.
    ///
    /// # Errors
    ///
    /// - `EntryTooLarge` if the declared size exceeds `limit`
    /// - `OutOfMemory` if the buffer cannot be allocated
    /// - `DecompressFailed` if the payload cannot be decoded
    ///
    /// # Examples
    ///
    /// ```
    /// use unarc_core::Archive;
    /// use unarc_core::ArchiveError;
    /// use unarc_core::ArchiveOptions;
    /// use unarc_core::ArchiveType;
    /// use unarc_core::test_utils::create_test_zip;
    ///
    /// let data = create_test_zip(&[("hello.txt", b"hello")]);
    /// let mut archive = Archive::from_memory(ArchiveType::Zip, data, ArchiveOptions::default())?;
    /// let mut entry = archive.next()?.expect("one entry");
    ///
    /// assert!(matches!(entry.read_to_bound(4), Err(ArchiveError::EntryTooLarge { .. })));
    /// assert_eq!(entry.read_to_bound(5)?, b"hello");
    /// # Ok::<(), ArchiveError>(())
    /// ```
    pub fn read_to_bound(&mut self, limit: u64) -> Result<Vec<u8>> {
        let size = self.size();
        if size > limit {
            return Err(ArchiveError::EntryTooLarge { size, limit });
        }

        let remaining = self.remaining();
        let len = usize::try_from(remaining).map_err(|_| ArchiveError::OutOfMemory { size: remaining })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| ArchiveError::OutOfMemory { size: remaining })?;
        buf.resize(len, 0);

        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl io::Read for Entry<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = usize::try_from(self.remaining()).map_or(buf.len(), |left| left.min(buf.len()));
        if n == 0 {
            return Ok(0);
        }
        Entry::read_exact(self, &mut buf[..n]).map_err(io::Error::other)?;
        Ok(n)
    }
}
