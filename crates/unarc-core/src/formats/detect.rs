//! Archive format selector and signature sniffing.

use std::fmt;

/// RAR 1.5 to 4.x marker block.
pub(crate) const RAR4_MAGIC: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

/// RAR 5.0 signature.
pub(crate) const RAR5_MAGIC: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

/// 7z signature: `"7z"` followed by `BC AF 27 1C`.
pub(crate) const SEVENZ_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Local file header signature, `PK\x03\x04`.
const ZIP_LOCAL_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// End of central directory signature, the first record of an empty ZIP.
const ZIP_EOCD_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

/// Offset of the `ustar` magic inside a TAR header block.
const USTAR_MAGIC_OFFSET: usize = 257;

/// Supported archive formats.
///
/// The set is closed: a session is always opened for one explicit format and
/// never guesses on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    /// RAR archive (1.5 to 4.x and 5.0 headers).
    Rar,
    /// Tar archive (uncompressed).
    Tar,
    /// ZIP archive.
    Zip,
    /// 7z archive.
    SevenZ,
}

impl ArchiveType {
    /// All supported formats, in the order [`from_magic`](Self::from_magic)
    /// tries them.
    pub const ALL: [Self; 4] = [Self::Rar, Self::SevenZ, Self::Zip, Self::Tar];

    /// Returns the short display name of the format.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rar => "RAR",
            Self::Tar => "TAR",
            Self::Zip => "ZIP",
            Self::SevenZ => "7z",
        }
    }

    /// Guesses the format from the first bytes of a stream.
    ///
    /// This is a convenience for callers that want a first guess before
    /// calling [`Archive::open`](crate::Archive::open); the guess is not a
    /// guarantee that opening will succeed. TAR is only recognized through
    /// the POSIX `ustar` magic, so pre-POSIX archives are not detected.
    ///
    /// # Examples
    ///
    /// ```
    /// use unarc_core::ArchiveType;
    ///
    /// assert_eq!(ArchiveType::from_magic(b"PK\x03\x04rest"), Some(ArchiveType::Zip));
    /// assert_eq!(ArchiveType::from_magic(b"plain text"), None);
    /// ```
    #[must_use]
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(&RAR4_MAGIC) || header.starts_with(&RAR5_MAGIC) {
            return Some(Self::Rar);
        }
        if header.starts_with(&SEVENZ_MAGIC) {
            return Some(Self::SevenZ);
        }
        if header.starts_with(&ZIP_LOCAL_MAGIC) || header.starts_with(&ZIP_EOCD_MAGIC) {
            return Some(Self::Zip);
        }
        match header.get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5) {
            Some(b"ustar") => Some(Self::Tar),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
