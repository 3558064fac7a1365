//! Error types for archive session operations.

use std::io;

use thiserror::Error;

use crate::formats::ArchiveType;

/// Result type alias using `ArchiveError`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while opening, walking, or reading an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The underlying byte source could not be opened.
    ///
    /// Raised for missing or unreadable files and for empty memory buffers.
    #[error("failed to open byte stream: {0}")]
    StreamOpenFailed(#[source] io::Error),

    /// The stream opened but does not hold an archive of the requested type.
    #[error("not a valid {format} archive")]
    ArchiveOpenFailed {
        /// The format that was requested.
        format: ArchiveType,
    },

    /// An entry record could not be parsed and no end marker was reached.
    #[error("corrupt or truncated {format} entry record")]
    ParseFailed {
        /// Format of the archive being parsed.
        format: ArchiveType,
    },

    /// The payload of the current entry could not be decoded.
    #[error("failed to decompress {format} entry data")]
    DecompressFailed {
        /// Format of the archive being read.
        format: ArchiveType,
    },

    /// The declared entry size exceeds the caller's limit.
    #[error("entry too large: declared size {size} bytes exceeds limit of {limit} bytes")]
    EntryTooLarge {
        /// Declared uncompressed size of the entry.
        size: u64,
        /// Limit supplied by the caller.
        limit: u64,
    },

    /// Allocating the buffer for a bounded read failed.
    #[error("out of memory: could not allocate {size} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        size: u64,
    },
}

impl ArchiveError {
    /// Returns `true` if the caller can reasonably carry on after this error.
    ///
    /// An `ArchiveOpenFailed` may be retried with a different format guess,
    /// and an `EntryTooLarge` only concerns a single entry: the session is
    /// still positioned and the caller may move on to the next one.
    ///
    /// # Examples
    ///
    /// ```
    /// use unarc_core::ArchiveError;
    /// use unarc_core::ArchiveType;
    ///
    /// let err = ArchiveError::ArchiveOpenFailed { format: ArchiveType::Zip };
    /// assert!(err.is_recoverable());
    ///
    /// let err = ArchiveError::ParseFailed { format: ArchiveType::Tar };
    /// assert!(!err.is_recoverable());
    /// ```
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ArchiveOpenFailed { .. } | Self::EntryTooLarge { .. }
        )
    }

    /// Returns the archive format involved in this error, if any.
    #[must_use]
    pub const fn format(&self) -> Option<ArchiveType> {
        match self {
            Self::ArchiveOpenFailed { format }
            | Self::ParseFailed { format }
            | Self::DecompressFailed { format } => Some(*format),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArchiveError::ArchiveOpenFailed {
            format: ArchiveType::Rar,
        };
        assert_eq!(err.to_string(), "not a valid RAR archive");

        let err = ArchiveError::EntryTooLarge { size: 10, limit: 9 };
        let display = err.to_string();
        assert!(display.contains("10"));
        assert!(display.contains("9"));
    }

    #[test]
    fn test_stream_open_failed_source_chain() {
        use std::error::Error;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing.zip");
        let err = ArchiveError::StreamOpenFailed(io_err);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("missing.zip"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(ArchiveError::EntryTooLarge { size: 2, limit: 1 }.is_recoverable());
        assert!(
            ArchiveError::ArchiveOpenFailed {
                format: ArchiveType::SevenZ
            }
            .is_recoverable()
        );

        assert!(
            !ArchiveError::DecompressFailed {
                format: ArchiveType::Zip
            }
            .is_recoverable()
        );
        assert!(!ArchiveError::OutOfMemory { size: 1 }.is_recoverable());
    }

    #[test]
    fn test_format_accessor() {
        let err = ArchiveError::ParseFailed {
            format: ArchiveType::Tar,
        };
        assert_eq!(err.format(), Some(ArchiveType::Tar));

        let err = ArchiveError::OutOfMemory { size: 1 };
        assert_eq!(err.format(), None);
    }
}
