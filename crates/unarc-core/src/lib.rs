//! Uniform read access to RAR, TAR, ZIP, and 7z archives.
//!
//! `unarc-core` opens an archive from a file, a memory buffer, or any
//! `Read + Seek` source, walks its entries with a single cursor, and reads
//! entry payloads through one API whatever the container format.
//!
//! - [`ByteStream`]: the bytes a session reads, owned or borrowed
//! - [`Archive`]: the session, with forward iteration, repositioning by
//!   offset, and lookup by name
//! - [`Entry`]: view of the current entry, with a bounded reader that checks
//!   the declared size before allocating
//!
//! # Limitations
//!
//! RAR entries are only readable when stored without compression. Entries
//! packed with any RAR compression method are still listed, found by name,
//! and reported with their metadata, but reading their payload fails with
//! [`ArchiveError::DecompressFailed`]. RAR archives with encrypted headers
//! fail to open.
//!
//! A record that runs past the end of the stream, or a stream that stops
//! before the format's end-of-archive marker, is reported as
//! [`ArchiveError::ParseFailed`] rather than as the end of the archive.
//!
//! # Examples
//!
//! ```
//! use unarc_core::Archive;
//! use unarc_core::ArchiveOptions;
//! use unarc_core::ArchiveType;
//! use unarc_core::ByteStream;
//! use unarc_core::test_utils::create_test_tar;
//!
//! let data = create_test_tar(&[("a.txt", b"A"), ("b.txt", b"BBBB")]);
//! let stream = ByteStream::from_memory(data)?;
//! let mut archive = Archive::open(ArchiveType::Tar, stream, ArchiveOptions::default())?;
//!
//! assert!(archive.find_by_name("b.txt"));
//! let mut entry = archive.current().expect("positioned");
//! assert_eq!(entry.read_to_bound(1024)?, b"BBBB");
//!
//! archive.close();
//! # Ok::<(), unarc_core::ArchiveError>(())
//! ```
//!
//! Nothing is logged unless the application installs a [`log`] backend.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod config;
pub mod entry;
pub mod error;
pub mod formats;
pub mod stream;
pub mod version;

#[doc(hidden)]
pub mod test_utils;

// Re-export main API types
pub use archive::Archive;
pub use archive::CursorState;
pub use config::ArchiveOptions;
pub use entry::Entry;
pub use error::ArchiveError;
pub use error::Result;
pub use formats::ArchiveType;
pub use stream::ByteSource;
pub use stream::ByteStream;
pub use version::Version;
pub use version::runtime_version;
