//! Archive format implementations.

pub(crate) mod common;
pub mod detect;
pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod traits;
pub mod zip;

pub use detect::ArchiveType;
pub use rar::RarCodec;
pub use sevenz::SevenZCodec;
pub use tar::TarCodec;
pub use traits::EntryRecord;
pub use traits::FormatCodec;
pub use zip::ZipCodec;

use crate::ArchiveOptions;
use crate::stream::ByteSource;

/// One codec per supported format, selected when a session opens.
#[derive(Debug)]
pub(crate) enum Codec<S> {
    Rar(RarCodec<S>),
    Tar(TarCodec<S>),
    Zip(ZipCodec<S>),
    SevenZ(SevenZCodec<S>),
}

macro_rules! dispatch {
    ($codec:expr, $inner:ident => $body:expr) => {
        match $codec {
            Codec::Rar($inner) => $body,
            Codec::Tar($inner) => $body,
            Codec::Zip($inner) => $body,
            Codec::SevenZ($inner) => $body,
        }
    };
}

impl<S: ByteSource> Codec<S> {
    /// Opens `stream` as `format`; the stream is dropped on failure.
    pub(crate) fn open(format: ArchiveType, stream: S, options: ArchiveOptions) -> Option<Self> {
        match format {
            ArchiveType::Rar => RarCodec::open(stream, options).map(Self::Rar),
            ArchiveType::Tar => TarCodec::open(stream, options).map(Self::Tar),
            ArchiveType::Zip => ZipCodec::open(stream, options).map(Self::Zip),
            ArchiveType::SevenZ => SevenZCodec::open(stream, options).map(Self::SevenZ),
        }
    }

    pub(crate) const fn archive_type(&self) -> ArchiveType {
        match self {
            Self::Rar(_) => RarCodec::<S>::TYPE,
            Self::Tar(_) => TarCodec::<S>::TYPE,
            Self::Zip(_) => ZipCodec::<S>::TYPE,
            Self::SevenZ(_) => SevenZCodec::<S>::TYPE,
        }
    }

    pub(crate) fn parse_next(&mut self) -> bool {
        dispatch!(self, c => c.parse_next())
    }

    pub(crate) fn parse_at(&mut self, offset: u64) -> bool {
        dispatch!(self, c => c.parse_at(offset))
    }

    pub(crate) fn find_by_name(&mut self, name: &[u8]) -> bool {
        dispatch!(self, c => c.find_by_name(name))
    }

    pub(crate) fn at_eof(&self) -> bool {
        dispatch!(self, c => c.at_eof())
    }

    pub(crate) fn entry(&self) -> Option<&EntryRecord> {
        dispatch!(self, c => c.entry())
    }

    pub(crate) fn decompress(&mut self, out: &mut [u8]) -> bool {
        dispatch!(self, c => c.decompress(out))
    }

    pub(crate) fn global_comment(&mut self, buf: Option<&mut [u8]>) -> usize {
        dispatch!(self, c => c.global_comment(buf))
    }

    pub(crate) fn into_stream(self) -> S {
        dispatch!(self, c => c.into_stream())
    }
}
