//! ZIP archive codec.
//!
//! The central directory is read with the `zip` crate when the codec opens;
//! its records double as the lookup table for `find_by_name`. Once the
//! directory is in memory the `zip` archive is dissolved back into the bare
//! stream, and payloads are decoded here, incrementally, so an entry can be
//! read in several calls without holding a borrow on a `zip` reader:
//!
//! - store: copied straight from the stream
//! - deflate: `flate2` raw inflater
//! - bzip2: `bzip2` decompressor (refused when `zip_deflated_only` is set)
//!
//! Other methods, and encrypted entries, fail at read time.

use std::fmt;
use std::io;
use std::io::Read;
use std::io::SeekFrom;

use crate::ArchiveOptions;
use crate::stream::ByteSource;

use super::ArchiveType;
use super::common;
use super::common::PayloadCrc;
use super::traits::EntryRecord;
use super::traits::FormatCodec;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_LEN: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const METHOD_BZIP2: u16 = 12;

const FLAG_ENCRYPTED: u16 = 0x0001;

/// Compressed bytes pulled from the stream per refill.
const INPUT_CHUNK: u64 = 32 * 1024;

/// Central directory record of a non-directory entry.
#[derive(Debug, Clone)]
struct ZipRecord {
    name: String,
    raw_name: Vec<u8>,
    header_start: u64,
    compressed_size: u64,
    size: u64,
    crc32: u32,
}

/// Incremental decoder for one compression method.
enum Decoder {
    Stored,
    Deflated(Box<flate2::Decompress>),
    Bzip2(Box<bzip2::Decompress>),
}

struct Step {
    consumed: usize,
    produced: usize,
    finished: bool,
}

impl Decoder {
    fn for_method(method: u16, options: ArchiveOptions) -> Option<Self> {
        match method {
            METHOD_STORED => Some(Self::Stored),
            METHOD_DEFLATED => Some(Self::Deflated(Box::new(flate2::Decompress::new(false)))),
            METHOD_BZIP2 if !options.zip_deflated_only => {
                Some(Self::Bzip2(Box::new(bzip2::Decompress::new(false))))
            }
            _ => None,
        }
    }

    fn step(&mut self, input: &[u8], output: &mut [u8]) -> io::Result<Step> {
        match self {
            Self::Stored => Err(invalid("stored data has no decoder state")),
            Self::Deflated(inflater) => {
                let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
                let status = inflater
                    .decompress(input, output, flate2::FlushDecompress::None)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Step {
                    consumed: progress(in_before, inflater.total_in()),
                    produced: progress(out_before, inflater.total_out()),
                    finished: status == flate2::Status::StreamEnd,
                })
            }
            Self::Bzip2(decompressor) => {
                let (in_before, out_before) =
                    (decompressor.total_in(), decompressor.total_out());
                let status = decompressor
                    .decompress(input, output)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Step {
                    consumed: progress(in_before, decompressor.total_in()),
                    produced: progress(out_before, decompressor.total_out()),
                    finished: status == bzip2::Status::StreamEnd,
                })
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn progress(before: u64, after: u64) -> usize {
    (after - before) as usize
}

/// Read state of the current entry.
struct Payload {
    data_start: u64,
    decoder: Option<Decoder>,
    compressed_read: u64,
    produced: u64,
    input: Vec<u8>,
    input_pos: usize,
    crc: PayloadCrc,
}

/// ZIP codec over a seekable stream.
pub struct ZipCodec<S> {
    stream: S,
    options: ArchiveOptions,
    records: Vec<ZipRecord>,
    comment: Vec<u8>,
    next_index: usize,
    current: Option<(usize, EntryRecord)>,
    payload: Option<Payload>,
    eof: bool,
}

impl<S> fmt::Debug for ZipCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipCodec")
            .field("records", &self.records.len())
            .field("next_index", &self.next_index)
            .field("current", &self.current)
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl<S: ByteSource> ZipCodec<S> {
    /// Reads the local header of record `index` and builds its read state.
    fn load(&mut self, index: usize) -> io::Result<(EntryRecord, Payload)> {
        let record = self
            .records
            .get(index)
            .ok_or_else(|| invalid("entry index out of range"))?;

        let mut header = [0u8; LOCAL_HEADER_LEN];
        self.stream.seek(SeekFrom::Start(record.header_start))?;
        self.stream.read_exact(&mut header)?;
        if le_u32(&header, 0) != LOCAL_HEADER_SIGNATURE {
            return Err(invalid("bad local header signature"));
        }

        let flags = le_u16(&header, 6);
        let method = le_u16(&header, 8);
        let filetime = common::filetime_from_dos(le_u16(&header, 12), le_u16(&header, 10));
        let name_len = le_u16(&header, 26);
        let extra_len = le_u16(&header, 28);

        let mut local_name = vec![0u8; usize::from(name_len)];
        self.stream.read_exact(&mut local_name)?;
        if local_name != record.raw_name {
            return Err(invalid("local header name disagrees with the central directory"));
        }
        let data_start = record.header_start
            + LOCAL_HEADER_LEN as u64
            + u64::from(name_len)
            + u64::from(extra_len);

        let decoder = if flags & FLAG_ENCRYPTED == 0 {
            Decoder::for_method(method, self.options)
        } else {
            None
        };
        if decoder.is_none() {
            log::debug!(
                "zip: {:?} uses method {method} (flags {flags:#06x}), payload not readable",
                record.name
            );
        }

        let entry = EntryRecord {
            name: Some(record.name.clone()),
            raw_name: Some(record.raw_name.clone()),
            offset: record.header_start,
            size: record.size,
            filetime,
        };
        let payload = Payload {
            data_start,
            decoder,
            compressed_read: 0,
            produced: 0,
            input: Vec::new(),
            input_pos: 0,
            crc: PayloadCrc::new(),
        };
        Ok((entry, payload))
    }

    fn position(&mut self, index: usize) -> bool {
        match self.load(index) {
            Ok((entry, payload)) => {
                self.current = Some((index, entry));
                self.payload = Some(payload);
                self.next_index = index + 1;
                self.eof = false;
                true
            }
            Err(e) => {
                log::warn!("zip: cannot read local header of entry {index}: {e}");
                false
            }
        }
    }

    fn read_payload(&mut self, out: &mut [u8]) -> io::Result<()> {
        let record = match &self.current {
            Some((index, _)) => &self.records[*index],
            None => return Err(invalid("no current entry")),
        };
        let payload = self
            .payload
            .as_mut()
            .ok_or_else(|| invalid("no current entry"))?;
        let end = payload
            .produced
            .checked_add(out.len() as u64)
            .filter(|end| *end <= record.size)
            .ok_or_else(|| invalid("read past end of entry"))?;

        match payload.decoder.as_mut() {
            None => return Err(io::Error::other("payload is not decodable")),
            Some(Decoder::Stored) => {
                if record.compressed_size != record.size {
                    return Err(invalid("stored entry sizes disagree"));
                }
                self.stream
                    .seek(SeekFrom::Start(payload.data_start + payload.produced))?;
                self.stream.read_exact(out)?;
            }
            Some(decoder) => {
                let inflated = inflate(
                    &mut self.stream,
                    decoder,
                    &mut payload.input,
                    &mut payload.input_pos,
                    &mut payload.compressed_read,
                    payload.data_start,
                    record.compressed_size,
                    out,
                );
                if let Err(e) = inflated {
                    // decoder state no longer lines up with `produced`
                    payload.decoder = None;
                    return Err(e);
                }
            }
        }

        payload.produced = end;
        payload.crc.update(out);
        if end == record.size
            && self.options.verify_checksums
            && !payload.crc.matches(record.crc32)
        {
            return Err(invalid("CRC-32 mismatch"));
        }
        Ok(())
    }
}

/// Fills `out` from a compressed stream, refilling `input` as needed.
#[allow(clippy::too_many_arguments)]
fn inflate<S: ByteSource>(
    stream: &mut S,
    decoder: &mut Decoder,
    input: &mut Vec<u8>,
    input_pos: &mut usize,
    compressed_read: &mut u64,
    data_start: u64,
    compressed_size: u64,
    out: &mut [u8],
) -> io::Result<()> {
    let mut filled = 0;
    while filled < out.len() {
        let remaining = compressed_size - *compressed_read;
        if *input_pos == input.len() && remaining > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let chunk = remaining.min(INPUT_CHUNK) as usize;
            input.resize(chunk, 0);
            stream.seek(SeekFrom::Start(data_start + *compressed_read))?;
            stream.read_exact(input)?;
            *input_pos = 0;
            *compressed_read += chunk as u64;
        }

        let step = decoder.step(&input[*input_pos..], &mut out[filled..])?;
        *input_pos += step.consumed;
        filled += step.produced;

        if step.finished && filled < out.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "compressed stream ended early",
            ));
        }
        if step.consumed == 0 && step.produced == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "compressed stream is truncated",
            ));
        }
    }
    Ok(())
}

impl<S: ByteSource> FormatCodec<S> for ZipCodec<S> {
    const TYPE: ArchiveType = ArchiveType::Zip;

    fn open(stream: S, options: ArchiveOptions) -> Option<Self> {
        let mut archive = match zip::ZipArchive::new(stream) {
            Ok(archive) => archive,
            Err(e) => {
                log::debug!("zip: cannot read central directory: {e}");
                return None;
            }
        };

        let comment = archive.comment().to_vec();
        let mut records = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = match archive.by_index_raw(index) {
                Ok(file) => file,
                Err(e) => {
                    log::debug!("zip: invalid central directory record {index}: {e}");
                    return None;
                }
            };
            if file.is_dir() {
                continue;
            }
            records.push(ZipRecord {
                name: file.name().to_owned(),
                raw_name: file.name_raw().to_vec(),
                header_start: file.header_start(),
                compressed_size: file.compressed_size(),
                size: file.size(),
                crc32: file.crc32(),
            });
        }
        log::debug!("zip: central directory lists {} file entries", records.len());

        Some(Self {
            stream: archive.into_inner(),
            options,
            records,
            comment,
            next_index: 0,
            current: None,
            payload: None,
            eof: false,
        })
    }

    fn parse_next(&mut self) -> bool {
        if self.next_index >= self.records.len() {
            self.eof = true;
            return false;
        }
        self.position(self.next_index)
    }

    fn parse_at(&mut self, offset: u64) -> bool {
        match self.records.iter().position(|r| r.header_start == offset) {
            Some(index) => self.position(index),
            None => {
                log::warn!("zip: no entry starts at offset {offset}");
                false
            }
        }
    }

    fn find_by_name(&mut self, name: &[u8]) -> bool {
        match self.records.iter().position(|r| r.raw_name == name || r.name.as_bytes() == name) {
            Some(index) => self.position(index),
            None => false,
        }
    }

    fn at_eof(&self) -> bool {
        self.eof
    }

    fn entry(&self) -> Option<&EntryRecord> {
        self.current.as_ref().map(|(_, entry)| entry)
    }

    fn decompress(&mut self, out: &mut [u8]) -> bool {
        match self.read_payload(out) {
            Ok(()) => true,
            Err(e) => {
                if let Some((_, entry)) = &self.current {
                    log::warn!("zip: cannot decode {:?}: {e}", entry.name);
                }
                false
            }
        }
    }

    fn global_comment(&mut self, buf: Option<&mut [u8]>) -> usize {
        match buf {
            None => self.comment.len(),
            Some(buf) => {
                let n = buf.len().min(self.comment.len());
                buf[..n].copy_from_slice(&self.comment[..n]);
                n
            }
        }
    }

    fn into_stream(self) -> S {
        self.stream
    }
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::ZipFixture;
    use crate::test_utils::ZipMethod;
    use crate::test_utils::create_test_zip;
    use std::io::Cursor;

    fn open_with(data: Vec<u8>, options: ArchiveOptions) -> ZipCodec<Cursor<Vec<u8>>> {
        ZipCodec::open(Cursor::new(data), options).unwrap()
    }

    fn open(data: Vec<u8>) -> ZipCodec<Cursor<Vec<u8>>> {
        open_with(data, ArchiveOptions::default())
    }

    fn read_all(codec: &mut ZipCodec<Cursor<Vec<u8>>>) -> Option<Vec<u8>> {
        let size = usize::try_from(codec.entry()?.size).ok()?;
        let mut buf = vec![0u8; size];
        codec.decompress(&mut buf).then_some(buf)
    }

    #[test]
    fn test_open_rejects_garbage() {
        let data = b"definitely not a zip archive".to_vec();
        assert!(ZipCodec::open(Cursor::new(data), ArchiveOptions::default()).is_none());
    }

    #[test]
    fn test_stored_entries() {
        let mut codec = open(create_test_zip(&[("one.txt", b"first"), ("two.txt", b"second")]));

        assert!(codec.parse_next());
        assert_eq!(codec.entry().unwrap().name.as_deref(), Some("one.txt"));
        assert_eq!(read_all(&mut codec).unwrap(), b"first");

        assert!(codec.parse_next());
        assert_eq!(read_all(&mut codec).unwrap(), b"second");

        assert!(!codec.parse_next());
        assert!(codec.at_eof());
    }

    #[test]
    fn test_deflated_entry_in_chunks() {
        let payload = b"deflate me ".repeat(500);
        let data = ZipFixture::new()
            .add("text.txt", &payload, ZipMethod::Deflated)
            .build();
        let mut codec = open(data);
        assert!(codec.parse_next());
        assert_eq!(codec.entry().unwrap().size, payload.len() as u64);

        let mut out = Vec::new();
        let mut chunk = [0u8; 1000];
        for _ in 0..5 {
            assert!(codec.decompress(&mut chunk));
            out.extend_from_slice(&chunk);
        }
        let mut last = vec![0u8; payload.len() - out.len()];
        assert!(codec.decompress(&mut last));
        out.extend_from_slice(&last);
        assert_eq!(out, payload);
    }

    #[test]
    fn test_bzip2_entry() {
        let data = ZipFixture::new()
            .add("b.txt", b"bzip2 payload", ZipMethod::Bzip2)
            .build();
        let mut codec = open(data);
        assert!(codec.parse_next());
        assert_eq!(read_all(&mut codec).unwrap(), b"bzip2 payload");
    }

    #[test]
    fn test_deflated_only_rejects_bzip2_at_read_time() {
        let data = ZipFixture::new()
            .add("b.txt", b"bzip2 payload", ZipMethod::Bzip2)
            .add("d.txt", b"deflate payload", ZipMethod::Deflated)
            .build();
        let mut codec = open_with(data, ArchiveOptions::default().with_zip_deflated_only(true));

        // iteration still lists the entry
        assert!(codec.parse_next());
        assert_eq!(codec.entry().unwrap().name.as_deref(), Some("b.txt"));
        assert!(read_all(&mut codec).is_none());

        assert!(codec.parse_next());
        assert_eq!(read_all(&mut codec).unwrap(), b"deflate payload");
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let data = ZipFixture::new()
            .add_with_crc("bad.txt", b"payload", ZipMethod::Stored, 0xDEAD_BEEF)
            .build();

        let mut codec = open(data.clone());
        assert!(codec.parse_next());
        assert!(read_all(&mut codec).is_none());

        let mut lenient = open_with(data, ArchiveOptions::default().with_verify_checksums(false));
        assert!(lenient.parse_next());
        assert_eq!(read_all(&mut lenient).unwrap(), b"payload");
    }

    #[test]
    fn test_find_by_name_and_offset() {
        let mut codec = open(create_test_zip(&[("a", b"1"), ("b", b"22"), ("c", b"333")]));

        assert!(codec.find_by_name(b"b"));
        let offset = codec.entry().unwrap().offset;
        assert_eq!(read_all(&mut codec).unwrap(), b"22");

        // iteration continues after the found entry
        assert!(codec.parse_next());
        assert_eq!(codec.entry().unwrap().name.as_deref(), Some("c"));

        assert!(codec.parse_at(offset));
        assert_eq!(read_all(&mut codec).unwrap(), b"22");

        assert!(!codec.parse_at(offset + 1));
        assert!(!codec.find_by_name(b"B"));
    }

    #[test]
    fn test_directories_skipped() {
        let data = ZipFixture::new()
            .add("dir/", b"", ZipMethod::Stored)
            .add("dir/file", b"f", ZipMethod::Stored)
            .build();
        let mut codec = open(data);
        assert!(codec.parse_next());
        assert_eq!(codec.entry().unwrap().name.as_deref(), Some("dir/file"));
        assert!(!codec.parse_next());
    }

    #[test]
    fn test_global_comment() {
        let data = ZipFixture::new()
            .add("x", b"x", ZipMethod::Stored)
            .comment(b"archive comment")
            .build();
        let mut codec = open(data);

        assert_eq!(codec.global_comment(None), 15);
        let mut short = [0u8; 7];
        assert_eq!(codec.global_comment(Some(&mut short)), 7);
        assert_eq!(&short, b"archive");
    }

    #[test]
    fn test_dos_timestamp_reported() {
        let data = ZipFixture::new()
            .add("t", b"t", ZipMethod::Stored)
            .build();
        let mut codec = open(data);
        assert!(codec.parse_next());
        assert_eq!(
            codec.entry().unwrap().filetime,
            common::filetime_from_dos(ZipFixture::DOS_DATE, ZipFixture::DOS_TIME)
        );
    }

    #[test]
    fn test_failed_inflate_is_not_retried() {
        let payload: Vec<u8> = (0..20_000u32).flat_map(|i| format!("{i} ").into_bytes()).collect();
        let mut data = ZipFixture::new()
            .add("numbers.txt", &payload, ZipMethod::Deflated)
            .build();
        // halve the compressed size the central directory declares
        let central = data.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        let declared = le_u32(&data, central + 20);
        data[central + 20..central + 24].copy_from_slice(&(declared / 2).to_le_bytes());

        let mut codec = open(data);
        assert!(codec.parse_next());
        let mut whole = vec![0u8; payload.len()];
        assert!(!codec.decompress(&mut whole));

        // later reads fail instead of returning bytes from the wrong position
        let mut chunk = [0u8; 16];
        assert!(!codec.decompress(&mut chunk));

        // repositioning reloads the entry from its local header
        assert!(codec.parse_at(0));
        assert!(codec.decompress(&mut chunk));
        assert_eq!(&chunk, &payload[..16]);
    }

    #[test]
    fn test_lookup_compares_stored_name_bytes() {
        let mut codec = open(create_test_zip(&[("caf\u{e9}.txt", b"coffee")]));

        assert!(codec.find_by_name("caf\u{e9}.txt".as_bytes()));
        assert_eq!(codec.entry().unwrap().raw_name.as_deref(), Some("caf\u{e9}.txt".as_bytes()));
        assert!(!codec.find_by_name(b"cafe.txt"));
    }

    #[test]
    fn test_local_header_mismatch_is_not_eof() {
        let mut data = create_test_zip(&[("one.txt", b"first"), ("two.txt", b"second")]);
        let second = data
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == b"PK\x03\x04")
            .nth(1)
            .unwrap()
            .0;
        data[second + LOCAL_HEADER_LEN] = b'T';
        let mut codec = open(data);

        assert!(codec.parse_next());
        assert!(!codec.parse_next());
        assert!(!codec.at_eof());
        assert_eq!(codec.entry().unwrap().name.as_deref(), Some("one.txt"));
    }
}
