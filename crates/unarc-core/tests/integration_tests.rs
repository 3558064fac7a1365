//! Integration tests for unarc-core sessions.
//!
//! These tests drive the public session API end to end over every supported
//! format, from memory buffers, files, and caller-owned streams.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;
use std::io::Seek;
use std::io::Write;

use tempfile::NamedTempFile;
use unarc_core::Archive;
use unarc_core::ArchiveError;
use unarc_core::ArchiveOptions;
use unarc_core::ArchiveType;
use unarc_core::ByteStream;
use unarc_core::CursorState;
use unarc_core::test_utils::RarFixture;
use unarc_core::test_utils::RarVersion;
use unarc_core::test_utils::SevenZFixture;
use unarc_core::test_utils::TarTestBuilder;
use unarc_core::test_utils::ZipFixture;
use unarc_core::test_utils::ZipMethod;
use unarc_core::test_utils::create_test_tar;
use unarc_core::test_utils::create_test_zip;

const FIRST: (&str, &[u8]) = ("first.txt", b"first payload");
const SECOND: (&str, &[u8]) = ("nested/second.bin", b"\x00\x01second\xFF");

/// Two-entry archive of `format` holding `FIRST` then `SECOND`.
fn two_entry_archive(format: ArchiveType) -> Vec<u8> {
    match format {
        ArchiveType::Tar => create_test_tar(&[FIRST, SECOND]),
        ArchiveType::Zip => ZipFixture::new()
            .add(FIRST.0, FIRST.1, ZipMethod::Deflated)
            .add(SECOND.0, SECOND.1, ZipMethod::Stored)
            .build(),
        ArchiveType::Rar => RarFixture::new(RarVersion::V5)
            .add_file(FIRST.0, FIRST.1)
            .add_file(SECOND.0, SECOND.1)
            .build(),
        ArchiveType::SevenZ => SevenZFixture::new()
            .add_file(FIRST.0, FIRST.1)
            .add_file(SECOND.0, SECOND.1)
            .build(),
    }
}

fn open(format: ArchiveType, data: Vec<u8>) -> Archive<'static> {
    Archive::from_memory(format, data, ArchiveOptions::default()).unwrap()
}

#[test]
fn test_empty_buffer_fails_stream_open_for_every_format() {
    for format in ArchiveType::ALL {
        let err = Archive::from_memory(format, Vec::new(), ArchiveOptions::default()).unwrap_err();
        assert!(
            matches!(err, ArchiveError::StreamOpenFailed(_)),
            "{format}: {err}"
        );
    }
}

#[test]
fn test_garbage_fails_archive_open_for_every_format() {
    let garbage = b"this is certainly not an archive of any kind".to_vec();
    for format in ArchiveType::ALL {
        let err = Archive::from_memory(format, garbage.clone(), ArchiveOptions::default()).unwrap_err();
        assert!(
            matches!(err, ArchiveError::ArchiveOpenFailed { format: f } if f == format),
            "{format}: {err}"
        );
    }
}

#[test]
fn test_zip_single_entry_bounded_read() {
    let payload = b"the quick brown fox";
    let mut archive = open(ArchiveType::Zip, create_test_zip(&[("fox.txt", payload)]));

    let mut entry = archive.next().unwrap().expect("one entry");
    assert_eq!(entry.name(), Some("fox.txt"));
    assert_eq!(entry.size(), payload.len() as u64);

    let err = entry.read_to_bound(payload.len() as u64 - 1).unwrap_err();
    assert!(matches!(err, ArchiveError::EntryTooLarge { .. }));
    assert_eq!(entry.read_to_bound(payload.len() as u64).unwrap(), payload);
}

#[test]
fn test_iteration_reads_every_format() {
    for format in ArchiveType::ALL {
        let mut archive = open(format, two_entry_archive(format));
        assert_eq!(archive.format(), format);

        let mut seen = Vec::new();
        while let Some(mut entry) = archive.next().unwrap() {
            let name = entry.name().unwrap().to_string();
            let data = entry.read_to_bound(1024).unwrap();
            seen.push((name, data));
        }

        assert_eq!(
            seen,
            vec![
                (FIRST.0.to_string(), FIRST.1.to_vec()),
                (SECOND.0.to_string(), SECOND.1.to_vec()),
            ],
            "{format}"
        );
    }
}

#[test]
fn test_reposition_is_idempotent_for_every_format() {
    for format in ArchiveType::ALL {
        let mut archive = open(format, two_entry_archive(format));
        archive.next().unwrap().unwrap();

        let mut entry = archive.next().unwrap().unwrap();
        let offset = entry.offset();
        let first_read = entry.read_to_bound(1024).unwrap();

        let mut again = archive.seek_to_offset(offset).unwrap();
        assert_eq!(again.name(), Some(SECOND.0), "{format}");
        assert_eq!(again.read_to_bound(1024).unwrap(), first_read, "{format}");

        let mut third = archive.seek_to_offset(offset).unwrap();
        assert_eq!(third.read_to_bound(1024).unwrap(), first_read, "{format}");
    }
}

#[test]
fn test_exhaustion_is_sticky_for_every_format() {
    for format in ArchiveType::ALL {
        let mut archive = open(format, two_entry_archive(format));
        while archive.next().unwrap().is_some() {}

        assert!(archive.at_eof(), "{format}");
        assert_eq!(archive.state(), CursorState::Eof);
        assert!(archive.next().unwrap().is_none(), "{format}");
        assert!(archive.next().unwrap().is_none(), "{format}");
    }
}

#[test]
fn test_find_by_name_for_every_format() {
    for format in ArchiveType::ALL {
        let mut archive = open(format, two_entry_archive(format));

        assert!(archive.find_by_name(SECOND.0), "{format}");
        assert_eq!(
            archive.current().unwrap().read_to_bound(1024).unwrap(),
            SECOND.1
        );

        assert!(!archive.find_by_name("missing.txt"), "{format}");
        assert_eq!(archive.current().unwrap().name(), Some(SECOND.0));
        assert!(!archive.find_by_name("FIRST.TXT"), "{format}");

        assert!(archive.find_by_name(FIRST.0), "{format}");
        assert_eq!(
            archive.current().unwrap().read_to_bound(1024).unwrap(),
            FIRST.1
        );
    }
}

#[test]
fn test_tar_lookup_and_miss() {
    let data = create_test_tar(&[("a.txt", b"A"), ("b.txt", b"BBBB")]);
    let mut archive = open(ArchiveType::Tar, data);

    assert!(archive.find_by_name("b.txt"));
    assert_eq!(archive.current().unwrap().read_to_bound(4).unwrap(), b"BBBB");

    assert!(!archive.find_by_name("missing.txt"));
    assert!(archive.find_by_name("a.txt"));
    assert_eq!(archive.current().unwrap().read_to_bound(1).unwrap(), b"A");
}

#[test]
fn test_lookup_by_undecodable_name() {
    let data = TarTestBuilder::new()
        .add_file("plain.txt", b"plain")
        .add_raw_name(b"odd\xFFname", b"odd")
        .build();
    let mut archive = open(ArchiveType::Tar, data);

    assert!(archive.find_by_name(b"odd\xFFname"));
    let mut entry = archive.current().unwrap();
    assert_eq!(entry.name(), None);
    assert_eq!(entry.raw_name(), Some(&b"odd\xFFname"[..]));
    assert_eq!(entry.read_to_bound(16).unwrap(), b"odd");
    assert!(!archive.find_by_name("odd\u{FFFD}name"));
    assert!(archive.find_by_name(String::from("plain.txt")));
}

#[test]
fn test_borrowed_stream_survives_close() {
    let mut source = Cursor::new(create_test_zip(&[("x.txt", b"x")]));

    let archive = Archive::open(
        ArchiveType::Zip,
        ByteStream::borrowed(&mut source),
        ArchiveOptions::default(),
    )
    .unwrap();
    assert!(!archive.owns_stream());
    archive.close();

    source.rewind().unwrap();
    let mut second = Archive::open(
        ArchiveType::Zip,
        ByteStream::borrowed(&mut source),
        ArchiveOptions::default(),
    )
    .unwrap();
    assert_eq!(second.next().unwrap().unwrap().name(), Some("x.txt"));
    second.close();

    // the caller still owns the bytes
    assert!(!source.into_inner().is_empty());
}

#[test]
fn test_borrowed_stream_survives_failed_open() {
    let mut source = Cursor::new(create_test_tar(&[("t", b"t")]));

    let err = Archive::open(
        ArchiveType::Zip,
        ByteStream::borrowed(&mut source),
        ArchiveOptions::default(),
    )
    .unwrap_err();
    assert!(err.is_recoverable());

    source.rewind().unwrap();
    let mut archive = Archive::open(
        ArchiveType::Tar,
        ByteStream::borrowed(&mut source),
        ArchiveOptions::default(),
    )
    .unwrap();
    assert!(archive.next().unwrap().is_some());
}

#[test]
fn test_memory_buffer_shared_by_two_sessions() {
    let data = create_test_tar(&[("shared", b"data")]);
    let mut one = Archive::from_memory(ArchiveType::Tar, data.as_slice(), ArchiveOptions::default()).unwrap();
    let mut two = Archive::from_memory(ArchiveType::Tar, data.as_slice(), ArchiveOptions::default()).unwrap();

    assert!(one.owns_stream());
    assert_eq!(one.next().unwrap().unwrap().read_to_bound(4).unwrap(), b"data");
    assert_eq!(two.next().unwrap().unwrap().read_to_bound(4).unwrap(), b"data");
}

#[test]
fn test_open_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&two_entry_archive(ArchiveType::Rar)).unwrap();
    file.flush().unwrap();

    let mut archive = Archive::open_file(ArchiveType::Rar, file.path(), ArchiveOptions::default()).unwrap();
    assert!(archive.owns_stream());
    assert_eq!(archive.next().unwrap().unwrap().name(), Some(FIRST.0));
    archive.close();
}

#[test]
fn test_open_missing_file() {
    let err = Archive::open_file(
        ArchiveType::Zip,
        "/nonexistent/unarc/missing.zip",
        ArchiveOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::StreamOpenFailed(_)));
}

#[test]
fn test_global_comment_truncation() {
    let zip = ZipFixture::new()
        .add("a", b"a", ZipMethod::Stored)
        .comment(b"zip archive comment")
        .build();
    let rar4 = RarFixture::new(RarVersion::V4)
        .comment(b"rar archive comment")
        .add_file("a", b"a")
        .build();

    for (format, data) in [(ArchiveType::Zip, zip), (ArchiveType::Rar, rar4)] {
        let mut archive = open(format, data);
        let size = archive.global_comment_size();
        assert_eq!(size, 19, "{format}");

        let mut full = vec![0u8; size];
        assert_eq!(archive.read_global_comment(&mut full), size);
        assert!(full.ends_with(b"archive comment"));

        let mut short = [0u8; 3];
        assert_eq!(archive.read_global_comment(&mut short), 3);
        assert_eq!(&short, &full[..3]);

        let mut long = [0u8; 64];
        assert_eq!(archive.read_global_comment(&mut long), size);
        assert_eq!(archive.read_global_comment(&mut []), 0);
    }
}

#[test]
fn test_no_comment_for_tar_and_7z() {
    for format in [ArchiveType::Tar, ArchiveType::SevenZ] {
        let mut archive = open(format, two_entry_archive(format));
        assert_eq!(archive.global_comment_size(), 0);
        assert_eq!(archive.read_global_comment(&mut [0u8; 8]), 0);
    }
}

#[test]
fn test_corrupt_record_reports_parse_failure() {
    let mut data = create_test_tar(&[("a.txt", b"A"), ("b.txt", b"BBBB")]);
    data[1024] ^= 0xFF;
    let mut archive = open(ArchiveType::Tar, data);

    assert!(archive.next().unwrap().is_some());
    let err = archive.next().unwrap_err();
    assert!(matches!(err, ArchiveError::ParseFailed { format: ArchiveType::Tar }));
    assert!(!archive.at_eof());
    assert_eq!(archive.current().unwrap().name(), Some("a.txt"));
}

/// Asserts that the record after `FIRST` is reported as corrupt, not as the end.
fn assert_second_record_fails(format: ArchiveType, data: Vec<u8>) {
    let mut archive = open(format, data);

    assert_eq!(archive.next().unwrap().unwrap().name(), Some(FIRST.0), "{format}");
    let err = archive.next().unwrap_err();
    assert!(
        matches!(err, ArchiveError::ParseFailed { format: f } if f == format),
        "{format}: {err}"
    );
    assert!(!archive.at_eof(), "{format}");
}

#[test]
fn test_truncated_payload_is_not_a_clean_end() {
    let big = vec![b'z'; 2000];

    let mut tar = create_test_tar(&[FIRST, ("big.bin", &big)]);
    // first record is 1024 bytes, the second header 512
    tar.truncate(1024 + 512 + 700);
    assert_second_record_fails(ArchiveType::Tar, tar);

    for version in [RarVersion::V4, RarVersion::V5] {
        let mut rar = RarFixture::new(version)
            .add_file(FIRST.0, FIRST.1)
            .add_file("big.bin", &big)
            .build();
        rar.truncate(rar.len() - 1500);
        assert_second_record_fails(ArchiveType::Rar, rar);
    }
}

#[test]
fn test_missing_end_marker_is_not_a_clean_end() {
    let mut tar = create_test_tar(&[FIRST, SECOND]);
    tar.truncate(2048);
    let mut archive = open(ArchiveType::Tar, tar);
    assert!(archive.next().unwrap().is_some());
    assert_eq!(archive.next().unwrap().unwrap().name(), Some(SECOND.0));
    let err = archive.next().unwrap_err();
    assert!(matches!(err, ArchiveError::ParseFailed { format: ArchiveType::Tar }));
    assert!(!archive.at_eof());

    for (version, end_block) in [(RarVersion::V4, 7), (RarVersion::V5, 8)] {
        let mut rar = RarFixture::new(version)
            .add_file(FIRST.0, FIRST.1)
            .add_file(SECOND.0, SECOND.1)
            .build();
        rar.truncate(rar.len() - end_block);
        let mut archive = open(ArchiveType::Rar, rar);
        assert!(archive.next().unwrap().is_some());
        let mut entry = archive.next().unwrap().unwrap();
        assert_eq!(entry.read_to_bound(64).unwrap(), SECOND.1);
        let err = archive.next().unwrap_err();
        assert!(matches!(err, ArchiveError::ParseFailed { format: ArchiveType::Rar }));
        assert!(!archive.at_eof());
    }
}

#[test]
fn test_corrupt_zip_local_header_reports_parse_failure() {
    let mut data = two_entry_archive(ArchiveType::Zip);
    let second = data
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == b"PK\x03\x04")
        .nth(1)
        .unwrap()
        .0;
    // first byte of the stored file name
    data[second + 30] ^= 0x20;
    assert_second_record_fails(ArchiveType::Zip, data);
}

#[test]
fn test_truncated_7z_fails_to_open() {
    let mut data = two_entry_archive(ArchiveType::SevenZ);
    data.truncate(data.len() - 16);
    let err = Archive::from_memory(ArchiveType::SevenZ, data, ArchiveOptions::default()).unwrap_err();
    assert!(matches!(err, ArchiveError::ArchiveOpenFailed { format: ArchiveType::SevenZ }));
}

#[test]
fn test_unreadable_rar_entry_reports_decompress_failure() {
    let data = RarFixture::new(RarVersion::V4)
        .add_compressed("packed", b"not really compressed")
        .build();
    let mut archive = open(ArchiveType::Rar, data);

    let mut entry = archive.next().unwrap().unwrap();
    let err = entry.read_to_bound(1024).unwrap_err();
    assert!(matches!(err, ArchiveError::DecompressFailed { format: ArchiveType::Rar }));
}

#[test]
fn test_entry_streams_with_io_copy() {
    let payload = b"streaming ".repeat(1000);
    let data = ZipFixture::new()
        .add("big.txt", &payload, ZipMethod::Deflated)
        .build();
    let mut archive = open(ArchiveType::Zip, data);
    let mut entry = archive.next().unwrap().unwrap();

    let mut out = Vec::new();
    let copied = std::io::copy(&mut entry, &mut out).unwrap();
    assert_eq!(copied, payload.len() as u64);
    assert_eq!(out, payload);
    assert_eq!(entry.remaining(), 0);
}

#[test]
fn test_sniffed_format_opens() {
    for format in ArchiveType::ALL {
        let data = two_entry_archive(format);
        let guessed = ArchiveType::from_magic(&data);
        assert_eq!(guessed, Some(format));
        assert!(Archive::from_memory(format, data, ArchiveOptions::default()).is_ok());
    }
}

#[test]
fn test_runtime_version() {
    let version = unarc_core::runtime_version();
    assert_eq!(version.display, concat!("unarc-core ", env!("CARGO_PKG_VERSION")));
}
