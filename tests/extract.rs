use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use geodataset::error::{ErrorKind, GeoError};
use geodataset::extract::ArchiveExtractor;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

fn write_gzip(path: &Path, content: &[u8]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap();
}

fn gzip_bytes(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    fs::write(path, gzip_bytes(&tar_bytes(entries))).unwrap();
}

/// Two 5000-byte members; each occupies 512 + 5120 bytes.
fn two_member_tar() -> Vec<u8> {
    tar_bytes(&[
        ("GSM1.CEL.gz", &[1u8; 5000][..]),
        ("GSM2.CEL.gz", &[2u8; 5000][..]),
    ])
}

#[test]
fn gzip_member_lands_without_suffix() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_family.soft.gz");
    write_gzip(&archive, b"^SERIES = GSE2034\n");

    let produced = ArchiveExtractor::extract(&archive, dir.path()).unwrap();
    assert_eq!(produced, vec![dir.path().join("GSE2034_family.soft")]);
    assert_eq!(
        fs::read_to_string(&produced[0]).unwrap(),
        "^SERIES = GSE2034\n"
    );
    assert!(archive.exists());
}

#[test]
fn every_gzip_member_is_decoded() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSM1_peaks.bed.gz");
    let mut bytes = gzip_bytes(b"chr1\t1\t2\n");
    bytes.extend(gzip_bytes(b"chr2\t3\t4\n"));
    fs::write(&archive, bytes).unwrap();

    let produced = ArchiveExtractor::extract(&archive, dir.path()).unwrap();
    assert_eq!(
        fs::read_to_string(&produced[0]).unwrap(),
        "chr1\t1\t2\nchr2\t3\t4\n"
    );
}

#[test]
fn zip_entries_keep_their_layout() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = SimpleFileOptions::default();
        zip.start_file("counts.txt", options).unwrap();
        zip.write_all(b"gene\tcount\n").unwrap();
        zip.add_directory("meta/", options).unwrap();
        zip.start_file("meta/info.txt", options).unwrap();
        zip.write_all(b"platform GPL96\n").unwrap();
        zip.finish().unwrap();
    }

    let out = dir.path().join("out");
    let mut produced = ArchiveExtractor::extract(&archive, &out).unwrap();
    produced.sort();
    assert_eq!(
        produced,
        vec![out.join("counts.txt"), out.join("meta").join("info.txt")]
    );
    assert_eq!(
        fs::read_to_string(out.join("meta/info.txt")).unwrap(),
        "platform GPL96\n"
    );
    assert!(archive.exists());
}

#[test]
fn tar_gz_members_are_written() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_RAW.tar.gz");
    write_tar_gz(
        &archive,
        &[
            ("GSM1_sample.CEL.gz", &b"cel one"[..]),
            ("sub/GSM2_sample.CEL.gz", &b"cel two"[..]),
        ],
    );

    let out = dir.path().join("raw");
    let produced = ArchiveExtractor::extract(&archive, &out).unwrap();
    assert_eq!(produced.len(), 2);
    assert_eq!(fs::read(out.join("sub/GSM2_sample.CEL.gz")).unwrap(), b"cel two");
}

#[test]
fn plain_tar_members_are_written() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_RAW.tar");
    fs::write(&archive, two_member_tar()).unwrap();

    let out = dir.path().join("raw");
    let produced = ArchiveExtractor::extract(&archive, &out).unwrap();
    assert_eq!(produced, vec![out.join("GSM1.CEL.gz"), out.join("GSM2.CEL.gz")]);
    assert_eq!(fs::read(out.join("GSM2.CEL.gz")).unwrap(), vec![2u8; 5000]);
}

#[test]
fn tar_cut_on_a_member_boundary_is_truncated() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_RAW.tar");
    fs::write(&archive, &two_member_tar()[..5632]).unwrap();

    let err = ArchiveExtractor::extract(&archive, &dir.path().join("raw")).unwrap_err();
    assert_matches!(err, GeoError::TruncatedArchive { .. });
}

#[test]
fn tar_cut_inside_a_member_is_truncated_and_leaves_no_partial_file() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_RAW.tar");
    fs::write(&archive, &two_member_tar()[..3000]).unwrap();

    let out = dir.path().join("raw");
    let err = ArchiveExtractor::extract(&archive, &out).unwrap_err();
    assert_matches!(err, GeoError::TruncatedArchive { .. });
    assert!(!out.join("GSM1.CEL.gz").exists());
    assert!(archive.exists());
}

#[test]
fn tar_gz_cut_short_is_truncated() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("GSE2034_RAW.tar.gz");
    let bytes = gzip_bytes(&two_member_tar());
    fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    let err = ArchiveExtractor::extract(&archive, &dir.path().join("raw")).unwrap_err();
    assert_matches!(err, GeoError::TruncatedArchive { .. });
}

#[test]
fn zip_cut_short_is_truncated() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("counts.txt", options).unwrap();
        zip.write_all(&[b'7'; 10 * 1024]).unwrap();
        zip.finish().unwrap();
    }
    let bytes = cursor.into_inner();
    fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    let err = ArchiveExtractor::extract(&archive, &dir.path().join("out")).unwrap_err();
    assert_matches!(err, GeoError::TruncatedArchive { .. });
}

#[test]
fn corrupt_gzip_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("broken.soft.gz");
    fs::write(&archive, b"this is not gzip at all").unwrap();

    let err = ArchiveExtractor::extract(&archive, dir.path()).unwrap_err();
    assert_matches!(err, GeoError::CorruptArchive { .. });
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(archive.exists());
}

#[test]
fn truncated_gzip_is_reported_as_truncated() {
    let dir = tempdir().unwrap();
    let whole = dir.path().join("whole.gz");
    write_gzip(&whole, &vec![b'a'; 64 * 1024]);
    let bytes = fs::read(&whole).unwrap();
    let archive = dir.path().join("cut.txt.gz");
    fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    let out = dir.path().join("out");
    let err = ArchiveExtractor::extract(&archive, &out).unwrap_err();
    assert_matches!(err, GeoError::TruncatedArchive { .. });
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(!out.join("cut.txt").exists());
    assert!(archive.exists());
}

#[test]
fn corrupt_zip_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("broken.zip");
    fs::write(&archive, b"PK but not really").unwrap();

    let err = ArchiveExtractor::extract(&archive, dir.path()).unwrap_err();
    assert_matches!(err, GeoError::CorruptArchive { .. });
}

#[test]
fn unsupported_extension_is_a_validation_error() {
    let dir = tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, b"plain").unwrap();
    let err = ArchiveExtractor::extract(&notes, dir.path()).unwrap_err();
    assert_matches!(err, GeoError::UnsupportedArchive(_));
    assert_eq!(err.kind(), ErrorKind::Validation);
}
