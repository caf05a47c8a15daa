use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use flate2::read::MultiGzDecoder;
use tar::Archive;
use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::GeoError;
use crate::fs_util::{copy_stream, create_dir, create_file, discard, open_file};

const ZIP_LOCAL_HEADER: [u8; 4] = *b"PK\x03\x04";
const ZIP_END_OF_CENTRAL_DIR: [u8; 4] = *b"PK\x05\x06";
/// End-of-central-directory record plus the longest possible comment.
const ZIP_TAIL_WINDOW: u64 = 22 + u16::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A gzip-compressed file, possibly made of several members.
    Gzip,
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Decided from the file name alone.
    pub fn detect(path: &Path) -> Result<Self, GeoError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else if name.ends_with(".gz") {
            Ok(ArchiveFormat::Gzip)
        } else if name.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else if name.ends_with(".tar") {
            Ok(ArchiveFormat::Tar)
        } else {
            Err(GeoError::UnsupportedArchive(path.to_path_buf()))
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    ArchiveFormat::detect(path).is_ok()
}

pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extracts `archive` into `destination` and returns the files written.
    ///
    /// The archive itself is left in place. A member that fails midway is
    /// removed; members completed before the failure are kept.
    pub fn extract(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, GeoError> {
        let format = ArchiveFormat::detect(archive)?;
        let file = open_file(archive)?;
        create_dir(destination)?;

        let produced = match format {
            ArchiveFormat::Gzip => vec![extract_gzip(file, archive, destination)?],
            ArchiveFormat::Zip => extract_zip(file, archive, destination)?,
            ArchiveFormat::Tar => extract_tar(file, archive, destination)?,
            ArchiveFormat::TarGz => {
                extract_tar(MultiGzDecoder::new(file), archive, destination)?
            }
        };
        info!(
            archive = %archive.display(),
            destination = %destination.display(),
            files = produced.len(),
            "extracted"
        );
        Ok(produced)
    }
}

/// Reader adapter remembering whether its source ever reported end of input.
struct EofWatch<R> {
    inner: R,
    reached: Rc<Cell<bool>>,
}

impl<R: Read> EofWatch<R> {
    fn new(inner: R) -> (Self, Rc<Cell<bool>>) {
        let reached = Rc::new(Cell::new(false));
        let watch = Self {
            inner,
            reached: Rc::clone(&reached),
        };
        (watch, reached)
    }
}

impl<R: Read> Read for EofWatch<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() {
            self.reached.set(true);
        }
        Ok(read)
    }
}

fn extract_gzip(file: File, archive: &Path, destination: &Path) -> Result<PathBuf, GeoError> {
    let name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let stem = name.get(..name.len().saturating_sub(".gz".len())).unwrap_or(name);
    let output_path = destination.join(stem);

    let (source, exhausted) = EofWatch::new(file);
    let mut decoder = MultiGzDecoder::new(source);
    write_member(&output_path, &mut decoder, |err| {
        read_error(archive, err, exhausted.get())
    })?;
    Ok(output_path)
}

fn extract_zip(file: File, archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, GeoError> {
    let mut zip = match ZipArchive::new(file) {
        Ok(zip) => zip,
        Err(_) if zip_is_cut_short(archive) => return Err(truncated(archive)),
        Err(err) => return Err(zip_error(archive, err)),
    };
    let mut produced = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|err| zip_error(archive, err))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => destination.join(path),
            None => return Err(escapes_destination(archive, entry.name())),
        };

        if entry.is_dir() {
            create_dir(&entry_path)?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            create_dir(parent)?;
        }
        write_member(&entry_path, &mut entry, |err| read_error(archive, err, false))?;
        produced.push(entry_path);
    }
    Ok(produced)
}

/// Input that ends before the end-of-archive blocks is a truncated archive,
/// whether the cut falls inside a member or on a member boundary.
fn extract_tar<R: Read>(
    reader: R,
    archive: &Path,
    destination: &Path,
) -> Result<Vec<PathBuf>, GeoError> {
    let (reader, ended) = EofWatch::new(reader);
    let failed = |err: io::Error| read_error(archive, err, ended.get());
    let mut tar = Archive::new(reader);
    let mut produced = Vec::new();
    for entry in tar.entries().map_err(failed)? {
        let mut entry = entry.map_err(failed)?;
        let relative = entry.path().map_err(failed)?.into_owned();
        if !is_enclosed(&relative) {
            return Err(escapes_destination(archive, &relative.to_string_lossy()));
        }
        let entry_path = destination.join(&relative);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            create_dir(&entry_path)?;
            continue;
        }
        if !kind.is_file() {
            debug!(entry = %relative.display(), "skipping non-regular tar entry");
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            create_dir(parent)?;
        }
        let expected = entry.size();
        let written = write_member(&entry_path, &mut entry, failed)?;
        if written < expected {
            discard(&entry_path);
            return Err(truncated(archive));
        }
        produced.push(entry_path);
    }
    if ended.get() {
        return Err(truncated(archive));
    }
    Ok(produced)
}

/// Writes one member to `path`, removing it again if the copy fails.
fn write_member<E>(path: &Path, reader: &mut dyn Read, on_read_error: E) -> Result<u64, GeoError>
where
    E: FnMut(io::Error) -> GeoError,
{
    let copied = {
        let mut output = create_file(path)?;
        copy_stream(reader, &mut output, on_read_error)
    };
    if copied.is_err() {
        discard(path);
    }
    copied
}

/// Decoder failures after the input ran out mean the file was cut short.
fn read_error(archive: &Path, err: io::Error, input_exhausted: bool) -> GeoError {
    if input_exhausted || err.kind() == io::ErrorKind::UnexpectedEof {
        truncated(archive)
    } else {
        GeoError::CorruptArchive {
            path: archive.to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn truncated(archive: &Path) -> GeoError {
    GeoError::TruncatedArchive {
        path: archive.to_path_buf(),
    }
}

fn zip_error(archive: &Path, err: ZipError) -> GeoError {
    match err {
        ZipError::Io(err) => read_error(archive, err, false),
        other => GeoError::CorruptArchive {
            path: archive.to_path_buf(),
            message: other.to_string(),
        },
    }
}

/// A zip that starts with a local file header but has no end-of-central-
/// directory record in its tail lost its end in transfer.
fn zip_is_cut_short(archive: &Path) -> bool {
    let Ok(mut file) = File::open(archive) else {
        return false;
    };
    let mut head = [0u8; 4];
    if file.read_exact(&mut head).is_err() || head != ZIP_LOCAL_HEADER {
        return false;
    }
    let Ok(len) = file.seek(SeekFrom::End(0)) else {
        return false;
    };
    let mut tail = Vec::new();
    if file.seek(SeekFrom::Start(len.saturating_sub(ZIP_TAIL_WINDOW))).is_err()
        || file.read_to_end(&mut tail).is_err()
    {
        return false;
    }
    !tail
        .windows(ZIP_END_OF_CENTRAL_DIR.len())
        .any(|window| window == ZIP_END_OF_CENTRAL_DIR)
}

fn escapes_destination(archive: &Path, entry: &str) -> GeoError {
    GeoError::CorruptArchive {
        path: archive.to_path_buf(),
        message: format!("entry {entry} escapes the destination directory"),
    }
}

fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn detects_formats_by_name() {
        assert_eq!(
            ArchiveFormat::detect(Path::new("GSE1_RAW.tar")).unwrap(),
            ArchiveFormat::Tar
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("x.TAR.GZ")).unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("GSE1_family.xml.tgz")).unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("GSE1_family.soft.gz")).unwrap(),
            ArchiveFormat::Gzip
        );
        assert_eq!(
            ArchiveFormat::detect(Path::new("bundle.zip")).unwrap(),
            ArchiveFormat::Zip
        );
    }

    #[test]
    fn text_file_is_rejected_before_touching_disk() {
        let err = ArchiveExtractor::extract(
            Path::new("/definitely/not/here/notes.txt"),
            Path::new("/definitely/not/here/out"),
        )
        .unwrap_err();
        assert_matches!(err, GeoError::UnsupportedArchive(_));
        assert!(!Path::new("/definitely/not/here/out").exists());
    }

    #[test]
    fn parent_components_are_not_enclosed() {
        assert!(is_enclosed(Path::new("a/b.txt")));
        assert!(!is_enclosed(Path::new("../b.txt")));
        assert!(!is_enclosed(Path::new("/etc/passwd")));
    }
}
