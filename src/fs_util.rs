use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::warn;

use crate::error::GeoError;

/// Copies `source` into `sink` until EOF and returns the byte count.
///
/// Read failures are classified by `on_read_error`; write failures are always
/// local filesystem errors.
pub fn copy_stream<E>(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    mut on_read_error: E,
) -> Result<u64, GeoError>
where
    E: FnMut(io::Error) -> GeoError,
{
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(on_read_error(err)),
        };
        sink.write_all(&buffer[..read])
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        total += read as u64;
    }
    sink.flush()
        .map_err(|err| GeoError::Filesystem(err.to_string()))?;
    Ok(total)
}

pub fn create_dir(path: &Path) -> Result<(), GeoError> {
    fs::create_dir_all(path)
        .map_err(|err| GeoError::Filesystem(format!("create {}: {err}", path.display())))
}

pub fn create_file(path: &Path) -> Result<File, GeoError> {
    File::create(path)
        .map_err(|err| GeoError::Filesystem(format!("create {}: {err}", path.display())))
}

pub fn open_file(path: &Path) -> Result<File, GeoError> {
    File::open(path).map_err(|err| GeoError::Filesystem(format!("open {}: {err}", path.display())))
}

/// Best-effort removal of a partially written file.
pub fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial file");
        }
    }
}
