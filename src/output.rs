use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{FileEntry, SearchResult};
use crate::pipeline::RecordDownload;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_listing(entries: &[FileEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_record(record: &RecordDownload) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Raw E-utilities payloads are passed through untouched.
    pub fn print_raw(body: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(body.as_bytes())?;
        if !body.ends_with('\n') {
            stdout.write_all(b"\n")?;
        }
        Ok(())
    }
}
