use std::fmt;

use serde::Serialize;

use crate::config::DEFAULT_GEO_ROOT;
use crate::domain::{Accession, RecordType};
use crate::error::GeoError;

/// Directory or file location on the GEO file tree, always `/`-separated.
///
/// Directories end with a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemotePath(String);

impl RemotePath {
    /// Wraps a raw server path, adding the leading slash if missing.
    pub fn new(path: &str) -> Self {
        if path.starts_with('/') {
            Self(path.to_string())
        } else {
            Self(format!("/{path}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_dir(&self) -> bool {
        self.0.ends_with('/')
    }

    pub fn join_dir(&self, name: &str) -> RemotePath {
        RemotePath(format!("{}{}/", self.dir_prefix(), name.trim_matches('/')))
    }

    pub fn as_dir(&self) -> RemotePath {
        RemotePath(self.dir_prefix())
    }

    pub fn join_file(&self, name: &str) -> RemotePath {
        RemotePath(format!("{}{}", self.dir_prefix(), name.trim_start_matches('/')))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    fn dir_prefix(&self) -> String {
        if self.is_dir() {
            self.0.clone()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps accessions onto the server's `nnn` directory sharding.
#[derive(Debug, Clone)]
pub struct RemotePathResolver {
    root: String,
}

impl Default for RemotePathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_GEO_ROOT)
    }
}

impl RemotePathResolver {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        let root = if root.starts_with('/') {
            root.to_string()
        } else {
            format!("/{root}")
        };
        Self { root }
    }

    /// Validates `accession` as `record_type` first; no path is built otherwise.
    pub fn resolve(&self, record_type: RecordType, accession: &str) -> Result<RemotePath, GeoError> {
        let accession = Accession::parse_as(record_type, accession)?;
        Ok(self.record_dir(&accession))
    }

    pub fn record_dir(&self, accession: &Accession) -> RemotePath {
        let record_type = accession.record_type();
        RemotePath(format!(
            "{}/{}/{}/{}/",
            self.root.trim_end_matches('/'),
            record_type.root_dir(),
            bucket_dir(accession),
            accession
        ))
    }
}

/// `GSE12345` → `GSE12nnn`, `GSE123` / `GSE5` → `GSEnnn`.
pub fn bucket_dir(accession: &Accession) -> String {
    let digits = format!("{:0>3}", accession.digits());
    let head = digits[..digits.len() - 3].trim_start_matches('0');
    format!("{}{}nnn", accession.record_type().prefix(), head)
}
