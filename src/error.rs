use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    TransientTransport,
    RetriesExhausted,
    RemoteRejection,
    Integrity,
    Resource,
}

#[derive(Debug, Error, Diagnostic)]
pub enum GeoError {
    #[error("invalid {expected} accession: {value}")]
    InvalidAccession {
        expected: &'static str,
        value: String,
    },

    #[error("no selector: pass explicit UIDs, a query_key/web_env pair, or run a search with history first")]
    MissingSelector,

    #[error("query_key and web_env must be supplied together")]
    PartialHistoryTokens,

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("unrecognized option: {0}")]
    UnknownOption(String),

    #[error("invalid value for option {key}: {value}")]
    InvalidOption { key: String, value: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server returned transient status {status}: {message}")]
    ServerBusy { status: u16, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<GeoError> },

    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("server rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("corrupt archive {path}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("truncated archive {path}; re-download it before extracting again")]
    TruncatedArchive { path: PathBuf },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GeoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeoError::InvalidAccession { .. }
            | GeoError::MissingSelector
            | GeoError::PartialHistoryTokens
            | GeoError::UnsupportedArchive(_)
            | GeoError::UnknownOption(_)
            | GeoError::InvalidOption { .. }
            | GeoError::InvalidCredential(_)
            | GeoError::InvalidRequest(_)
            | GeoError::ConfigRead(_)
            | GeoError::ConfigParse(_) => ErrorKind::Validation,
            GeoError::Timeout(_) | GeoError::Transport(_) | GeoError::ServerBusy { .. } => {
                ErrorKind::TransientTransport
            }
            GeoError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            GeoError::NotFound(_) | GeoError::Rejected { .. } | GeoError::MalformedResponse(_) => {
                ErrorKind::RemoteRejection
            }
            GeoError::SizeMismatch { .. }
            | GeoError::CorruptArchive { .. }
            | GeoError::TruncatedArchive { .. } => ErrorKind::Integrity,
            GeoError::Filesystem(_) => ErrorKind::Resource,
        }
    }

    /// Whether the shared retry loop may attempt the operation again.
    ///
    /// A size mismatch is retryable (the whole file is fetched again); archive
    /// corruption is not, the caller decides whether to re-download.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientTransport)
            || matches!(self, GeoError::SizeMismatch { .. })
    }

    /// Maps a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, message: String, target: &str) -> Self {
        match status {
            408 | 429 | 500..=599 => GeoError::ServerBusy { status, message },
            404 | 410 => GeoError::NotFound(target.to_string()),
            _ => GeoError::Rejected { status, message },
        }
    }
}
