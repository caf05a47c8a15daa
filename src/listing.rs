use std::io::Write;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Method;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_LENGTH;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::domain::{Accession, FileCategory, FileEntry};
use crate::error::GeoError;
use crate::executor::{build_client, classify_reqwest_error};
use crate::fs_util::copy_stream;
use crate::paths::RemotePath;
use crate::rate_limit::RateLimiter;
use crate::retry::{self, RetryPolicy, Sleeper, ThreadSleeper};

/// Bytes moved by one retrieval and the length the server announced, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: u64,
    pub declared_size: Option<u64>,
}

/// Read-only access to the remote file tree. One call, no retries.
pub trait FileServer {
    fn list_dir(&mut self, path: &RemotePath) -> Result<Vec<FileEntry>, GeoError>;
    fn retrieve(&mut self, path: &RemotePath, sink: &mut dyn Write) -> Result<Transfer, GeoError>;
    /// Exact size of a remote file, when the server reports one.
    fn stat(&mut self, _path: &RemotePath) -> Result<Option<u64>, GeoError> {
        Ok(None)
    }
    fn close(&mut self) -> Result<(), GeoError> {
        Ok(())
    }
}

/// An open file-tree session; closed when dropped, whatever the exit path.
pub struct FileSession<F: FileServer> {
    server: F,
    closed: bool,
}

impl<F: FileServer> FileSession<F> {
    pub fn open(server: F) -> Self {
        debug!("file session opened");
        Self {
            server,
            closed: false,
        }
    }

    pub fn server(&mut self) -> &mut F {
        &mut self.server
    }

    /// Closes explicitly, surfacing the close error instead of logging it.
    pub fn close(mut self) -> Result<(), GeoError> {
        self.closed = true;
        self.server.close()
    }
}

impl<F: FileServer> Drop for FileSession<F> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.server.close() {
            Ok(()) => debug!("file session closed"),
            Err(err) => warn!(error = %err, "failed to close file session"),
        }
    }
}

/// GEO file tree over HTTPS: index pages for listings, plain GETs for files.
pub struct HttpFileServer {
    client: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl HttpFileServer {
    pub fn new(config: &ClientConfig) -> Result<Self, GeoError> {
        Ok(Self {
            client: build_client(&config.user_agent(), config.timeout)?,
            base_url: config.file_server_url.clone(),
            limiter: RateLimiter::new(config.min_interval),
        })
    }

    pub fn connect(config: &ClientConfig) -> Result<FileSession<Self>, GeoError> {
        Ok(FileSession::open(Self::new(config)?))
    }

    fn url(&self, path: &RemotePath) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&mut self, method: Method, path: &RemotePath) -> Result<Response, GeoError> {
        self.limiter.acquire();
        let url = self.url(path);
        debug!(%method, %url, "file server request");
        let response = self
            .client
            .request(method, &url)
            .send()
            .map_err(classify_reqwest_error)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .ok()
                .filter(|body| !body.trim().is_empty())
                .unwrap_or_else(|| "file server request failed".to_string());
            return Err(GeoError::from_status(status, message, path.as_str()));
        }
        Ok(response)
    }
}

impl FileServer for HttpFileServer {
    fn list_dir(&mut self, path: &RemotePath) -> Result<Vec<FileEntry>, GeoError> {
        let dir = path.as_dir();
        let body = self
            .send(Method::GET, &dir)?
            .text()
            .map_err(classify_reqwest_error)?;
        Ok(parse_index(&body))
    }

    fn retrieve(&mut self, path: &RemotePath, sink: &mut dyn Write) -> Result<Transfer, GeoError> {
        let mut response = self.send(Method::GET, path)?;
        let declared_size = response.content_length();
        let bytes = copy_stream(&mut response, sink, |err| {
            GeoError::Transport(err.to_string())
        })?;
        Ok(Transfer {
            bytes,
            declared_size,
        })
    }

    /// `HEAD` request; the size is read from the header since a `HEAD`
    /// response has no body to measure.
    fn stat(&mut self, path: &RemotePath) -> Result<Option<u64>, GeoError> {
        let response = self.send(Method::HEAD, path)?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok()))
    }
}

fn anchor_regex() -> &'static Regex {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    ANCHOR.get_or_init(|| {
        Regex::new(r#"(?i)<a\s+href="([^"]+)"[^>]*>[^<]*</a>([^<\r\n]*)"#)
            .expect("index anchor regex")
    })
}

/// Extracts entries from an HTTP directory index page.
///
/// Parent, sort and absolute links are skipped, and so is any href that does
/// not name a direct child of the listed directory. Sizes are kept only when
/// the index prints an exact byte count.
pub fn parse_index(html: &str) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    for caps in anchor_regex().captures_iter(html) {
        let href = &caps[1];
        if href.starts_with('?')
            || href.starts_with('/')
            || href.contains("://")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(decoded) = urlencoding::decode(href) else {
            continue;
        };
        let is_directory = decoded.ends_with('/');
        let name = decoded.strip_suffix('/').unwrap_or(&*decoded);
        if !is_child_name(name) {
            debug!(href, "skipping index link outside the directory");
            continue;
        }
        let name = name.to_string();
        let size = if is_directory {
            None
        } else {
            caps.get(2)
                .and_then(|rest| rest.as_str().split_whitespace().last())
                .and_then(|token| token.parse::<u64>().ok())
        };
        entries.push(FileEntry {
            name,
            is_directory,
            size,
        });
    }
    entries
}

fn is_child_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

/// Post-listing selection of entries.
#[derive(Debug, Clone, Default)]
pub enum FileFilter {
    #[default]
    All,
    FilesOnly,
    Categories {
        categories: Vec<FileCategory>,
        accession: Accession,
    },
}

impl FileFilter {
    pub fn keeps(&self, entry: &FileEntry) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::FilesOnly => !entry.is_directory,
            FileFilter::Categories {
                categories,
                accession,
            } => {
                !entry.is_directory
                    && categories
                        .iter()
                        .any(|category| category.matches(&entry.name, accession))
            }
        }
    }
}

/// Lists remote directories through a session, retrying transient failures.
pub struct FileListing<S: Sleeper = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl FileListing {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl<S: Sleeper> FileListing<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// An empty directory is `Ok(vec![])`; a missing one is an error.
    pub fn list<F: FileServer>(
        &self,
        session: &mut FileSession<F>,
        path: &RemotePath,
        filter: &FileFilter,
    ) -> Result<Vec<FileEntry>, GeoError> {
        let server = session.server();
        let entries = retry::run(&self.policy, &self.sleeper, path.as_str(), |_| {
            server.list_dir(path)
        })?;
        let total = entries.len();
        let kept: Vec<FileEntry> = entries
            .into_iter()
            .filter(|entry| filter.keeps(entry))
            .collect();
        debug!(path = %path, total, kept = kept.len(), "listed directory");
        Ok(kept)
    }
}
