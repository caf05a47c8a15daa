use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::GeoError;
use crate::fs_util::create_dir;
use crate::listing::{FileServer, FileSession};
use crate::paths::RemotePath;
use crate::retry::{self, RetryPolicy, Sleeper, ThreadSleeper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub remote_path: RemotePath,
    pub local_path: Utf8PathBuf,
    pub expected_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Downloaded,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub remote_path: RemotePath,
    pub local_path: Utf8PathBuf,
    pub bytes: u64,
    pub action: DownloadAction,
    /// Transfer attempts made; zero when skipped.
    pub attempts: u32,
    pub finished_at: String,
}

/// Sequential, verified file transfers over an open session.
pub struct DownloadManager<S: Sleeper = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl DownloadManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl<S: Sleeper> DownloadManager<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Processes `tasks` in order and stops at the first failure.
    ///
    /// Tasks without a listed size ask the server for it first, so a re-run
    /// can skip complete local copies.
    pub fn download<F: FileServer>(
        &self,
        session: &mut FileSession<F>,
        tasks: &[DownloadTask],
    ) -> Result<Vec<DownloadOutcome>, GeoError> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(self.download_one(session, task)?);
        }
        Ok(outcomes)
    }

    fn download_one<F: FileServer>(
        &self,
        session: &mut FileSession<F>,
        task: &DownloadTask,
    ) -> Result<DownloadOutcome, GeoError> {
        let expected_size = match task.expected_size {
            Some(size) => Some(size),
            None => retry::run(
                &self.policy,
                &self.sleeper,
                task.remote_path.as_str(),
                |_| session.server().stat(&task.remote_path),
            )?,
        };
        if let Some(bytes) = already_present(&task.local_path, expected_size)? {
            debug!(path = %task.local_path, bytes, "local file matches, skipping");
            return Ok(DownloadOutcome {
                remote_path: task.remote_path.clone(),
                local_path: task.local_path.clone(),
                bytes,
                action: DownloadAction::Skipped,
                attempts: 0,
                finished_at: now(),
            });
        }

        let parent = parent_dir(&task.local_path);
        create_dir(parent.as_std_path())?;

        let server = session.server();
        let mut attempts = 0;
        let bytes = retry::run(
            &self.policy,
            &self.sleeper,
            task.remote_path.as_str(),
            |attempt| {
                attempts = attempt;
                transfer_once(server, task, expected_size, parent)
            },
        )?;
        info!(
            remote = %task.remote_path,
            local = %task.local_path,
            bytes,
            attempts,
            "downloaded"
        );
        Ok(DownloadOutcome {
            remote_path: task.remote_path.clone(),
            local_path: task.local_path.clone(),
            bytes,
            action: DownloadAction::Downloaded,
            attempts,
            finished_at: now(),
        })
    }
}

/// Size of the local copy when it is known to be complete.
fn already_present(local_path: &Utf8Path, expected: Option<u64>) -> Result<Option<u64>, GeoError> {
    let Some(expected) = expected else {
        return Ok(None);
    };
    match fs::metadata(local_path.as_std_path()) {
        Ok(meta) if meta.is_file() && meta.len() == expected => Ok(Some(expected)),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(GeoError::Filesystem(format!("stat {local_path}: {err}"))),
    }
}

/// One full transfer into a temp file next to the target, persisted only
/// once the byte count checks out.
fn transfer_once<F: FileServer>(
    server: &mut F,
    task: &DownloadTask,
    expected_size: Option<u64>,
    parent: &Utf8Path,
) -> Result<u64, GeoError> {
    let mut temp = tempfile::Builder::new()
        .prefix(".geodataset-")
        .suffix(".part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| GeoError::Filesystem(err.to_string()))?;
    let transfer = server.retrieve(&task.remote_path, &mut temp)?;
    if let Some(expected) = expected_size.or(transfer.declared_size) {
        if transfer.bytes != expected {
            return Err(GeoError::SizeMismatch {
                path: task.remote_path.to_string(),
                expected,
                actual: transfer.bytes,
            });
        }
    }
    temp.persist(task.local_path.as_std_path())
        .map_err(|err| GeoError::Filesystem(err.to_string()))?;
    Ok(transfer.bytes)
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
