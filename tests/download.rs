use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use geodataset::domain::FileEntry;
use geodataset::download::{DownloadAction, DownloadManager, DownloadTask};
use geodataset::error::{ErrorKind, GeoError};
use geodataset::listing::{FileServer, FileSession, Transfer};
use geodataset::paths::RemotePath;
use geodataset::retry::{RetryPolicy, Sleeper};
use tempfile::tempdir;

#[derive(Clone, Default)]
struct RecordingSleeper(Rc<RefCell<Vec<Duration>>>);

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.0.borrow_mut().push(delay);
    }
}

#[derive(Default)]
struct FakeServer {
    files: HashMap<String, Vec<u8>>,
    /// Number of leading retrievals cut short per path.
    short_reads: HashMap<String, u32>,
    /// Answer size queries from the stored content.
    reports_sizes: bool,
    retrievals: Rc<Cell<u32>>,
    closed: Rc<Cell<bool>>,
}

impl FakeServer {
    fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.insert(path.to_string(), content.to_vec());
        self
    }
}

impl FileServer for FakeServer {
    fn list_dir(&mut self, _path: &RemotePath) -> Result<Vec<FileEntry>, GeoError> {
        Ok(Vec::new())
    }

    fn retrieve(&mut self, path: &RemotePath, sink: &mut dyn Write) -> Result<Transfer, GeoError> {
        self.retrievals.set(self.retrievals.get() + 1);
        let content = self
            .files
            .get(path.as_str())
            .ok_or_else(|| GeoError::NotFound(path.to_string()))?;
        let mut bytes = content.as_slice();
        if let Some(remaining) = self.short_reads.get_mut(path.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                bytes = &bytes[..bytes.len() / 2];
            }
        }
        sink.write_all(bytes)
            .map_err(|err| GeoError::Filesystem(err.to_string()))?;
        Ok(Transfer {
            bytes: bytes.len() as u64,
            declared_size: Some(content.len() as u64),
        })
    }

    fn stat(&mut self, path: &RemotePath) -> Result<Option<u64>, GeoError> {
        if !self.reports_sizes {
            return Ok(None);
        }
        Ok(self.files.get(path.as_str()).map(|content| content.len() as u64))
    }

    fn close(&mut self) -> Result<(), GeoError> {
        self.closed.set(true);
        Ok(())
    }
}

fn manager() -> (DownloadManager<RecordingSleeper>, RecordingSleeper) {
    let sleeper = RecordingSleeper::default();
    (
        DownloadManager::with_sleeper(RetryPolicy::default(), sleeper.clone()),
        sleeper,
    )
}

fn task(remote: &str, local: Utf8PathBuf, expected_size: Option<u64>) -> DownloadTask {
    DownloadTask {
        remote_path: RemotePath::new(remote),
        local_path: local,
        expected_size,
    }
}

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

const SOFT: &str = "/geo/series/GSE2nnn/GSE2034/soft/GSE2034_family.soft.gz";

#[test]
fn downloads_into_missing_parent_directories() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("nested/deeper/GSE2034_family.soft.gz"));
    let server = FakeServer::default().with_file(SOFT, b"soft payload");
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local.clone(), Some(12))])
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].action, DownloadAction::Downloaded);
    assert_eq!(outcomes[0].bytes, 12);
    assert_eq!(outcomes[0].attempts, 1);
    assert_eq!(std::fs::read(&local).unwrap(), b"soft payload");
}

#[test]
fn matching_local_file_is_skipped_without_transfer() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    std::fs::write(&local, b"soft payload").unwrap();
    let server = FakeServer::default().with_file(SOFT, b"soft payload");
    let retrievals = server.retrievals.clone();
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local, Some(12))])
        .unwrap();
    assert_eq!(outcomes[0].action, DownloadAction::Skipped);
    assert_eq!(outcomes[0].attempts, 0);
    assert_eq!(retrievals.get(), 0);
}

#[test]
fn local_file_of_other_size_is_replaced() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    std::fs::write(&local, b"stale").unwrap();
    let server = FakeServer::default().with_file(SOFT, b"soft payload");
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    manager
        .download(&mut session, &[task(SOFT, local.clone(), Some(12))])
        .unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), b"soft payload");
}

#[test]
fn unknown_size_is_always_downloaded() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    std::fs::write(&local, b"soft payload").unwrap();
    let server = FakeServer::default().with_file(SOFT, b"soft payload");
    let retrievals = server.retrievals.clone();
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local, None)])
        .unwrap();
    assert_eq!(outcomes[0].action, DownloadAction::Downloaded);
    assert_eq!(retrievals.get(), 1);
}

#[test]
fn unlisted_size_is_asked_of_the_server_before_skipping() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    std::fs::write(&local, b"soft payload").unwrap();
    let mut server = FakeServer::default().with_file(SOFT, b"soft payload");
    server.reports_sizes = true;
    let retrievals = server.retrievals.clone();
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local, None)])
        .unwrap();
    assert_eq!(outcomes[0].action, DownloadAction::Skipped);
    assert_eq!(outcomes[0].bytes, 12);
    assert_eq!(retrievals.get(), 0);
}

#[test]
fn unlisted_size_still_replaces_a_stale_copy() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    std::fs::write(&local, b"stale").unwrap();
    let mut server = FakeServer::default().with_file(SOFT, b"soft payload");
    server.reports_sizes = true;
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local.clone(), None)])
        .unwrap();
    assert_eq!(outcomes[0].action, DownloadAction::Downloaded);
    assert_eq!(std::fs::read(&local).unwrap(), b"soft payload");
}

#[test]
fn short_transfer_is_retried_until_complete() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    let mut server = FakeServer::default().with_file(SOFT, b"soft payload");
    server.short_reads.insert(SOFT.to_string(), 1);
    let mut session = FileSession::open(server);
    let (manager, sleeper) = manager();

    let outcomes = manager
        .download(&mut session, &[task(SOFT, local.clone(), Some(12))])
        .unwrap();
    assert_eq!(outcomes[0].attempts, 2);
    assert_eq!(*sleeper.0.borrow(), vec![Duration::from_secs(1)]);
    assert_eq!(std::fs::read(&local).unwrap(), b"soft payload");
}

#[test]
fn persistent_short_transfer_leaves_no_file() {
    let dir = tempdir().unwrap();
    let local = utf8(dir.path().join("GSE2034_family.soft.gz"));
    let mut server = FakeServer::default().with_file(SOFT, b"soft payload");
    server.short_reads.insert(SOFT.to_string(), u32::MAX);
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let err = manager
        .download(&mut session, &[task(SOFT, local.clone(), Some(12))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
    match err {
        GeoError::RetriesExhausted { last, .. } => {
            assert_matches!(*last, GeoError::SizeMismatch { expected: 12, actual: 6, .. });
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!local.exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[test]
fn first_failure_stops_the_batch() {
    let dir = tempdir().unwrap();
    let server = FakeServer::default().with_file(SOFT, b"soft payload");
    let retrievals = server.retrievals.clone();
    let mut session = FileSession::open(server);
    let (manager, _) = manager();

    let tasks = [
        task("/geo/missing.txt", utf8(dir.path().join("missing.txt")), None),
        task(SOFT, utf8(dir.path().join("soft.gz")), None),
    ];
    let err = manager.download(&mut session, &tasks).unwrap_err();
    assert_matches!(err, GeoError::NotFound(_));
    assert_eq!(retrievals.get(), 1);
}

#[test]
fn session_closes_on_drop_after_failure() {
    let dir = tempdir().unwrap();
    let server = FakeServer::default();
    let closed = server.closed.clone();
    {
        let mut session = FileSession::open(server);
        let (manager, _) = manager();
        let result = manager.download(
            &mut session,
            &[task("/geo/nope", utf8(dir.path().join("nope")), None)],
        );
        assert!(result.is_err());
        assert!(!closed.get());
    }
    assert!(closed.get());
}

#[test]
fn explicit_close_reports_once() {
    let server = FakeServer::default();
    let closed = server.closed.clone();
    let session = FileSession::open(server);
    session.close().unwrap();
    assert!(closed.get());
}
