use std::collections::HashSet;
use std::path::PathBuf;

use camino::Utf8Path;
use serde::Serialize;
use tracing::debug;

use crate::domain::{Accession, FileCategory, RecordType, default_series_categories};
use crate::download::{DownloadManager, DownloadOutcome, DownloadTask};
use crate::error::GeoError;
use crate::extract::{ArchiveExtractor, is_archive};
use crate::listing::{FileFilter, FileListing, FileServer, FileSession};
use crate::paths::{RemotePath, RemotePathResolver};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    /// Empty means the record type's default set.
    pub categories: Vec<FileCategory>,
    pub extract: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDownload {
    pub accession: String,
    pub remote_dir: RemotePath,
    pub files: Vec<DownloadOutcome>,
    pub extracted: Vec<PathBuf>,
}

/// Accession → remote directory → listing → download → extraction.
pub struct GeoDownloader<S: Sleeper + Clone = ThreadSleeper> {
    resolver: RemotePathResolver,
    listing: FileListing<S>,
    downloads: DownloadManager<S>,
}

impl GeoDownloader {
    pub fn new(resolver: RemotePathResolver, policy: RetryPolicy) -> Self {
        Self::with_sleeper(resolver, policy, ThreadSleeper)
    }
}

impl<S: Sleeper + Clone> GeoDownloader<S> {
    pub fn with_sleeper(resolver: RemotePathResolver, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            resolver,
            listing: FileListing::with_sleeper(policy.clone(), sleeper.clone()),
            downloads: DownloadManager::with_sleeper(policy, sleeper),
        }
    }

    pub fn resolver(&self) -> &RemotePathResolver {
        &self.resolver
    }

    pub fn listing(&self) -> &FileListing<S> {
        &self.listing
    }

    pub fn downloads(&self) -> &DownloadManager<S> {
        &self.downloads
    }

    /// The record directory itself must exist; category sub-directories the
    /// record does not have are skipped.
    pub fn download_record<F: FileServer>(
        &self,
        session: &mut FileSession<F>,
        accession: &Accession,
        local_dir: &Utf8Path,
        request: &DownloadRequest,
    ) -> Result<RecordDownload, GeoError> {
        let record_dir = self.resolver.record_dir(accession);
        let present: HashSet<String> = self
            .listing
            .list(session, &record_dir, &FileFilter::All)?
            .into_iter()
            .filter(|entry| entry.is_directory)
            .map(|entry| entry.name)
            .collect();

        let mut tasks = Vec::new();
        for category in requested_categories(accession.record_type(), &request.categories) {
            if !present.contains(category.subdir()) {
                debug!(%accession, subdir = category.subdir(), "record has no such directory");
                continue;
            }
            let dir = record_dir.join_dir(category.subdir());
            let filter = category_filter(category, accession);
            for entry in self.listing.list(session, &dir, &filter)? {
                tasks.push(DownloadTask {
                    remote_path: dir.join_file(&entry.name),
                    local_path: local_dir.join(&entry.name),
                    expected_size: entry.size,
                });
            }
        }

        let files = self.downloads.download(session, &tasks)?;

        let mut extracted = Vec::new();
        if request.extract {
            for outcome in &files {
                let path = outcome.local_path.as_std_path();
                if is_archive(path) {
                    extracted.extend(ArchiveExtractor::extract(path, local_dir.as_std_path())?);
                }
            }
        }

        Ok(RecordDownload {
            accession: accession.to_string(),
            remote_dir: record_dir,
            files,
            extracted,
        })
    }
}

fn requested_categories(record_type: RecordType, requested: &[FileCategory]) -> Vec<FileCategory> {
    let categories = if !requested.is_empty() {
        requested.to_vec()
    } else {
        match record_type {
            RecordType::Series => default_series_categories(),
            other => vec![other.supplementary_category()],
        }
    };
    let mut seen = HashSet::new();
    categories
        .into_iter()
        .filter(|category| seen.insert(*category))
        .collect()
}

/// Supplementary directories are taken whole; the structured formats are
/// matched against the accession.
fn category_filter(category: FileCategory, accession: &Accession) -> FileFilter {
    match category {
        FileCategory::Suppl => FileFilter::FilesOnly,
        other => FileFilter::Categories {
            categories: vec![other],
            accession: accession.clone(),
        },
    }
}
