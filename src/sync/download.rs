use std::{
    io,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
};

use log::{debug, warn};

use super::{is_contained, FileEntry, SyncCounters, SyncPlan};
use crate::{
    error::FetchError,
    http::{Headers, HttpClient},
    task::TaskManager,
};

/// Server files that must be executable on Unix.
pub const EXECUTABLE_FILES: [&str; 2] = ["altv-server", "start.sh"];

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to write {}, {source}", .filepath.display())]
    Write {
        filepath: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Refusing to write outside of the server directory")]
    UnsafePath,

    #[error("Download task failed, {0}")]
    TaskJoinFailure(#[from] tokio::task::JoinError),
}

/// What happened to each planned file.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<(String, DownloadError)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes planned files below a root directory.
pub struct Downloader {
    client: Arc<dyn HttpClient>,
    root: PathBuf,
    headers: Headers,
    max_workers: Option<usize>,
    counters: Arc<SyncCounters>,
}

impl Downloader {
    pub fn new(client: Arc<dyn HttpClient>, root: PathBuf, headers: Headers) -> Self {
        Self {
            client,
            root,
            headers,
            max_workers: None,
            counters: Arc::new(SyncCounters::default()),
        }
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_counters(mut self, counters: Arc<SyncCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Downloads every planned file concurrently.
    ///
    /// A failed file is recorded in the report and never stops the others.
    pub async fn download_all(&self, plan: &SyncPlan) -> DownloadReport {
        let mut downloads = TaskManager::new()
            .with_max_workers(self.max_workers)
            .with_task_capacity(plan.len());

        let paths: Vec<String> = plan.entries().map(|entry| entry.path.clone()).collect();
        for entry in plan.entries() {
            let client = self.client.clone();
            let root = self.root.clone();
            let headers = self.headers.clone();
            let counters = self.counters.clone();
            let entry = entry.clone();

            downloads.spawn(async move {
                let result = download_file(client.as_ref(), &root, &entry, &headers).await;
                match &result {
                    Ok(()) => counters.downloaded.fetch_add(1, Ordering::Relaxed),
                    Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
                };
                result
            });
        }

        debug!("Downloading {} files", downloads.len());
        let mut report = DownloadReport::default();
        for (path, result) in paths.into_iter().zip(downloads.join_settled().await) {
            match result {
                Ok(()) => report.downloaded.push(path),
                Err(err) => {
                    warn!("Failed to download {}: {}", path, err);
                    report.failed.push((path, err));
                }
            }
        }

        report
    }
}

/// Fetches one file and writes it under `root`, creating parent directories.
pub async fn download_file(
    client: &dyn HttpClient,
    root: &Path,
    entry: &FileEntry,
    headers: &Headers,
) -> Result<(), DownloadError> {
    if !is_contained(&entry.path) {
        return Err(DownloadError::UnsafePath);
    }

    let body = client.get(&entry.url, headers).await?;
    let filepath = root.join(&entry.path);
    let write_error = |source| DownloadError::Write {
        filepath: filepath.clone(),
        source,
    };

    if let Some(parent) = filepath.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }

    tokio::fs::write(&filepath, &body).await.map_err(write_error)?;
    debug!("Wrote {} bytes to {:?}", body.len(), filepath);
    Ok(())
}

/// Sets the executable bit on the server binaries present in `root`.
#[cfg(unix)]
pub async fn mark_executables(root: &Path) -> io::Result<Vec<PathBuf>> {
    use std::os::unix::fs::PermissionsExt;

    let mut marked = Vec::new();
    for filename in EXECUTABLE_FILES {
        let filepath = root.join(filename);
        if !filepath.is_file() {
            continue;
        }

        let mut permissions = tokio::fs::metadata(&filepath).await?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        tokio::fs::set_permissions(&filepath, permissions).await?;
        marked.push(filepath);
    }

    Ok(marked)
}

#[cfg(not(unix))]
pub async fn mark_executables(_root: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(Vec::new())
}
