//! Planning which CDN files need to be downloaded.
//!
//! Every manifest is fetched concurrently, each listed file is hashed locally
//! and compared with its manifest digest. If any manifest cannot be fetched
//! the local state cannot be proven consistent and the whole file index is
//! scheduled for download instead.
pub mod download;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};

use crate::{
    checksum::local_digest,
    config::{ModuleFlags, OptionalModule},
    http::{Headers, HttpClient},
    manifest::{fetch_manifest, ManifestError},
    task::TaskManager,
};

/// Canonical relative path to download URL, for every file of the run.
pub type FileIndex = BTreeMap<String, String>;

/// Files moved by the pre-1.0 installer, CDN path to local path.
pub const LEGACY_LAYOUT: [(&str, &str); 4] = [
    ("modules/js-module/js-module.dll", "modules/js-module.dll"),
    ("modules/js-module/libjs-module.so", "modules/libjs-module.so"),
    ("modules/js-module/libnode.dll", "libnode.dll"),
    ("modules/js-module/libnode.so.72", "libnode.so.72"),
];

/// The C# host configuration, users edit it so it is never overwritten.
pub const CSHARP_RUNTIME_CONFIG: &str = "modules/csharp-module/AltV.Net.Host.runtimeconfig.json";

/// Files left behind by older module layouts, removed before syncing.
pub const LEGACY_FILES: [&str; 4] = [
    "AltV.Net.Host.runtimeconfig.json",
    "AltV.Net.Host.dll",
    "modules/csharp-module.dll",
    "modules/libcsharp-module.so",
];

/// Directories every server root needs.
pub const ROOT_DIRECTORIES: [&str; 2] = ["data", "modules"];

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Path remap target '{0}' is also remapped, remapping must be idempotent")]
    RemapChain(String),
}

/// Maps CDN paths to the paths they are stored at locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRemap {
    table: BTreeMap<String, String>,
}

impl PathRemap {
    pub fn new<I, S>(pairs: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let table: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .filter(|(from, to)| from != to)
            .collect();

        if let Some(target) = table.values().find(|to| table.contains_key(to.as_str())) {
            return Err(SyncError::RemapChain(target.clone()));
        }

        Ok(Self { table })
    }

    /// The pre-1.0 JS module layout.
    pub fn legacy() -> Result<Self, SyncError> {
        Self::new(LEGACY_LAYOUT)
    }

    /// Returns the local path for a CDN path.
    pub fn apply(&self, path: &str) -> String {
        self.table
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.to_string())
    }
}

/// Keeps a local file out of verification and download.
///
/// The file is preserved when it already exists locally or when the module it
/// belongs to is not enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationRule {
    pub path: String,
    pub module: OptionalModule,
}

impl PreservationRule {
    pub fn applies(&self, root: &Path, modules: &ModuleFlags) -> bool {
        root.join(&self.path).exists() || !modules.is_enabled(self.module)
    }
}

/// The lookup tables the planner consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRules {
    pub remap: PathRemap,
    pub preserved: Vec<PreservationRule>,
}

impl Default for SyncRules {
    fn default() -> Self {
        Self::new(PathRemap::default())
    }
}

impl SyncRules {
    pub fn new(remap: PathRemap) -> Self {
        Self {
            remap,
            preserved: vec![PreservationRule {
                path: CSHARP_RUNTIME_CONFIG.to_string(),
                module: OptionalModule::CSharp,
            }],
        }
    }

    /// The paths excluded from this run.
    pub fn preserved_paths(&self, root: &Path, modules: &ModuleFlags) -> BTreeSet<String> {
        self.preserved
            .iter()
            .filter(|rule| rule.applies(root, modules))
            .map(|rule| rule.path.clone())
            .collect()
    }
}

/// A file scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub url: String,
    /// The manifest digest, absent when the entry comes from a full resync.
    pub expected_digest: Option<String>,
}

/// The files to download, keyed by local path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    entries: BTreeMap<String, FileEntry>,
}

impl SyncPlan {
    /// Adds an entry, replacing any earlier entry for the same path.
    pub fn insert(&mut self, entry: FileEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    #[cfg(test)]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    #[cfg(test)]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    /// Every file of the index, without digests.
    pub fn full(file_index: &FileIndex, excluded: &BTreeSet<String>) -> Self {
        let mut plan = SyncPlan::default();
        for (path, url) in file_index {
            if excluded.contains(path) {
                continue;
            }

            plan.insert(FileEntry {
                path: path.clone(),
                url: url.clone(),
                expected_digest: None,
            });
        }

        plan
    }
}

/// Outcome of comparing one manifest entry with the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStatus {
    Fresh,
    Stale,
    Preserved,
    Unindexed,
}

impl HashStatus {
    pub fn symbol(&self) -> &str {
        match self {
            HashStatus::Fresh => "✓",
            HashStatus::Stale => "x",
            HashStatus::Preserved => "=",
            HashStatus::Unindexed => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCheck {
    pub path: String,
    pub status: HashStatus,
}

/// Counters shared between the planner, the downloader and the progress display.
#[derive(Debug, Default)]
pub struct SyncCounters {
    pub checked: AtomicUsize,
    pub stale: AtomicUsize,
    pub planned: AtomicUsize,
    pub downloaded: AtomicUsize,
    pub failed: AtomicUsize,
}

impl SyncCounters {
    pub fn load(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

/// The result of a planning pass.
#[derive(Debug)]
pub struct PlanOutcome {
    pub plan: SyncPlan,
    pub checks: Vec<HashCheck>,
    /// The manifest failure that forced a full resync.
    pub degraded: Option<ManifestError>,
}

/// Builds sync plans for one root directory.
pub struct SyncPlanner {
    client: Arc<dyn HttpClient>,
    root: PathBuf,
    headers: Headers,
    modules: ModuleFlags,
    rules: SyncRules,
    counters: Arc<SyncCounters>,
}

impl SyncPlanner {
    pub fn new(
        client: Arc<dyn HttpClient>,
        root: PathBuf,
        headers: Headers,
        modules: ModuleFlags,
        rules: SyncRules,
    ) -> Self {
        Self {
            client,
            root,
            headers,
            modules,
            rules,
            counters: Arc::new(SyncCounters::default()),
        }
    }

    pub fn with_counters(mut self, counters: Arc<SyncCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Plans the download of every file whose local digest differs from its manifest.
    ///
    /// Manifests are applied in the order of `manifest_urls`, so a later manifest
    /// wins when two list the same path.
    pub async fn plan(&self, manifest_urls: &[String], file_index: &FileIndex) -> PlanOutcome {
        let excluded = self.rules.preserved_paths(&self.root, &self.modules);
        debug!("Preserved paths: {:?}", excluded);

        let mut fetches = TaskManager::new().with_task_capacity(manifest_urls.len());
        for url in manifest_urls {
            let client = self.client.clone();
            let headers = self.headers.clone();
            let url = url.clone();
            fetches.spawn(async move { fetch_manifest(client.as_ref(), &url, &headers).await });
        }

        let manifests = match fetches.join_all().await {
            Ok(manifests) => manifests,
            Err(err) => {
                warn!("Manifest check failed, scheduling every file: {}", err);
                let plan = SyncPlan::full(file_index, &excluded);
                self.counters.planned.store(plan.len(), Ordering::Relaxed);
                return PlanOutcome {
                    plan,
                    checks: Vec::new(),
                    degraded: Some(err),
                };
            }
        };

        let mut plan = SyncPlan::default();
        let mut checks = Vec::new();
        for manifest in manifests {
            debug!("Checking {} files from {}", manifest.hash_list.len(), manifest.url);
            for (path, expected) in &manifest.hash_list {
                let path = self.rules.remap.apply(path);
                let status = self
                    .check(&path, expected, file_index, &excluded, &mut plan)
                    .await;

                self.counters.checked.fetch_add(1, Ordering::Relaxed);
                if status == HashStatus::Stale {
                    self.counters.stale.fetch_add(1, Ordering::Relaxed);
                }

                checks.push(HashCheck { path, status });
            }
        }

        info!("{} of {} files need downloading", plan.len(), checks.len());
        self.counters.planned.store(plan.len(), Ordering::Relaxed);
        PlanOutcome {
            plan,
            checks,
            degraded: None,
        }
    }

    async fn check(
        &self,
        path: &str,
        expected: &str,
        file_index: &FileIndex,
        excluded: &BTreeSet<String>,
        plan: &mut SyncPlan,
    ) -> HashStatus {
        if excluded.contains(path) {
            return HashStatus::Preserved;
        }

        let digest = local_digest(&self.root.join(path)).await;
        if digest.matches(expected) {
            return HashStatus::Fresh;
        }
        debug!("{} has digest {}, expected {}", path, digest, expected);

        match file_index.get(path) {
            Some(url) => {
                plan.insert(FileEntry {
                    path: path.to_string(),
                    url: url.clone(),
                    expected_digest: Some(expected.to_string()),
                });
                HashStatus::Stale
            }
            None => {
                warn!("{} is listed in a manifest but has no download source", path);
                HashStatus::Unindexed
            }
        }
    }
}

/// Removes files left behind by older module layouts.
pub async fn remove_legacy_files(root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for filename in LEGACY_FILES {
        let filepath = root.join(filename);
        if !filepath.is_file() {
            continue;
        }

        match tokio::fs::remove_file(&filepath).await {
            Ok(()) => removed.push(filepath),
            Err(err) => warn!("Failed to remove {:?}, {}", filepath, err),
        }
    }

    removed
}

/// Creates the directories a server root needs.
pub async fn prepare_root(root: &Path) -> std::io::Result<()> {
    for dirname in ROOT_DIRECTORIES {
        tokio::fs::create_dir_all(root.join(dirname)).await?;
    }

    Ok(())
}

/// True for relative paths that stay inside the directory they are joined to.
pub fn is_contained(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
