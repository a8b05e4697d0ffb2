//! Download command implementation.
//!
//! Resolves the configuration, authorizes QA branches, verifies local files
//! against the CDN manifests and downloads whatever is missing or outdated.
use std::{io, path::PathBuf, sync::Arc, time::Duration};

use colored::Colorize;
use log::{info, warn};

use crate::{
    auth::{self, AuthError, DiscordIpc, QA_AUTH_URL},
    cdn::{build_file_index, manifest_sources, CdnLayout},
    config::{load_runtime_config, Config, ConfigError, Platform},
    error::FetchError,
    http::{Headers, HttpClient, ReqwestClient},
    manifest::ManifestError,
    sync::{
        download::{mark_executables, Downloader},
        prepare_root, remove_legacy_files, HashCheck, HashStatus, PathRemap, SyncCounters,
        SyncError, SyncPlanner, SyncRules,
    },
};

use super::{
    common::{
        display::{self, DisplayCounters, DisplayError, DisplayManager, DisplayMessage},
        GlobalFlags,
    },
    DownloadArgs,
};

#[derive(Debug, thiserror::Error)]
pub enum DownloadCommandError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Client(FetchError),

    #[error("{0}")]
    Rules(#[from] SyncError),

    #[error("Failed to prepare {}, {source}", .root.display())]
    Prepare {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to fetch the file lists, {0}")]
    FileIndex(#[from] ManifestError),

    #[error("{0}")]
    Display(#[from] DisplayError),
}

/// Progress of the hash check.
struct CheckProgress(Arc<SyncCounters>);

impl DisplayCounters for CheckProgress {
    fn current(&self) -> usize {
        SyncCounters::load(&self.0.checked)
    }

    fn total(&self) -> Option<usize> {
        None
    }
}

/// Progress of the downloads.
struct DownloadProgress(Arc<SyncCounters>);

impl DisplayCounters for DownloadProgress {
    fn current(&self) -> usize {
        SyncCounters::load(&self.0.downloaded) + SyncCounters::load(&self.0.failed)
    }

    fn total(&self) -> Option<usize> {
        Some(SyncCounters::load(&self.0.planned))
    }
}

fn check_message(
    message: DisplayMessage<HashCheck, CheckProgress>,
    verbosity: u8,
) -> Option<String> {
    match message {
        DisplayMessage::Result(check) => {
            let symbol = check.status.symbol();
            match check.status {
                HashStatus::Stale => Some(format!(
                    "{} {}",
                    symbol.bright_red(),
                    check.path.bright_white()
                )),
                HashStatus::Fresh if verbosity >= 1 => {
                    Some(format!("{} {}", symbol.bright_cyan(), check.path.bright_white()))
                }
                HashStatus::Preserved if verbosity >= 1 => {
                    Some(format!("{} {}", symbol.dimmed(), check.path.dimmed()))
                }
                HashStatus::Unindexed if verbosity >= 1 => {
                    Some(format!("{} {}", symbol.yellow(), check.path.yellow()))
                }
                _ => None,
            }
        }
        DisplayMessage::Progress {
            counters, current, ..
        } => Some(
            format!(
                "{} checked, {} outdated",
                current,
                SyncCounters::load(&counters.0.stale)
            )
            .dimmed()
            .to_string(),
        ),
        DisplayMessage::Exit => None,
    }
}

/// A finished download, `Err` holds the failure message.
struct DownloadLine {
    path: String,
    result: Result<(), String>,
}

fn download_message(
    message: DisplayMessage<DownloadLine, DownloadProgress>,
    verbosity: u8,
) -> Option<String> {
    match message {
        DisplayMessage::Result(DownloadLine { path, result }) => match result {
            Ok(()) if verbosity >= 1 => Some(path.bright_white().to_string()),
            Ok(()) => None,
            Err(reason) => Some(format!(
                "{} {} {}",
                "x".bright_red(),
                path.bright_white(),
                format!("({})", reason).dimmed()
            )),
        },
        DisplayMessage::Progress {
            current, total, ..
        } => {
            let mut line = format!("[{}/{}] downloaded", current, total.unwrap_or(0));
            if verbosity >= 1 {
                line.push_str(" ...");
            }
            Some(line.dimmed().to_string())
        }
        DisplayMessage::Exit => None,
    }
}

fn progress_refresh(flags: &GlobalFlags) -> Option<u64> {
    flags
        .show_progress()
        .then_some(display::PROGRESS_REFRESH_MILLIS)
}

pub async fn download(
    root: PathBuf,
    args: DownloadArgs,
    flags: GlobalFlags,
) -> Result<(), DownloadCommandError> {
    let runtime = load_runtime_config(&root);
    let config = Config::resolve(root, &args.tokens, args.platform, &runtime)?;

    display::header("altv-pkg");
    display::field("System", config.platform);
    display::field("Branch", &config.branch);
    if config.default_branch {
        display::warning("Branch not specified, using release");
    }

    let client: Arc<dyn HttpClient> = Arc::new(
        ReqwestClient::with_timeout(Duration::from_secs(args.timeout))
            .map_err(DownloadCommandError::Client)?,
    );

    let headers = if config.branch.requires_authorization() {
        display::header("Authorizing via Discord");
        auth::authorize(&DiscordIpc::default(), client.as_ref(), QA_AUTH_URL).await?
    } else {
        Headers::new()
    };

    for filepath in remove_legacy_files(&config.root).await {
        info!("Removed legacy file {:?}", filepath);
    }
    prepare_root(&config.root)
        .await
        .map_err(|source| DownloadCommandError::Prepare {
            root: config.root.clone(),
            source,
        })?;

    let remap = if args.legacy_layout {
        PathRemap::legacy()?
    } else {
        PathRemap::default()
    };
    let sources = manifest_sources(&CdnLayout::new(&args.cdn_host), &config);
    let resolved = build_file_index(client.clone(), &sources, &headers, &remap).await?;

    display::header("Checking file hashes");
    let counters = Arc::new(SyncCounters::default());
    let mut check_display =
        DisplayManager::new(Arc::new(CheckProgress(counters.clone())), check_message)
            .with_verbosity(flags.verbosity)
            .with_progress(progress_refresh(&flags))
            .with_disabled(!flags.show_display());
    check_display.start();

    let outcome = SyncPlanner::new(
        client.clone(),
        config.root.clone(),
        headers.clone(),
        config.modules,
        SyncRules::new(remap),
    )
    .with_counters(counters.clone())
    .plan(&resolved.manifest_urls, &resolved.file_index)
    .await;

    for check in outcome.checks {
        check_display.report_result(check).await?;
    }
    check_display.stop().await?;

    match &outcome.degraded {
        Some(err) => {
            warn!("{}", err);
            display::danger("File hash check corrupted -> download all");
        }
        None => display::header("File hash check complete"),
    }

    if !outcome.plan.is_empty() {
        display::header("Downloading");
        let mut download_display =
            DisplayManager::new(Arc::new(DownloadProgress(counters.clone())), download_message)
                .with_verbosity(flags.verbosity)
                .with_progress(progress_refresh(&flags))
                .with_disabled(!flags.show_display());
        download_display.start();

        let report = Downloader::new(client.clone(), config.root.clone(), headers)
            .with_max_workers(args.max_workers)
            .with_counters(counters.clone())
            .download_all(&outcome.plan)
            .await;

        let complete = report.is_complete();
        let failures = report.failed.len();
        for path in report.downloaded {
            download_display
                .report_result(DownloadLine { path, result: Ok(()) })
                .await?;
        }
        for (path, err) in report.failed {
            download_display
                .report_result(DownloadLine {
                    path,
                    result: Err(err.to_string()),
                })
                .await?;
        }
        download_display.stop().await?;

        if !complete {
            display::warning(&format!(
                "{} of {} files failed to download, run the command again to retry",
                failures,
                outcome.plan.len()
            ));
        }
    }

    if config.platform == Platform::Linux {
        match mark_executables(&config.root).await {
            Ok(marked) => {
                for filepath in marked {
                    info!("Marked {:?} as executable", filepath);
                }
            }
            Err(err) => warn!("Failed to mark server files as executable, {}", err),
        }
    }

    display::header("Complete");
    match config.platform {
        Platform::Linux => display::note("Use: './start.sh' to start your server!"),
        Platform::Windows => display::note(
            "Use: 'altv-server.exe' to start your server! Powershell: './altv-server.exe'",
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(path: &str, status: HashStatus) -> DisplayMessage<HashCheck, CheckProgress> {
        DisplayMessage::Result(HashCheck {
            path: path.to_string(),
            status,
        })
    }

    #[test]
    fn stale_files_are_always_shown() {
        colored::control::set_override(false);
        assert_eq!(
            check_message(check("altv-server", HashStatus::Stale), 0).as_deref(),
            Some("x altv-server")
        );
        assert_eq!(check_message(check("altv-server", HashStatus::Fresh), 0), None);
        assert_eq!(
            check_message(check("altv-server", HashStatus::Fresh), 1).as_deref(),
            Some("✓ altv-server")
        );
    }

    #[test]
    fn failed_downloads_are_always_shown() {
        colored::control::set_override(false);
        let failed = DisplayMessage::Result(DownloadLine {
            path: "data/vehmodels.bin".to_string(),
            result: Err("HTTP 500".to_string()),
        });
        assert_eq!(
            download_message(failed, 0).as_deref(),
            Some("x data/vehmodels.bin (HTTP 500)")
        );

        let done = DisplayMessage::Result(DownloadLine {
            path: "data/vehmodels.bin".to_string(),
            result: Ok(()),
        });
        assert_eq!(download_message(done, 0), None);
    }

    #[test]
    fn download_progress_counts_failures() {
        let counters = Arc::new(SyncCounters::default());
        counters.planned.store(5, std::sync::atomic::Ordering::Relaxed);
        counters.downloaded.store(3, std::sync::atomic::Ordering::Relaxed);
        counters.failed.store(1, std::sync::atomic::Ordering::Relaxed);

        let progress = DownloadProgress(counters);
        assert_eq!(progress.current(), 4);
        assert_eq!(progress.total(), Some(5));
    }
}
