use std::{path::PathBuf, time::Duration};

use crate::{
    http::{ReqwestClient, DEFAULT_TIMEOUT_SECS},
    resource::{
        command::ProcessRunner, prompt::TerminalPrompt, Installer, RepositoryName, ResourceError,
    },
};

use super::common::display;

pub async fn install(root: PathBuf, repository: &str) -> anyhow::Result<()> {
    let repository: RepositoryName = repository.parse()?;
    let client = ReqwestClient::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?;

    display::header(&format!("Installing {}", repository));
    let prompt = TerminalPrompt::new();
    let report = Installer::new(&client, &prompt, &ProcessRunner, root)
        .install(&repository)
        .await
        .map_err(|err| {
            if matches!(err, ResourceError::Command(_)) {
                display::danger("Make sure 'git', 'node' and 'npm' are installed and on your PATH.");
            }
            err
        })?;

    for package in &report.added_packages {
        display::note(&format!("Added NPM Package {}", package));
    }
    if !report.post_install_scripts.is_empty() && !report.post_install_ran {
        display::warning("Skipped post install scripts.");
    }

    display::header(&format!(
        "Add '{}' to your 'server.cfg' file in your 'resources' section. Goodbye!",
        repository.name
    ));
    Ok(())
}
