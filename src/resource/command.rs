use std::{io, path::Path};

use async_trait::async_trait;
use log::debug;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to start '{command}', {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with {status}")]
    Failed { command: String, status: String },
}

/// Runs external programs such as `git`, `npm` and `node`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` in `cwd` with its output going to the terminal.
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<(), CommandError>;
}

pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawns real processes, inheriting stdio.
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<(), CommandError> {
        let command = command_line(program, args);
        debug!("Running '{}' in {:?}", command, cwd);

        // npm is a batch script on Windows and needs the shell to resolve it.
        let mut process = if cfg!(windows) {
            let mut process = tokio::process::Command::new("cmd");
            process.arg("/C").arg(program);
            process
        } else {
            tokio::process::Command::new(program)
        };

        let status = process
            .args(args)
            .current_dir(cwd)
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(CommandError::Failed {
                command,
                status: status.to_string(),
            });
        }

        Ok(())
    }
}
