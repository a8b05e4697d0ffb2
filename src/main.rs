mod auth;
mod cdn;
mod checksum;
mod cli;
mod config;
mod error;
mod http;
mod manifest;
mod resource;
mod sync;
mod task;

use colored::Colorize;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::cli().await {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
