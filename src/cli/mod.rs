mod common;
mod download;
mod install;
mod remove;

use std::env::current_dir;

use clap::Parser;
use log::debug;
use simplelog::{ColorChoice, SharedLogger, TerminalMode};

use crate::{cdn::DEFAULT_CDN_HOST, config::Platform, http::DEFAULT_TIMEOUT_SECS};

use self::common::GlobalFlags;

#[derive(Debug, clap::Parser)]
#[command(name = "altv-pkg", version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Option<Commands>,
    // Used when no subcommand is given.
    #[command(flatten)]
    pub download: DownloadArgs,
    #[command(flatten)]
    pub flags: GlobalFlags,
}

#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Install a resource from a GitHub repository
    #[command(visible_alias = "i")]
    Install {
        /// Repository in 'author/repo' form
        repository: String,
    },

    /// Remove an installed resource
    #[command(visible_alias = "r")]
    Remove {
        /// Repository in 'author/repo' form
        repository: String,
    },

    /// Download or update the server files
    #[command(visible_alias = "d")]
    Download(DownloadArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct DownloadArgs {
    /// Branch ('release', 'rc', 'dev', a QA or internal branch) and platform ('windows', 'linux')
    pub tokens: Vec<String>,
    /// Platform to download for, overrides the positional keyword
    #[arg(short, long)]
    pub platform: Option<Platform>,
    /// Place the JS module binaries the way pre-1.0 installs did
    #[arg(long, default_value_t = false)]
    pub legacy_layout: bool,
    /// CDN host to download from
    #[arg(long, default_value = DEFAULT_CDN_HOST)]
    pub cdn_host: String,
    /// Maximum number of concurrent downloads
    #[arg(short = 'x', long = "max-workers")]
    pub max_workers: Option<usize>,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

fn init_logging(flags: &GlobalFlags) -> anyhow::Result<()> {
    let color_choice = if flags.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![simplelog::TermLogger::new(
        flags.log_level(),
        simplelog::Config::default(),
        TerminalMode::Stderr,
        color_choice,
    )];

    if flags.debug {
        loggers.push(simplelog::WriteLogger::new(
            flags.log_level(),
            simplelog::Config::default(),
            std::fs::File::create(format!(
                "{}_altv-pkg.log",
                chrono::Local::now().format("%Y%m%dT%H%M%S")
            ))?,
        ));
    }

    simplelog::CombinedLogger::init(loggers)?;
    Ok(())
}

pub async fn cli() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(&args.flags)?;

    if args.flags.no_color {
        colored::control::set_override(false);
    }

    debug!("{:?}", args);
    let root = current_dir()?;
    match args.command {
        Some(Commands::Install { repository }) => {
            install::install(root, &repository).await?;
        }
        Some(Commands::Remove { repository }) => {
            remove::remove(&root, &repository).await?;
        }
        Some(Commands::Download(download_args)) => {
            download::download(root, download_args, args.flags).await?;
        }
        None => {
            download::download(root, args.download, args.flags).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_is_a_plain_download() {
        let cli = Cli::try_parse_from(["altv-pkg"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.download.tokens.is_empty());
        assert_eq!(cli.download.cdn_host, DEFAULT_CDN_HOST);
        assert_eq!(cli.flags.verbosity, 0);
    }

    #[test]
    fn bare_keywords_are_a_download() {
        let cli = Cli::try_parse_from(["altv-pkg", "dev", "windows"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.download.tokens, vec!["dev", "windows"]);

        let config = crate::config::Config::resolve(
            std::path::PathBuf::from("."),
            &cli.download.tokens,
            cli.download.platform,
            &crate::config::RuntimeConfig::default(),
        )
        .unwrap();
        assert_eq!(config.branch, crate::config::Branch::Dev);
        assert_eq!(config.platform, Platform::Windows);
    }

    #[test]
    fn bare_branch_takes_download_flags() {
        let cli = Cli::try_parse_from([
            "altv-pkg",
            "release",
            "-x",
            "2",
            "--legacy-layout",
            "--no-display",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.flags.show_display());
        assert_eq!(cli.download.tokens, vec!["release"]);
        assert_eq!(cli.download.max_workers, Some(2));
        assert!(cli.download.legacy_layout);
    }

    #[test]
    fn download_alias_takes_tokens_and_flags() {
        let cli = Cli::try_parse_from([
            "altv-pkg", "d", "qa-123", "windows", "-x", "4", "--timeout", "10", "-vv",
        ])
        .unwrap();

        let Some(Commands::Download(args)) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.tokens, vec!["qa-123", "windows"]);
        assert_eq!(args.max_workers, Some(4));
        assert_eq!(args.timeout, 10);
        assert_eq!(args.cdn_host, DEFAULT_CDN_HOST);
        assert_eq!(cli.flags.verbosity, 2);
    }

    #[test]
    fn platform_flag_accepts_aliases() {
        let cli = Cli::try_parse_from(["altv-pkg", "download", "--platform", "win32"]).unwrap();
        let Some(Commands::Download(args)) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.platform, Some(Platform::Windows));
    }

    #[test]
    fn install_and_remove_aliases() {
        let cli = Cli::try_parse_from(["altv-pkg", "i", "stuyk/altv-os-auth"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Install { repository }) if repository == "stuyk/altv-os-auth"
        ));

        let cli = Cli::try_parse_from(["altv-pkg", "r", "stuyk/altv-os-auth", "--no-color"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Remove { .. })));
        assert!(cli.flags.no_color);
    }

    #[test]
    fn subcommand_and_bare_download_share_defaults() {
        let cli = Cli::try_parse_from(["altv-pkg", "download"]).unwrap();
        let Some(Commands::Download(args)) = cli.command else {
            panic!("expected download");
        };
        let bare = Cli::try_parse_from(["altv-pkg"]).unwrap().download;
        assert_eq!(args.tokens, bare.tokens);
        assert_eq!(args.cdn_host, bare.cdn_host);
        assert_eq!(args.timeout, bare.timeout);
        assert_eq!(args.max_workers, bare.max_workers);
        assert_eq!(args.legacy_layout, bare.legacy_layout);
    }
}
