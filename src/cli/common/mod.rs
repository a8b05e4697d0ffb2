pub mod display;

use clap::Args;
use simplelog::LevelFilter;

/// Global flags that can be used with any command
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct GlobalFlags {
    #[arg(short, long, global = true, action = clap::ArgAction::Count, default_value_t = 0)]
    /// Verbosity level
    pub verbosity: u8,
    /// Enable debug output
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    /// Disable color output
    #[arg(long, global = true, default_value_t = false)]
    pub no_color: bool,
    /// Disable progress output
    #[arg(long, global = true, default_value_t = false)]
    pub no_progress: bool,
    /// Disable per-file output
    #[arg(long, global = true, default_value_t = false)]
    pub no_display: bool,
}

impl GlobalFlags {
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else if self.verbosity > 0 {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.no_progress || self.debug
    }

    pub fn show_display(&self) -> bool {
        !self.no_display
    }
}
