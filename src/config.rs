//! Resolution of the run configuration.
//!
//! A [`Config`] is built once at startup from the command line and the
//! optional `.altvpkgrc` override file, then handed by reference to every
//! component that needs it.
use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};
use serde::Deserialize;

/// Override files looked up in the root directory, in order.
pub const RC_FILENAMES: [&str; 2] = [".altvpkgrc.json", ".altvpkgrc.toml"];

/// Whether the JS module is downloaded when the override file does not say otherwise.
pub const DEFAULT_JS_MODULE: bool = true;

/// Branches with this prefix are gated behind Discord authorization.
pub const QA_BRANCH_PREFIX: &str = "qa";

/// Branches with this prefix are internal builds that take shared files from `dev`.
pub const INTERNAL_BRANCH_PREFIX: &str = "ALTV-";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown argument '{0}', expected one of 'release', 'rc', 'dev', a 'qa' branch, 'windows' or 'linux'")]
    UnknownToken(String),

    #[error("Invalid branch '{0}' in configuration file")]
    InvalidBranch(String),

    #[error("Failed to read {}, {source}", .filepath.display())]
    Unreadable {
        filepath: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}, {reason}", .filepath.display())]
    Malformed { filepath: PathBuf, reason: String },
}

/// The server platform files are downloaded for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::EnumString,
    strum_macros::Display,
    clap::ValueEnum,
)]
pub enum Platform {
    #[strum(serialize = "x64_linux")]
    #[value(name = "linux")]
    Linux,
    #[strum(serialize = "x64_win32")]
    #[value(name = "windows", alias = "win32")]
    Windows,
}

impl Platform {
    /// The platform of the running operating system.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Parses the positional platform keywords accepted on the command line.
    pub fn from_keyword(token: &str) -> Option<Self> {
        match token {
            "windows" => Some(Platform::Windows),
            "linux" => Some(Platform::Linux),
            _ => None,
        }
    }
}

/// A release channel on the CDN.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Branch {
    #[default]
    Release,
    Rc,
    Dev,
    /// A QA branch, only reachable with a CDN token.
    Qa(String),
    /// An internal build branch.
    Internal(String),
}

impl Branch {
    /// The branch shared data files and most optional modules are taken from.
    pub fn data_branch(&self) -> Branch {
        match self {
            Branch::Internal(_) => Branch::Dev,
            branch => branch.clone(),
        }
    }

    pub fn requires_authorization(&self) -> bool {
        matches!(self, Branch::Qa(_))
    }
}

impl FromStr for Branch {
    type Err = ConfigError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.to_lowercase().as_str() {
            "release" => return Ok(Branch::Release),
            "rc" => return Ok(Branch::Rc),
            "dev" => return Ok(Branch::Dev),
            _ => (),
        }

        if token.starts_with(INTERNAL_BRANCH_PREFIX) {
            Ok(Branch::Internal(token.to_string()))
        } else if token.starts_with(QA_BRANCH_PREFIX) {
            Ok(Branch::Qa(token.to_string()))
        } else {
            Err(ConfigError::UnknownToken(token.to_string()))
        }
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::Release => write!(f, "release"),
            Branch::Rc => write!(f, "rc"),
            Branch::Dev => write!(f, "dev"),
            Branch::Qa(name) | Branch::Internal(name) => write!(f, "{}", name),
        }
    }
}

/// Optional server modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum OptionalModule {
    #[strum(serialize = "js-module")]
    Js,
    #[strum(serialize = "js-bytecode-module")]
    Bytecode,
    #[strum(serialize = "csharp-module")]
    CSharp,
    #[strum(serialize = "js-module-v2")]
    JsV2,
    #[strum(serialize = "voice-server")]
    Voice,
}

/// Which optional modules are enabled for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleFlags {
    pub js: bool,
    pub bytecode: bool,
    pub csharp: bool,
    pub js_v2: bool,
    pub voice: bool,
}

impl Default for ModuleFlags {
    fn default() -> Self {
        Self {
            js: DEFAULT_JS_MODULE,
            bytecode: false,
            csharp: false,
            js_v2: false,
            voice: false,
        }
    }
}

impl ModuleFlags {
    pub fn is_enabled(&self, module: OptionalModule) -> bool {
        match module {
            OptionalModule::Js => self.js,
            OptionalModule::Bytecode => self.bytecode,
            OptionalModule::CSharp => self.csharp,
            OptionalModule::JsV2 => self.js_v2,
            OptionalModule::Voice => self.voice,
        }
    }
}

/// Contents of the `.altvpkgrc` override file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(rename = "loadJSModule", default)]
    pub load_js_module: Option<bool>,
    #[serde(rename = "loadBytecodeModule", default)]
    pub load_bytecode_module: Option<bool>,
    #[serde(rename = "loadCSharpModule", default)]
    pub load_csharp_module: Option<bool>,
    #[serde(rename = "loadJSV2Module", default)]
    pub load_js_v2_module: Option<bool>,
    #[serde(rename = "loadVoiceServer", default)]
    pub load_voice_server: Option<bool>,
}

impl RuntimeConfig {
    /// Read an override file, picking the format from its extension.
    pub fn from_file(filepath: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(filepath).map_err(|source| ConfigError::Unreadable {
                filepath: filepath.to_path_buf(),
                source,
            })?;
        let malformed = |reason: String| ConfigError::Malformed {
            filepath: filepath.to_path_buf(),
            reason,
        };

        match filepath.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|err| malformed(err.to_string())),
            _ => serde_json::from_str(&contents).map_err(|err| malformed(err.to_string())),
        }
    }

    /// Read the first override file found in `dirpath`, if any.
    pub fn from_dir(dirpath: &Path) -> Result<Option<Self>, ConfigError> {
        for filename in RC_FILENAMES {
            let filepath = dirpath.join(filename);
            if filepath.is_file() {
                debug!("Reading configuration from {:?}", filepath);
                return Self::from_file(&filepath).map(Some);
            }
        }

        Ok(None)
    }

    pub fn modules(&self) -> ModuleFlags {
        let defaults = ModuleFlags::default();
        ModuleFlags {
            js: self.load_js_module.unwrap_or(defaults.js),
            bytecode: self.load_bytecode_module.unwrap_or(defaults.bytecode),
            csharp: self.load_csharp_module.unwrap_or(defaults.csharp),
            js_v2: self.load_js_v2_module.unwrap_or(defaults.js_v2),
            voice: self.load_voice_server.unwrap_or(defaults.voice),
        }
    }
}

/// Loads the override file from `dirpath`, falling back to defaults when it cannot be used.
pub fn load_runtime_config(dirpath: &Path) -> RuntimeConfig {
    match RuntimeConfig::from_dir(dirpath) {
        Ok(Some(runtime)) => runtime,
        Ok(None) => {
            debug!("No configuration file found in {:?}", dirpath);
            RuntimeConfig::default()
        }
        Err(err) => {
            warn!("{}. Continuing without...", err);
            RuntimeConfig::default()
        }
    }
}

/// The resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub platform: Platform,
    pub branch: Branch,
    pub modules: ModuleFlags,
    pub root: PathBuf,
    /// True when no branch was given on the command line or in the override file.
    pub default_branch: bool,
}

impl Config {
    /// Resolves the configuration.
    ///
    /// Positional `tokens` are branch or platform keywords, the last of each kind wins.
    /// The branch falls back to the override file and then to `release`. The platform
    /// flag takes precedence over keywords, which take precedence over detection.
    pub fn resolve(
        root: PathBuf,
        tokens: &[String],
        platform: Option<Platform>,
        runtime: &RuntimeConfig,
    ) -> Result<Self, ConfigError> {
        let mut cli_branch = None;
        let mut cli_platform = None;
        for token in tokens {
            if let Some(keyword) = Platform::from_keyword(token) {
                cli_platform = Some(keyword);
            } else {
                cli_branch = Some(token.parse::<Branch>()?);
            }
        }

        let file_branch = runtime
            .branch
            .as_deref()
            .map(|name| {
                name.parse::<Branch>()
                    .map_err(|_| ConfigError::InvalidBranch(name.to_string()))
            })
            .transpose()?;

        let default_branch = cli_branch.is_none() && file_branch.is_none();
        Ok(Config {
            platform: platform.or(cli_platform).unwrap_or_else(Platform::detect),
            branch: cli_branch.or(file_branch).unwrap_or_default(),
            modules: runtime.modules(),
            root,
            default_branch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn resolve(values: &[&str], runtime: &RuntimeConfig) -> Result<Config, ConfigError> {
        Config::resolve(PathBuf::from("."), &tokens(values), None, runtime)
    }

    #[test]
    fn defaults_to_release() {
        let config = resolve(&[], &RuntimeConfig::default()).unwrap();
        assert_eq!(config.branch, Branch::Release);
        assert!(config.default_branch);
        assert_eq!(config.platform, Platform::detect());
        assert_eq!(config.modules, ModuleFlags::default());
    }

    #[test]
    fn cli_branch_beats_config_file() {
        let runtime = RuntimeConfig {
            branch: Some("rc".to_string()),
            ..Default::default()
        };

        assert_eq!(resolve(&[], &runtime).unwrap().branch, Branch::Rc);
        assert_eq!(resolve(&["dev"], &runtime).unwrap().branch, Branch::Dev);
        assert!(!resolve(&[], &runtime).unwrap().default_branch);
    }

    #[test]
    fn last_keyword_wins() {
        let config = resolve(&["rc", "windows", "dev", "linux"], &RuntimeConfig::default()).unwrap();
        assert_eq!(config.branch, Branch::Dev);
        assert_eq!(config.platform, Platform::Linux);
    }

    #[test]
    fn platform_flag_beats_keyword() {
        let config = Config::resolve(
            PathBuf::from("."),
            &tokens(&["linux"]),
            Some(Platform::Windows),
            &RuntimeConfig::default(),
        )
        .unwrap();
        assert_eq!(config.platform, Platform::Windows);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = resolve(&["stable"], &RuntimeConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownToken(token) if token == "stable"));
    }

    #[test]
    fn invalid_file_branch_is_rejected() {
        let runtime = RuntimeConfig {
            branch: Some("nightly".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(&[], &runtime).unwrap_err(),
            ConfigError::InvalidBranch(_)
        ));
    }

    #[test]
    fn branch_kinds() {
        assert_eq!("RELEASE".parse::<Branch>().unwrap(), Branch::Release);
        assert_eq!(
            "qa-123".parse::<Branch>().unwrap(),
            Branch::Qa("qa-123".to_string())
        );
        assert_eq!(
            "ALTV-456".parse::<Branch>().unwrap(),
            Branch::Internal("ALTV-456".to_string())
        );
    }

    #[test]
    fn data_branch_of_internal_is_dev() {
        assert_eq!(Branch::Internal("ALTV-1".to_string()).data_branch(), Branch::Dev);
        assert_eq!(Branch::Rc.data_branch(), Branch::Rc);
        assert_eq!(
            Branch::Qa("qa-1".to_string()).data_branch(),
            Branch::Qa("qa-1".to_string())
        );
    }

    #[test]
    fn only_qa_requires_authorization() {
        assert!(Branch::Qa("qa-x".to_string()).requires_authorization());
        assert!(!Branch::Dev.requires_authorization());
        assert!(!Branch::Internal("ALTV-1".to_string()).requires_authorization());
    }

    #[test]
    fn platform_names() {
        assert_eq!(Platform::Linux.to_string(), "x64_linux");
        assert_eq!(Platform::Windows.to_string(), "x64_win32");
        assert_eq!("x64_win32".parse::<Platform>().unwrap(), Platform::Windows);
    }

    #[test]
    fn reads_json_config_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".altvpkgrc.json"),
            r#"{"loadJSModule": false, "loadCSharpModule": true, "loadVoiceServer": true}"#,
        )
        .unwrap();

        let runtime = RuntimeConfig::from_dir(temp_dir.path()).unwrap().unwrap();
        let modules = runtime.modules();
        assert!(!modules.js);
        assert!(modules.csharp);
        assert!(modules.voice);
        assert!(!modules.bytecode);
        assert!(!modules.js_v2);
    }

    #[test]
    fn reads_toml_config_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".altvpkgrc.toml"),
            "branch = \"dev\"\nloadBytecodeModule = true\n",
        )
        .unwrap();

        let runtime = RuntimeConfig::from_dir(temp_dir.path()).unwrap().unwrap();
        assert_eq!(runtime.branch.as_deref(), Some("dev"));
        assert!(runtime.modules().bytecode);
        assert!(runtime.modules().js);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(RuntimeConfig::from_dir(temp_dir.path()).unwrap().is_none());
        assert_eq!(load_runtime_config(temp_dir.path()), RuntimeConfig::default());
    }

    #[test]
    fn malformed_config_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".altvpkgrc.json"), "{ nope").unwrap();

        assert!(matches!(
            RuntimeConfig::from_dir(temp_dir.path()).unwrap_err(),
            ConfigError::Malformed { .. }
        ));
        assert_eq!(load_runtime_config(temp_dir.path()), RuntimeConfig::default());
    }

    proptest! {
        #[test]
        fn qa_tokens_parse_as_qa_branches(suffix in "[a-z0-9-]{0,12}") {
            let token = format!("qa{}", suffix);
            prop_assert_eq!(token.parse::<Branch>().unwrap(), Branch::Qa(token.clone()));
        }

        #[test]
        fn branch_display_round_trips(token in "(release|rc|dev|qa[a-z0-9]{1,6}|ALTV-[0-9]{1,6})") {
            let branch = token.parse::<Branch>().unwrap();
            prop_assert_eq!(branch.to_string(), token);
        }
    }
}
