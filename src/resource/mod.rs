//! Installing and removing community resources hosted on GitHub.
//!
//! A resource repository describes its setup in a `.altv` file at its root,
//! a JSON list of npm packages to add, questions to ask and post install
//! scripts to run.
pub mod command;
pub mod prompt;

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use self::{
    command::{CommandError, CommandRunner},
    prompt::{is_consent, Prompt},
};
use crate::{
    error::FetchError,
    http::{get_json, Headers, HttpClient},
};

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const GITHUB_RAW_URL: &str = "https://raw.githubusercontent.com";
pub const INSTRUCTIONS_FILENAME: &str = ".altv";
pub const RESOURCES_DIRNAME: &str = "resources";
pub const RESPONSES_FILENAME: &str = "responses.json";
pub const PACKAGE_FILENAME: &str = "package.json";

const REPOSITORY_PATTERN: &str = r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$";

/// Files the server root must contain before a resource can be installed.
const PREREQUISITES: [(&str, &str); 2] = [
    (
        PACKAGE_FILENAME,
        "Could not find package.json in local directory. Initialize your directory with 'npm init' to continue.",
    ),
    (
        "altv-server",
        "Could not find 'altv-server' in local directory. Please download alt:V Server files first.",
    ),
];

const POST_INSTALL_WARNING: &str = "Warning: We are not responsible for what a post install script does. We ask that you read their install script yourself.";
const POST_INSTALL_QUESTION: &str =
    "This resource has post install scripts. Did you want to run them? (y/n)";

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Repo name must be 'author/repo', ie. 'altv-pkg install stuyk/altv-os-auth', got '{0}'")]
    InvalidName(String),

    #[error("{0}")]
    MissingPrerequisite(&'static str),

    #[error("Failed to fetch repository contents, {0}")]
    ContentsUnavailable(#[source] FetchError),

    #[error("{0} does not have a file called '.altv' in their main directory. Please create one or ask the author to.")]
    MissingInstructionsFile(RepositoryName),

    #[error("{0} does not have installation instructions.")]
    NoInstructions(RepositoryName),

    #[error("Failed to parse package.json, {0}")]
    InvalidPackageJson(String),

    #[error("Failed to access {}, {source}", .filepath.display())]
    Io {
        filepath: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read answer, {0}")]
    Prompt(#[source] io::Error),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("That repository is not installed locally.")]
    NotInstalled(RepositoryName),

    #[error("Seems the directory is in use. Close Visual Studio Code, any IDEs, etc. then try again. ({0})")]
    InUse(#[source] io::Error),
}

fn io_error(filepath: &Path) -> impl FnOnce(io::Error) -> ResourceError + '_ {
    move |source| ResourceError::Io {
        filepath: filepath.to_path_buf(),
        source,
    }
}

/// A GitHub repository in `author/repo` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryName {
    pub author: String,
    pub name: String,
}

impl FromStr for RepositoryName {
    type Err = ResourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ResourceError::InvalidName(value.to_string());
        let pattern = Regex::new(REPOSITORY_PATTERN).map_err(|_| invalid())?;
        let captures = pattern.captures(value.trim()).ok_or_else(invalid)?;

        Ok(RepositoryName {
            author: captures[1].to_string(),
            name: captures[2].to_string(),
        })
    }
}

impl Display for RepositoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.author, self.name)
    }
}

impl RepositoryName {
    pub fn contents_url(&self, api_url: &str) -> String {
        format!("{}/repos/{}/contents", api_url, self)
    }

    pub fn instructions_url(&self, raw_url: &str) -> String {
        format!("{}/{}/master/{}", raw_url, self, INSTRUCTIONS_FILENAME)
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/", self)
    }

    /// The resource directory relative to the server root.
    pub fn local_path(&self) -> String {
        format!("./{}/{}", RESOURCES_DIRNAME, self.name)
    }
}

/// One step of a `.altv` instruction file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Instruction {
    #[serde(rename = "package", alias = "pkg")]
    Package {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
    #[serde(rename = "question", alias = "?")]
    Question {
        #[serde(default)]
        question: Option<String>,
    },
    #[serde(rename = "postinstall")]
    PostInstall {
        #[serde(default)]
        file: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
}

/// What an install changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cloned: bool,
    pub added_packages: Vec<String>,
    pub answers: Vec<String>,
    pub post_install_scripts: Vec<String>,
    pub post_install_ran: bool,
}

/// Installs resources into a server root.
pub struct Installer<'a> {
    client: &'a dyn HttpClient,
    prompt: &'a dyn Prompt,
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    api_url: String,
    raw_url: String,
}

impl<'a> Installer<'a> {
    pub fn new(
        client: &'a dyn HttpClient,
        prompt: &'a dyn Prompt,
        runner: &'a dyn CommandRunner,
        root: PathBuf,
    ) -> Self {
        Self {
            client,
            prompt,
            runner,
            root,
            api_url: GITHUB_API_URL.to_string(),
            raw_url: GITHUB_RAW_URL.to_string(),
        }
    }

    pub fn with_github_urls(mut self, api_url: &str, raw_url: &str) -> Self {
        self.api_url = api_url.to_string();
        self.raw_url = raw_url.to_string();
        self
    }

    pub async fn install(&self, repository: &RepositoryName) -> Result<InstallReport, ResourceError> {
        verify_root(&self.root)?;

        let instructions = self.fetch_instructions(repository).await?;
        let mut package = read_package_json(&self.root.join(PACKAGE_FILENAME))?;
        let mut report = InstallReport::default();

        let resource_dir = self.root.join(RESOURCES_DIRNAME).join(&repository.name);
        if !resource_dir.exists() {
            info!("Cloning {}", repository);
            self.runner
                .run(
                    "git",
                    &[
                        "clone".to_string(),
                        repository.clone_url(),
                        repository.local_path(),
                    ],
                    &self.root,
                )
                .await?;
            report.cloned = true;
        }

        for instruction in instructions {
            match instruction {
                Instruction::Package { name, version } => {
                    if add_dependency(&mut package, &name, version.as_deref())? {
                        info!("Added NPM Package {}", name);
                        report.added_packages.push(name);
                    }
                }
                Instruction::Question { question } => {
                    let Some(question) = question.filter(|q| !q.is_empty()) else {
                        continue;
                    };
                    if let Some(answer) = self
                        .prompt
                        .ask(&question)
                        .await
                        .map_err(ResourceError::Prompt)?
                    {
                        report.answers.push(answer);
                    }
                }
                Instruction::PostInstall { file: Some(file) } => {
                    if !resource_dir.join(&file).is_file() {
                        warn!(
                            "Post install file does not exist: {:?}",
                            resource_dir.join(&file)
                        );
                        continue;
                    }
                    report
                        .post_install_scripts
                        .push(format!("{}/{}", repository.local_path(), file));
                }
                Instruction::PostInstall { file: None } | Instruction::Unknown => {
                    debug!("Skipping instruction {:?}", instruction);
                }
            }
        }

        write_package_json(&self.root.join(PACKAGE_FILENAME), &package)?;
        info!("Updated 'package.json' with dependencies");

        if !report.answers.is_empty() {
            let filepath = resource_dir.join(RESPONSES_FILENAME);
            let contents = serde_json::to_string(&report.answers)
                .map_err(|err| ResourceError::InvalidPackageJson(err.to_string()))?;
            std::fs::write(&filepath, contents).map_err(io_error(&filepath))?;
        }

        if !report.post_install_scripts.is_empty() {
            self.prompt.notice(POST_INSTALL_WARNING);
            let answer = self
                .prompt
                .ask(POST_INSTALL_QUESTION)
                .await
                .map_err(ResourceError::Prompt)?;

            if is_consent(answer.as_deref()) {
                for script in &report.post_install_scripts {
                    info!("Running post install script {}", script);
                    self.runner
                        .run("node", &[script.clone()], &self.root)
                        .await?;
                }
                report.post_install_ran = true;
            }
        }

        info!("Updating installation");
        self.runner
            .run("npm", &["install".to_string()], &self.root)
            .await?;

        Ok(report)
    }

    async fn fetch_instructions(
        &self,
        repository: &RepositoryName,
    ) -> Result<Vec<Instruction>, ResourceError> {
        let contents: Vec<ContentEntry> = get_json(
            self.client,
            &repository.contents_url(&self.api_url),
            &Headers::new(),
        )
        .await
        .map_err(ResourceError::ContentsUnavailable)?;

        if !contents
            .iter()
            .any(|entry| entry.name == INSTRUCTIONS_FILENAME)
        {
            return Err(ResourceError::MissingInstructionsFile(repository.clone()));
        }

        let instructions: Vec<Instruction> = match get_json(
            self.client,
            &repository.instructions_url(&self.raw_url),
            &Headers::new(),
        )
        .await
        {
            Ok(instructions) => instructions,
            Err(err) => {
                debug!("Failed to read instructions, {}", err);
                return Err(ResourceError::NoInstructions(repository.clone()));
            }
        };

        if instructions.is_empty() {
            return Err(ResourceError::NoInstructions(repository.clone()));
        }

        Ok(instructions)
    }
}

/// Checks the server root is ready for resources, creating `resources/` if needed.
pub fn verify_root(root: &Path) -> Result<(), ResourceError> {
    let resources_dir = root.join(RESOURCES_DIRNAME);
    std::fs::create_dir_all(&resources_dir).map_err(io_error(&resources_dir))?;

    let filenames: Vec<String> = std::fs::read_dir(root)
        .map_err(io_error(root))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();

    for (required, message) in PREREQUISITES {
        // altv-server.exe satisfies altv-server.
        if !filenames.iter().any(|filename| filename.contains(required)) {
            return Err(ResourceError::MissingPrerequisite(message));
        }
    }

    Ok(())
}

fn read_package_json(filepath: &Path) -> Result<Value, ResourceError> {
    let contents = std::fs::read_to_string(filepath).map_err(io_error(filepath))?;
    let package: Value = serde_json::from_str(&contents)
        .map_err(|err| ResourceError::InvalidPackageJson(err.to_string()))?;

    if !package.is_object() {
        return Err(ResourceError::InvalidPackageJson(
            "expected a JSON object".to_string(),
        ));
    }

    Ok(package)
}

/// Writes `package.json` tab indented, keeping key order.
fn write_package_json(filepath: &Path, package: &Value) -> Result<(), ResourceError> {
    let mut contents = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut contents, formatter);
    package
        .serialize(&mut serializer)
        .map_err(|err| ResourceError::InvalidPackageJson(err.to_string()))?;

    std::fs::write(filepath, contents).map_err(io_error(filepath))
}

/// Adds a dependency unless it is already declared, returns whether it was added.
fn add_dependency(
    package: &mut Value,
    name: &str,
    version: Option<&str>,
) -> Result<bool, ResourceError> {
    let package = package
        .as_object_mut()
        .ok_or_else(|| ResourceError::InvalidPackageJson("expected a JSON object".to_string()))?;
    let dependencies = package
        .entry("dependencies")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            ResourceError::InvalidPackageJson("'dependencies' is not an object".to_string())
        })?;

    if dependencies.contains_key(name) {
        return Ok(false);
    }

    let version = version.filter(|v| !v.is_empty()).unwrap_or("latest");
    dependencies.insert(name.to_string(), Value::String(version.to_string()));
    Ok(true)
}

/// Deletes an installed resource, returning the removed directory.
pub async fn remove(root: &Path, repository: &RepositoryName) -> Result<PathBuf, ResourceError> {
    let resource_dir = root.join(RESOURCES_DIRNAME).join(&repository.name);
    if !resource_dir.exists() {
        return Err(ResourceError::NotInstalled(repository.clone()));
    }

    tokio::fs::remove_dir_all(&resource_dir)
        .await
        .map_err(ResourceError::InUse)?;
    Ok(resource_dir)
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, fs, sync::Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::http::tests::MockHttpClient;

    const API: &str = "http://api";
    const RAW: &str = "http://raw";

    struct ScriptedPrompt {
        answers: Mutex<VecDeque<Option<String>>>,
        asked: Mutex<Vec<String>>,
        notices: Mutex<Vec<String>>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|a| a.map(str::to_string)).collect()),
                asked: Mutex::new(Vec::new()),
                notices: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Prompt for ScriptedPrompt {
        async fn ask(&self, question: &str) -> io::Result<Option<String>> {
            self.asked.lock().unwrap().push(question.to_string());
            Ok(self.answers.lock().unwrap().pop_front().flatten())
        }

        fn notice(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    /// Records commands, `git clone` creates the target with the given files.
    #[derive(Default)]
    struct RecordingRunner {
        clone_files: Vec<&'static str>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<(), CommandError> {
            self.commands
                .lock()
                .unwrap()
                .push(command::command_line(program, args));

            if program == "git" {
                let target = cwd.join(&args[2]);
                fs::create_dir_all(&target).unwrap();
                for file in &self.clone_files {
                    fs::write(target.join(file), "").unwrap();
                }
            }
            Ok(())
        }
    }

    fn server_root() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(PACKAGE_FILENAME),
            r#"{"name": "server", "version": "1.0.0", "dependencies": {"dotenv": "^8.0.0"}}"#,
        )
        .unwrap();
        fs::write(temp_dir.path().join("altv-server"), "").unwrap();
        temp_dir
    }

    fn repository() -> RepositoryName {
        "stuyk/altv-os-auth".parse().unwrap()
    }

    fn github(instructions: Value) -> MockHttpClient {
        MockHttpClient::new()
            .with_json(
                "http://api/repos/stuyk/altv-os-auth/contents",
                json!([{ "name": "README.md" }, { "name": ".altv" }]),
            )
            .with_json("http://raw/stuyk/altv-os-auth/master/.altv", instructions)
    }

    #[test]
    fn repository_names() {
        let name = repository();
        assert_eq!(name.author, "stuyk");
        assert_eq!(name.name, "altv-os-auth");
        assert_eq!(name.to_string(), "stuyk/altv-os-auth");
        assert_eq!(name.local_path(), "./resources/altv-os-auth");
        assert!("no-slash".parse::<RepositoryName>().is_err());
        assert!("a/b/c".parse::<RepositoryName>().is_err());
        assert!("/repo".parse::<RepositoryName>().is_err());
    }

    #[test]
    fn instructions_accept_aliases() {
        let instructions: Vec<Instruction> = serde_json::from_value(json!([
            { "type": "pkg", "name": "sjcl" },
            { "type": "?", "question": "Database name?" },
            { "type": "postinstall", "file": "setup.js" },
            { "type": "something-new" },
        ]))
        .unwrap();

        assert_eq!(
            instructions,
            vec![
                Instruction::Package {
                    name: "sjcl".to_string(),
                    version: None
                },
                Instruction::Question {
                    question: Some("Database name?".to_string())
                },
                Instruction::PostInstall {
                    file: Some("setup.js".to_string())
                },
                Instruction::Unknown,
            ]
        );
    }

    #[tokio::test]
    async fn install_runs_every_instruction() {
        let root = server_root();
        let client = github(json!([
            { "type": "package", "name": "sjcl", "version": "^1.0.8" },
            { "type": "package", "name": "dotenv" },
            { "type": "pkg", "name": "typeorm" },
            { "type": "question", "question": "Database name?" },
            { "type": "question", "question": "Skipped?" },
            { "type": "postinstall", "file": "setup.js" },
            { "type": "postinstall", "file": "missing.js" },
        ]));
        let prompt = ScriptedPrompt::new(&[Some("altv"), None, Some("y")]);
        let runner = RecordingRunner {
            clone_files: vec!["setup.js"],
            ..Default::default()
        };

        let report = Installer::new(&client, &prompt, &runner, root.path().to_path_buf())
            .with_github_urls(API, RAW)
            .install(&repository())
            .await
            .unwrap();

        assert!(report.cloned);
        assert!(report.post_install_ran);
        assert_eq!(report.added_packages, vec!["sjcl", "typeorm"]);
        assert_eq!(report.answers, vec!["altv"]);
        assert_eq!(
            *runner.commands.lock().unwrap(),
            vec![
                "git clone https://github.com/stuyk/altv-os-auth/ ./resources/altv-os-auth",
                "node ./resources/altv-os-auth/setup.js",
                "npm install",
            ]
        );
        assert_eq!(prompt.notices.lock().unwrap().len(), 1);

        let package = fs::read_to_string(root.path().join(PACKAGE_FILENAME)).unwrap();
        assert!(package.contains("\n\t\"dependencies\""));
        assert!(package.find("\"name\"").unwrap() < package.find("\"dependencies\"").unwrap());
        let package: Value = serde_json::from_str(&package).unwrap();
        assert_eq!(package["dependencies"]["sjcl"], "^1.0.8");
        assert_eq!(package["dependencies"]["typeorm"], "latest");
        assert_eq!(package["dependencies"]["dotenv"], "^8.0.0");

        let responses =
            fs::read_to_string(root.path().join("resources/altv-os-auth/responses.json")).unwrap();
        assert_eq!(responses, r#"["altv"]"#);
    }

    #[tokio::test]
    async fn declined_post_install_is_not_run() {
        let root = server_root();
        fs::create_dir_all(root.path().join("resources/altv-os-auth")).unwrap();
        fs::write(root.path().join("resources/altv-os-auth/setup.js"), "").unwrap();
        let client = github(json!([{ "type": "postinstall", "file": "setup.js" }]));
        let prompt = ScriptedPrompt::new(&[Some("n")]);
        let runner = RecordingRunner::default();

        let report = Installer::new(&client, &prompt, &runner, root.path().to_path_buf())
            .with_github_urls(API, RAW)
            .install(&repository())
            .await
            .unwrap();

        assert!(!report.cloned);
        assert!(!report.post_install_ran);
        assert_eq!(*runner.commands.lock().unwrap(), vec!["npm install"]);
    }

    #[tokio::test]
    async fn repository_without_instruction_file_is_rejected() {
        let root = server_root();
        let client = MockHttpClient::new().with_json(
            "http://api/repos/stuyk/altv-os-auth/contents",
            json!([{ "name": "README.md" }]),
        );
        let prompt = ScriptedPrompt::new(&[]);
        let runner = RecordingRunner::default();

        let err = Installer::new(&client, &prompt, &runner, root.path().to_path_buf())
            .with_github_urls(API, RAW)
            .install(&repository())
            .await
            .unwrap_err();

        assert!(matches!(err, ResourceError::MissingInstructionsFile(_)));
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_instructions_are_rejected() {
        let root = server_root();
        let client = github(json!([]));
        let prompt = ScriptedPrompt::new(&[]);
        let runner = RecordingRunner::default();

        let err = Installer::new(&client, &prompt, &runner, root.path().to_path_buf())
            .with_github_urls(API, RAW)
            .install(&repository())
            .await
            .unwrap_err();

        assert!(matches!(err, ResourceError::NoInstructions(_)));
    }

    #[tokio::test]
    async fn unreachable_repository_is_reported() {
        let root = server_root();
        let client = MockHttpClient::new();
        let prompt = ScriptedPrompt::new(&[]);
        let runner = RecordingRunner::default();

        let err = Installer::new(&client, &prompt, &runner, root.path().to_path_buf())
            .with_github_urls(API, RAW)
            .install(&repository())
            .await
            .unwrap_err();

        assert!(matches!(err, ResourceError::ContentsUnavailable(_)));
    }

    #[test]
    fn root_without_server_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(PACKAGE_FILENAME), "{}").unwrap();

        let err = verify_root(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("altv-server"));
        assert!(temp_dir.path().join(RESOURCES_DIRNAME).is_dir());
    }

    #[test]
    fn windows_server_binary_satisfies_prerequisite() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(PACKAGE_FILENAME), "{}").unwrap();
        fs::write(temp_dir.path().join("altv-server.exe"), "").unwrap();

        assert!(verify_root(temp_dir.path()).is_ok());
    }

    #[test]
    fn dependencies_object_is_created() {
        let mut package = json!({ "name": "server" });
        assert!(add_dependency(&mut package, "sjcl", None).unwrap());
        assert!(!add_dependency(&mut package, "sjcl", Some("2.0.0")).unwrap());
        assert_eq!(package["dependencies"]["sjcl"], "latest");
    }

    #[tokio::test]
    async fn remove_deletes_resource_directory() {
        let root = server_root();
        let resource_dir = root.path().join("resources/altv-os-auth");
        fs::create_dir_all(resource_dir.join("server")).unwrap();
        fs::write(resource_dir.join("server/index.js"), "").unwrap();

        let removed = remove(root.path(), &repository()).await.unwrap();

        assert_eq!(removed, resource_dir);
        assert!(!resource_dir.exists());
    }

    #[tokio::test]
    async fn remove_missing_resource_fails() {
        let root = server_root();
        let err = remove(root.path(), &repository()).await.unwrap_err();
        assert!(matches!(err, ResourceError::NotInstalled(_)));
    }
}
