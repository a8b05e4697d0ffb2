//! The layout of the alt:V CDN.
//!
//! Each component publishes an `update.json` manifest next to the files it
//! lists, under `https://<host>/<component>/<branch>/<platform>/`. Shared data
//! files have no platform segment.
use std::sync::Arc;

use log::{debug, warn};

use crate::{
    config::{Branch, Config, OptionalModule, Platform},
    http::{Headers, HttpClient},
    manifest::{fetch_manifest, Manifest, ManifestError, MANIFEST_FILENAME},
    sync::{FileIndex, PathRemap},
    task::TaskManager,
};

pub const DEFAULT_CDN_HOST: &str = "cdn.alt-mp.com";

/// A downloadable part of the server, published separately on the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum Component {
    #[strum(serialize = "data")]
    Data,
    #[strum(serialize = "server")]
    Server,
    #[strum(serialize = "js-module")]
    JsModule,
    #[strum(serialize = "js-bytecode-module")]
    JsBytecodeModule,
    #[strum(serialize = "coreclr-module")]
    CoreClrModule,
    #[strum(serialize = "js-module-v2")]
    JsModuleV2,
    #[strum(serialize = "voice-server")]
    VoiceServer,
}

impl Component {
    /// Data files are shared by every platform.
    pub fn is_platform_specific(&self) -> bool {
        !matches!(self, Component::Data)
    }

    /// The optional module that enables this component, `None` for the ones always synced.
    pub fn module(&self) -> Option<OptionalModule> {
        match self {
            Component::Data | Component::Server => None,
            Component::JsModule => Some(OptionalModule::Js),
            Component::JsBytecodeModule => Some(OptionalModule::Bytecode),
            Component::CoreClrModule => Some(OptionalModule::CSharp),
            Component::JsModuleV2 => Some(OptionalModule::JsV2),
            Component::VoiceServer => Some(OptionalModule::Voice),
        }
    }

    /// Whether the component follows the data branch rather than the selected branch.
    fn uses_data_branch(&self) -> bool {
        matches!(
            self,
            Component::Data
                | Component::JsBytecodeModule
                | Component::CoreClrModule
                | Component::JsModuleV2
        )
    }
}

/// Components in the order their manifests are applied, later ones win on shared paths.
pub const COMPONENTS: [Component; 7] = [
    Component::Data,
    Component::Server,
    Component::JsModule,
    Component::JsBytecodeModule,
    Component::CoreClrModule,
    Component::JsModuleV2,
    Component::VoiceServer,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnLayout {
    pub host: String,
}

impl Default for CdnLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CDN_HOST)
    }
}

impl CdnLayout {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
        }
    }

    /// The directory URL a component publishes to.
    pub fn base_url(&self, component: Component, branch: &Branch, platform: Platform) -> String {
        let root = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("https://{}", self.host)
        };

        if component.is_platform_specific() {
            format!("{}/{}/{}/{}", root, component, branch, platform)
        } else {
            format!("{}/{}/{}", root, component, branch)
        }
    }
}

/// Where one component's manifest and files are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSource {
    pub component: Component,
    pub base_url: String,
    /// Tried when the manifest at `base_url` cannot be fetched.
    pub fallback_base_url: Option<String>,
}

impl ManifestSource {
    pub fn manifest_url(base_url: &str) -> String {
        format!("{}/{}", base_url, MANIFEST_FILENAME)
    }

    pub fn file_url(base_url: &str, path: &str) -> String {
        format!("{}/{}", base_url, path)
    }
}

/// The manifests to sync for a configuration, in application order.
pub fn manifest_sources(layout: &CdnLayout, config: &Config) -> Vec<ManifestSource> {
    let data_branch = config.branch.data_branch();

    COMPONENTS
        .iter()
        .filter(|component| match component.module() {
            Some(module) => config.modules.is_enabled(module),
            None => true,
        })
        .map(|&component| {
            let branch = if component.uses_data_branch() {
                &data_branch
            } else {
                &config.branch
            };
            let base_url = layout.base_url(component, branch, config.platform);

            // The JS module is not always published for every branch.
            let fallback_base_url = (component == Component::JsModule
                && data_branch != config.branch)
                .then(|| layout.base_url(component, &data_branch, config.platform));

            ManifestSource {
                component,
                base_url,
                fallback_base_url,
            }
        })
        .collect()
}

/// The manifests a run verifies against and the download URL of every file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSources {
    /// The manifest URLs actually used, fallbacks included, in source order.
    pub manifest_urls: Vec<String>,
    pub file_index: FileIndex,
}

/// Fetches every source manifest and builds the file index.
///
/// Paths are remapped to their local location, the last source listing a path
/// provides its URL. Any manifest that cannot be fetched, after the fallback
/// branch was tried, fails the whole index.
pub async fn build_file_index(
    client: Arc<dyn HttpClient>,
    sources: &[ManifestSource],
    headers: &Headers,
    remap: &PathRemap,
) -> Result<ResolvedSources, ManifestError> {
    let mut fetches = TaskManager::new().with_task_capacity(sources.len());
    for source in sources {
        let client = client.clone();
        let headers = headers.clone();
        let source = source.clone();
        fetches.spawn(async move { fetch_source(client.as_ref(), &source, &headers).await });
    }

    let mut resolved = ResolvedSources::default();
    for (base_url, manifest) in fetches.join_all().await? {
        for path in manifest.hash_list.keys() {
            resolved
                .file_index
                .insert(remap.apply(path), ManifestSource::file_url(&base_url, path));
        }
        resolved.manifest_urls.push(manifest.url);
    }

    debug!(
        "Indexed {} files from {} manifests",
        resolved.file_index.len(),
        resolved.manifest_urls.len()
    );
    Ok(resolved)
}

async fn fetch_source(
    client: &dyn HttpClient,
    source: &ManifestSource,
    headers: &Headers,
) -> Result<(String, Manifest), ManifestError> {
    let url = ManifestSource::manifest_url(&source.base_url);
    match fetch_manifest(client, &url, headers).await {
        Ok(manifest) => Ok((source.base_url.clone(), manifest)),
        Err(err) => {
            let Some(fallback) = &source.fallback_base_url else {
                return Err(err);
            };

            warn!(
                "Unable to get {} files from {} ({}), trying {}...",
                source.component, source.base_url, err, fallback
            );
            let url = ManifestSource::manifest_url(fallback);
            let manifest = fetch_manifest(client, &url, headers).await?;
            Ok((fallback.clone(), manifest))
        }
    }
}
