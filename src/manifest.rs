use std::collections::BTreeMap;

use log::debug;

use crate::{
    error::FetchError,
    http::{HttpClient, Headers},
};

/// The file name of a CDN manifest next to the files it describes.
pub const MANIFEST_FILENAME: &str = "update.json";

/// Known errors for manifest retrieval.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Manifest at {url} is not valid JSON, {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Manifest at {url} has no valid 'hashList'")]
    MissingHashList { url: String },

    #[error("Manifest fetch task failed, {0}")]
    TaskJoinFailure(#[from] tokio::task::JoinError),
}

/// A CDN manifest mapping relative file paths to their SHA-1 digests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// The URL the manifest was fetched from.
    pub url: String,
    pub hash_list: BTreeMap<String, String>,
}

impl Manifest {
    /// Read a manifest from a JSON document.
    pub fn from_json(url: &str, data: &[u8]) -> Result<Self, ManifestError> {
        let value: serde_json::Value =
            serde_json::from_slice(data).map_err(|source| ManifestError::InvalidJson {
                url: url.to_string(),
                source,
            })?;

        let missing = || ManifestError::MissingHashList {
            url: url.to_string(),
        };
        let hash_list = value.get("hashList").ok_or_else(missing)?;
        let hash_list: BTreeMap<String, String> =
            serde_json::from_value(hash_list.clone()).map_err(|_| missing())?;

        Ok(Manifest {
            url: url.to_string(),
            hash_list,
        })
    }
}

/// Fetches and parses the manifest at `url`.
pub async fn fetch_manifest(
    client: &dyn HttpClient,
    url: &str,
    headers: &Headers,
) -> Result<Manifest, ManifestError> {
    let body = client.get(url, headers).await?;
    let manifest = Manifest::from_json(url, &body)?;
    debug!("Fetched {} entries from {}", manifest.hash_list.len(), url);
    Ok(manifest)
}
