//! Artifacts from GitHub REST API and related functions.

use std::fmt::Display;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use tokio_util::bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    workflow::{GitHubClient, classify, extract::extract_report},
};

/// Represents artifacts from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Artifacts {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// Represents an artifact from GitHub REST API.
#[derive(Debug, Deserialize, Clone)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default)]
    pub archive_download_url: String,
    #[serde(default)]
    pub expired: bool,
    /// The digest of the archive, e.g. `sha256:…`.
    #[serde(default)]
    pub digest: Option<String>,
}

impl Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.name, self.id, self.size_in_bytes)
    }
}

/// The outcome of [`GitHubClient::fetch_artifact`]. Serializes to the bare mapping the viewer expects.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArtifactResult {
    /// The parsed report, possibly with the impact analysis merged in.
    Report(Value),
    /// No artifact of the requested name exists in the run.
    Missing {
        /// A human-readable description.
        error: String,
        /// The names of every artifact in the run, in listing order.
        available: Vec<String>,
    },
    /// The artifact holds no JSON file.
    NoJson {
        /// A human-readable description.
        error: String,
    },
}

impl GitHubClient {
    /// Lists the artifacts of a run.
    ///
    /// # Errors
    ///
    /// See: [`Self::validate`]
    pub async fn list_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>> {
        let listing: Artifacts = self
            .get_json(
                &self.repo_url(&format!("/actions/runs/{run_id}/artifacts")),
                &[],
            )
            .await?;

        match listing.artifacts.len() {
            1 => info!("fetched 1 artifact of run {run_id}"),
            count => info!("fetched {count} artifacts of run {run_id}"),
        }
        Ok(listing.artifacts)
    }

    /// Downloads the archive of an artifact into memory, following redirects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the artifact expired or was removed, otherwise see [`Self::validate`].
    pub async fn download_artifact(&self, artifact: &Artifact) -> Result<Bytes> {
        let url = self.repo_url(&format!("/actions/artifacts/{}/zip", artifact.id));
        debug!("requesting download from {url}…");

        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::GONE {
            error!("failed to download {artifact}: artifact expired or removed");
            return Err(Error::NotFound(format!(
                "Artifact '{}' expired or was removed",
                artifact.name
            )));
        }

        let bytes = classify(response)?.bytes().await?;
        info!("downloaded artifact {artifact}");
        Ok(bytes)
    }

    /// Fetches the named artifact of a run and extracts its report.
    ///
    /// A missing artifact or an archive without JSON is reported in the returned [`ArtifactResult`] rather
    /// than as an error, so callers can try another name.
    ///
    /// # Errors
    ///
    /// Returns an error if any request fails, the download does not match its digest, or the archive or
    /// report is malformed.
    pub async fn fetch_artifact(&self, run_id: u64, artifact_name: &str) -> Result<ArtifactResult> {
        let artifacts = self.list_artifacts(run_id).await?;
        let available: Vec<String> = artifacts.iter().map(|a| a.name.clone()).collect();

        let Some(artifact) = artifacts.iter().find(|a| a.name == artifact_name) else {
            warn!("no artifact named {artifact_name:?} in run {run_id}, available: {available:?}");
            return Ok(ArtifactResult::Missing {
                error: format!("Artifact '{artifact_name}' not found"),
                available,
            });
        };

        let bytes = self.download_artifact(artifact).await?;
        verify_digest(&bytes, artifact.digest.as_deref())?;

        Ok(match extract_report(&bytes)? {
            Some(report) => ArtifactResult::Report(report),
            None => ArtifactResult::NoJson {
                error: String::from("No JSON found in artifact"),
            },
        })
    }
}

/// Checks downloaded bytes against a published `sha256:` digest. Other or absent digests are not checked.
///
/// # Errors
///
/// Returns [`Error::DigestMismatch`] if the digests differ.
pub fn verify_digest(bytes: &[u8], digest: Option<&str>) -> Result<()> {
    let Some(digest) = digest else {
        debug!("digest not provided, skipping verification");
        return Ok(());
    };
    let Some(expected) = digest.strip_prefix("sha256:") else {
        debug!("unsupported digest {digest}, skipping verification");
        return Ok(());
    };

    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        error!("downloaded archive does not match digest {digest}");
        Err(Error::DigestMismatch {
            expected: expected.to_owned(),
            actual,
        })
    }
}
