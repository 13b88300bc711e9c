//! # Profiler Artifacts
//!
//! The instrumented target writes one `mp_timers_<id>` file per profiled
//! request into the artifact directory. [`ArtifactLocator`] empties that
//! directory before each attempt so a stale artifact can never be mistaken
//! for the current one, and afterwards turns the newest artifact into a
//! results URL served by the target.

use crate::error::ArtifactError;
use perfcheck_core::TargetConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use url::Url;

/// File name prefix of profiler timing artifacts.
pub const ARTIFACT_PREFIX: &str = "mp_timers_";

const RESULTS_PATH: &str = "/mini-profiler-resources/results";

/// A profiler artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerArtifact {
    pub id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Clears and resolves profiler artifacts for one target.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    artifact_dir: PathBuf,
    published_dir: PathBuf,
    host: String,
    port: u16,
}

impl ArtifactLocator {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            artifact_dir: config.artifact_dir_path(),
            published_dir: config.published_artifact_dir_path(),
            host: config.host.clone(),
            port: config.port,
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn published_dir(&self) -> &Path {
        &self.published_dir
    }

    /// Empty the artifact directory, creating it if needed.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Io` if the directory cannot be created, listed,
    /// or cleared.
    pub fn prepare_to_profile(&self) -> Result<usize, ArtifactError> {
        fs::create_dir_all(&self.artifact_dir)
            .map_err(|e| ArtifactError::io(&self.artifact_dir, e))?;

        let mut removed = 0;
        for entry in fs::read_dir(&self.artifact_dir)
            .map_err(|e| ArtifactError::io(&self.artifact_dir, e))?
        {
            let entry = entry.map_err(|e| ArtifactError::io(&self.artifact_dir, e))?;
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map_err(|e| ArtifactError::io(&path, e))?
                .is_dir();

            let result = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ArtifactError::io(&path, e)),
            }
        }

        debug!(dir = %self.artifact_dir.display(), removed, "cleared profiler artifacts");
        Ok(removed)
    }

    /// The most recently written artifact.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::NotFound` when the directory holds no artifact.
    pub fn latest_artifact(&self) -> Result<ProfilerArtifact, ArtifactError> {
        let entries = match fs::read_dir(&self.artifact_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    dir: self.artifact_dir.clone(),
                });
            }
            Err(e) => return Err(ArtifactError::io(&self.artifact_dir, e)),
        };

        let mut latest: Option<ProfilerArtifact> = None;
        for entry in entries {
            let entry = entry.map_err(|e| ArtifactError::io(&self.artifact_dir, e))?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|name| name.strip_prefix(ARTIFACT_PREFIX))
                .filter(|id| !id.is_empty())
            else {
                continue;
            };

            let path = entry.path();
            let metadata = entry.metadata().map_err(|e| ArtifactError::io(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(|e| ArtifactError::io(&path, e))?;

            let candidate = ProfilerArtifact {
                id: id.to_string(),
                path,
                modified,
            };
            let newer = latest.as_ref().is_none_or(|current| {
                (candidate.modified, &candidate.id) > (current.modified, &current.id)
            });
            if newer {
                latest = Some(candidate);
            }
        }

        latest.ok_or_else(|| ArtifactError::NotFound {
            dir: self.artifact_dir.clone(),
        })
    }

    /// Results URL for an artifact id on this target.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Url` if the host does not form a valid URL.
    pub fn results_url(&self, id: &str) -> Result<Url, ArtifactError> {
        let mut url = Url::parse(&format!("http://{}:{}", self.host, self.port))?;
        url.set_path(RESULTS_PATH);
        url.query_pairs_mut().append_pair("id", id);
        Ok(url)
    }

    /// Publish the newest artifact where the target serves results from and
    /// return its URL. Call only after the profiled request completed.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::NotFound` if the request left no artifact, or
    /// `ArtifactError::Io` if it cannot be moved.
    pub fn latest_profiler_url(&self) -> Result<String, ArtifactError> {
        let artifact = self.latest_artifact()?;
        let url = self.results_url(&artifact.id)?;
        self.publish(&artifact)?;

        debug!(id = %artifact.id, url = %url, "resolved profiler artifact");
        Ok(url.to_string())
    }

    fn publish(&self, artifact: &ProfilerArtifact) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.published_dir)
            .map_err(|e| ArtifactError::io(&self.published_dir, e))?;

        let file_name = format!("{ARTIFACT_PREFIX}{}", artifact.id);
        let destination = self.published_dir.join(file_name);
        if fs::rename(&artifact.path, &destination).is_ok() {
            return Ok(());
        }

        // Different filesystems: copy, then drop the original.
        fs::copy(&artifact.path, &destination).map_err(|e| ArtifactError::io(&destination, e))?;
        fs::remove_file(&artifact.path).map_err(|e| ArtifactError::io(&artifact.path, e))
    }
}
