//! Self-update
//!
//! Compares the running version with the one advertised by a version
//! endpoint and, on request, fast-forwards the deployment checkout. A
//! snapshot of the live store is taken before any code changes.

use crate::config::{UpdateSettings, APP_VERSION};
use crate::error::{AppError, Result};
use crate::services::backup::BackupService;
use crate::services::dump::Invocation;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body served by the version endpoint
#[derive(Deserialize, Debug)]
struct RemoteVersion {
    version: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Information about an available update
#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub current_version: String,
    /// `None` when no endpoint is configured or it could not be read
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub notes: Option<String>,
}

/// Result of an applied update
#[derive(Debug, Serialize)]
pub struct UpdateOutcome {
    pub from_version: String,
    pub to_version: String,
    pub snapshot: String,
    /// Output of the version control pull
    pub output: String,
}

#[derive(Clone)]
pub struct UpdaterService {
    settings: UpdateSettings,
    backups: BackupService,
}

impl UpdaterService {
    pub fn new(settings: UpdateSettings, backups: BackupService) -> Self {
        Self { settings, backups }
    }

    /// Check the version endpoint.
    ///
    /// An unreachable or malformed endpoint reports no update rather than
    /// failing.
    pub async fn check(&self) -> Result<VersionInfo> {
        let current_version = APP_VERSION.to_string();

        let remote = match &self.settings.version_url {
            Some(url) => self.fetch_remote(url).await,
            None => {
                tracing::debug!("No version endpoint configured");
                None
            }
        };

        Ok(match remote {
            Some(remote) => {
                let latest = remote.version.trim_start_matches('v').to_string();
                let update_available = is_newer_version(&current_version, &latest);
                tracing::info!(
                    "Current version: {}, latest: {}, update available: {}",
                    current_version,
                    latest,
                    update_available
                );

                VersionInfo {
                    current_version,
                    latest_version: Some(latest),
                    update_available,
                    notes: remote.notes,
                }
            }
            None => VersionInfo {
                current_version,
                latest_version: None,
                update_available: false,
                notes: None,
            },
        })
    }

    async fn fetch_remote(&self, url: &str) -> Option<RemoteVersion> {
        tracing::info!("Checking for updates at {}", url);

        let client = match reqwest::Client::builder()
            .user_agent(format!("familytree/{}", APP_VERSION))
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to create HTTP client: {}", e);
                return None;
            }
        };

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Version endpoint unreachable: {}", e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Version endpoint returned status: {}", status);
            return None;
        }

        match response.json().await {
            Ok(remote) => Some(remote),
            Err(e) => {
                tracing::warn!("Failed to parse version endpoint response: {}", e);
                None
            }
        }
    }

    /// Snapshot the store, then fast-forward the checkout
    pub async fn apply(&self, user: i64) -> Result<UpdateOutcome> {
        let info = self.check().await?;
        let to_version = match info.latest_version {
            Some(latest) if info.update_available => latest,
            _ => return Err(AppError::Generic("No update available".to_string())),
        };

        tracing::info!("Updating {} -> {}", info.current_version, to_version);

        let snapshot = self.backups.snapshot("update", user).await?;
        let output = pull_invocation(&self.settings).output().await?;

        tracing::info!("Update pulled: {}", output);

        Ok(UpdateOutcome {
            from_version: info.current_version,
            to_version,
            snapshot: snapshot.filename,
            output,
        })
    }
}

fn pull_invocation(settings: &UpdateSettings) -> Invocation {
    Invocation::new("git")
        .arg("-C")
        .path_arg(&settings.repo_dir)
        .arg("pull")
        .arg("--ff-only")
}

/// Compare version strings (semver format: x.y.z)
pub fn is_newer_version(current: &str, remote: &str) -> bool {
    let parse_version = |v: &str| -> Vec<u32> {
        v.trim_start_matches('v')
            .split('.')
            .filter_map(|s| s.parse().ok())
            .collect()
    };

    let current_parts = parse_version(current);
    let remote_parts = parse_version(remote);

    for i in 0..3 {
        let c = current_parts.get(i).copied().unwrap_or(0);
        let r = remote_parts.get(i).copied().unwrap_or(0);
        if r != c {
            return r > c;
        }
    }
    false
}
