//! Replication of backup artifacts to network shares
//!
//! A share receives a plain copy of an artifact when it is enabled and its
//! mount point is live. Outcomes are reported per destination and never fail
//! the calling operation.

use crate::config::{BackupSettings, ShareSettings};
use serde::Serialize;
use std::path::Path;

pub const STATUS_COPIED: &str = "copied";
pub const STATUS_NOT_MOUNTED: &str = "not_mounted";

/// Outcome of copying one artifact to one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replica {
    pub destination: String,
    pub status: String,
}

impl Replica {
    pub fn is_copied(&self) -> bool {
        self.status == STATUS_COPIED
    }
}

/// Whether `path` is the root of a mounted file system.
///
/// A directory whose device differs from its parent's is a mount point. The
/// file system root counts as mounted.
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }

    match path.canonicalize().ok().as_deref().and_then(Path::parent) {
        Some(parent) => std::fs::metadata(parent)
            .map(|parent_meta| parent_meta.dev() != meta.dev())
            .unwrap_or(false),
        None => true,
    }
}

#[cfg(not(unix))]
pub fn is_mount_point(path: &Path) -> bool {
    path.is_dir()
}

/// Copy `artifact` to every enabled, mounted share
pub async fn replicate(artifact: &Path, settings: &BackupSettings) -> Vec<Replica> {
    replicate_with(artifact, settings, is_mount_point).await
}

/// [`replicate`] with an explicit mount check
pub async fn replicate_with<F>(artifact: &Path, settings: &BackupSettings, mounted: F) -> Vec<Replica>
where
    F: Fn(&Path) -> bool,
{
    let mut replicas = Vec::new();

    for (name, share) in [("smb", &settings.smb), ("nfs", &settings.nfs)] {
        if !share.enabled {
            continue;
        }

        let status = copy_to(artifact, share, &mounted).await;
        if status == STATUS_COPIED {
            tracing::info!("Replicated {:?} to {} share", artifact, name);
        } else {
            tracing::warn!("Replication of {:?} to {} share: {}", artifact, name, status);
        }

        replicas.push(Replica {
            destination: name.to_string(),
            status,
        });
    }

    replicas
}

async fn copy_to<F>(artifact: &Path, share: &ShareSettings, mounted: &F) -> String
where
    F: Fn(&Path) -> bool,
{
    if !mounted(&share.mount_point) {
        return STATUS_NOT_MOUNTED.to_string();
    }

    let Some(file_name) = artifact.file_name() else {
        return "failed: artifact has no file name".to_string();
    };

    match tokio::fs::copy(artifact, share.mount_point.join(file_name)).await {
        Ok(_) => STATUS_COPIED.to_string(),
        Err(e) => format!("failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::TempDir;

    fn settings(dir: &Path) -> BackupSettings {
        let mut backup = Settings::rooted_at(dir).backup;
        backup.smb.enabled = true;
        backup.nfs.enabled = true;
        backup
    }

    #[tokio::test]
    async fn test_statuses_per_destination() {
        let dir = TempDir::new().unwrap();
        let backup = settings(dir.path());
        std::fs::create_dir_all(&backup.smb.mount_point).unwrap();

        let artifact = dir.path().join("backup_database_20240101_000000.sql");
        std::fs::write(&artifact, "-- dump").unwrap();

        let smb_mount = backup.smb.mount_point.clone();
        let replicas = replicate_with(&artifact, &backup, |p| p == smb_mount).await;

        assert_eq!(
            replicas,
            vec![
                Replica {
                    destination: "smb".to_string(),
                    status: "copied".to_string(),
                },
                Replica {
                    destination: "nfs".to_string(),
                    status: "not_mounted".to_string(),
                },
            ]
        );
        assert!(smb_mount
            .join("backup_database_20240101_000000.sql")
            .exists());
    }

    #[tokio::test]
    async fn test_copy_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let mut backup = settings(dir.path());
        backup.nfs.enabled = false;

        // Mount check passes but the directory does not exist
        let artifact = dir.path().join("a.sql");
        std::fs::write(&artifact, "x").unwrap();
        let replicas = replicate_with(&artifact, &backup, |_| true).await;

        assert_eq!(replicas.len(), 1);
        assert!(replicas[0].status.starts_with("failed: "));
        assert!(!replicas[0].is_copied());
    }

    #[tokio::test]
    async fn test_disabled_shares_skipped() {
        let dir = TempDir::new().unwrap();
        let backup = Settings::rooted_at(dir.path()).backup;
        let artifact = dir.path().join("a.sql");
        std::fs::write(&artifact, "x").unwrap();

        assert!(replicate(&artifact, &backup).await.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_directory_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("share");
        std::fs::create_dir(&sub).unwrap();

        assert!(!is_mount_point(&sub));
        assert!(!is_mount_point(&dir.path().join("missing")));
        assert!(is_mount_point(Path::new("/")));
    }
}
