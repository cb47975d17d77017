//! Backup service
//!
//! Creates point-in-time exports of the record store and the deployment
//! configuration, replicates them to network shares, and restores exports
//! behind a safety snapshot of the current state.
//!
//! A backup record is written only once its artifact exists on disk. Files
//! produced along the way are owned by a [`TempFiles`] guard until the
//! operation succeeds, so failures never leave partial artifacts behind.

use crate::config::{redact_connection_string, Settings, APP_VERSION, REDACTED};
use crate::crypto;
use crate::database::{Backup, BackupStatus, BackupType, LogLevel, Repository};
use crate::error::{AppError, Result};
use crate::services::audit::{AuditEntry, AuditLog};
use crate::services::dump::DumpTool;
use crate::services::replication::{self, Replica};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Same-second artifacts get a numeric suffix; give up after this many
const NAME_ATTEMPTS: u32 = 100;

/// Every file an artifact stem can produce
const ARTIFACT_EXTENSIONS: [&str; 4] = [".sql", ".json", ".sql.encrypted", ".json.encrypted"];

/// Result of a successful `create`
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub backup: Backup,
    pub checksum: String,
    pub encrypted: bool,
    pub replicas: Vec<Replica>,
}

/// Result of a successful `restore`
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_from: String,
    /// Rollback point taken before the restore was applied
    pub snapshot: Option<Backup>,
}

/// Config backup document
#[derive(Debug, Serialize)]
struct ConfigDocument {
    version: String,
    timestamp: String,
    settings: Value,
    database_url: String,
    deployment_files: BTreeMap<String, String>,
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    repo: Repository,
    audit: AuditLog,
    tools: Arc<dyn DumpTool>,
    settings: Arc<Settings>,
}

impl BackupService {
    pub fn new(
        repo: Repository,
        audit: AuditLog,
        tools: Arc<dyn DumpTool>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            repo,
            audit,
            tools,
            settings,
        }
    }

    fn backup_dir(&self) -> &Path {
        &self.settings.backup.backup_dir
    }

    /// Create a `database`, `config` or `full` backup.
    ///
    /// With a password, the primary artifact is replaced by its encrypted
    /// form. Replication runs last and only reports.
    pub async fn create(
        &self,
        kind: &str,
        created_by: i64,
        password: Option<&str>,
    ) -> Result<BackupOutcome> {
        let backup_type = kind.parse::<BackupType>().map_err(AppError::Validation)?;
        if backup_type == BackupType::Snapshot {
            return Err(AppError::Validation(
                "Snapshots are only taken before a restore".to_string(),
            ));
        }

        tracing::info!("Creating {} backup", backup_type);

        match self.write_artifacts(backup_type, password).await {
            Ok((primary, encrypted)) => {
                self.finish_create(backup_type, primary, encrypted, created_by)
                    .await
            }
            Err(e) => {
                self.audit
                    .record(
                        LogLevel::Error,
                        &format!("Backup creation failed: {}", e),
                        AuditEntry {
                            user_id: Some(created_by),
                            action: Some("backup_failed"),
                            details: Some(json!({ "backup_type": backup_type.as_str() })),
                            ..Default::default()
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Produce the artifacts of one backup; returns the primary artifact
    async fn write_artifacts(
        &self,
        backup_type: BackupType,
        password: Option<&str>,
    ) -> Result<(PathBuf, bool)> {
        fs::create_dir_all(self.backup_dir()).await?;

        let mut pending = TempFiles::default();

        let primary = match backup_type {
            BackupType::Database => {
                let path = self.claim_artifact("backup_database", ".sql").await?;
                pending.track(path.clone());
                self.tools.dump(&path).await?;
                path
            }
            BackupType::Config => {
                let path = self.claim_artifact("backup_config", ".json").await?;
                pending.track(path.clone());
                self.write_config_document(&path).await?;
                path
            }
            BackupType::Full => {
                let sql = self.claim_artifact("backup_full", ".sql").await?;
                let config = sql.with_extension("json");
                pending.track(sql.clone());
                pending.track(config.clone());
                self.tools.dump(&sql).await?;
                self.write_config_document(&config).await?;
                pending.keep(&config);
                sql
            }
            BackupType::Snapshot => {
                return Err(AppError::Validation("Invalid backup type: snapshot".to_string()))
            }
        };

        let primary = match password {
            Some(password) => {
                let encrypted = crypto::encrypt_file(&primary, password).await?;
                pending.track(encrypted.clone());
                fs::remove_file(&primary).await?;
                encrypted
            }
            None => primary,
        };

        pending.keep(&primary);
        Ok((primary, password.is_some()))
    }

    async fn finish_create(
        &self,
        backup_type: BackupType,
        primary: PathBuf,
        encrypted: bool,
        created_by: i64,
    ) -> Result<BackupOutcome> {
        let data = fs::read(&primary).await?;
        let checksum = calculate_checksum(&data);
        let filename = file_name(&primary)?;

        let replicas = replication::replicate(&primary, &self.settings.backup).await;

        let backup = self
            .repo
            .record_backup(
                &filename,
                backup_type,
                data.len() as i64,
                created_by,
                BackupStatus::Completed,
            )
            .await?;

        self.audit
            .record(
                LogLevel::Info,
                &format!("Backup created: {}", filename),
                AuditEntry {
                    user_id: Some(created_by),
                    action: Some("backup_created"),
                    details: Some(json!({
                        "backup_id": backup.id,
                        "file_size": backup.file_size,
                        "checksum": checksum,
                        "encrypted": encrypted,
                        "replicas": replicas,
                    })),
                    ..Default::default()
                },
            )
            .await;

        tracing::info!("Backup created: {} ({} bytes)", filename, backup.file_size);

        Ok(BackupOutcome {
            backup,
            checksum,
            encrypted,
            replicas,
        })
    }

    /// Dump the current state as a rollback point
    pub async fn snapshot(&self, reason: &str, created_by: i64) -> Result<Backup> {
        fs::create_dir_all(self.backup_dir()).await?;

        let prefix = format!("snapshot_before_{}", sanitize_reason(reason));
        let path = self.claim_artifact(&prefix, ".sql").await?;

        let mut pending = TempFiles::default();
        pending.track(path.clone());
        let filename = file_name(&path)?;

        if let Err(e) = self.tools.dump(&path).await {
            self.audit
                .record(
                    LogLevel::Error,
                    &format!("Snapshot failed: {}", e),
                    AuditEntry {
                        user_id: Some(created_by),
                        action: Some("snapshot_failed"),
                        ..Default::default()
                    },
                )
                .await;
            return Err(e);
        }

        let size = fs::metadata(&path).await?.len() as i64;
        let backup = self
            .repo
            .record_backup(
                &filename,
                BackupType::Snapshot,
                size,
                created_by,
                BackupStatus::Completed,
            )
            .await?;
        pending.keep(&path);

        tracing::info!("Snapshot created: {}", filename);
        Ok(backup)
    }

    /// Replay an uploaded dump into the live store.
    ///
    /// The snapshot, when requested, is recorded before anything else
    /// happens and its failure aborts the restore. Encrypted uploads are
    /// decrypted first; a wrong password stops here without touching data.
    pub async fn restore(
        &self,
        upload_name: &str,
        payload: &[u8],
        password: Option<&str>,
        create_snapshot: bool,
        user: i64,
    ) -> Result<RestoreOutcome> {
        tracing::info!("Restoring from upload: {}", upload_name);

        let snapshot = if create_snapshot {
            match self.snapshot("restore", user).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    return Err(AppError::Backup(format!(
                        "Pre-restore snapshot failed, restore aborted: {}",
                        e
                    )))
                }
            }
        } else {
            None
        };
        let snapshot_name = snapshot.as_ref().map(|s| s.filename.clone());

        fs::create_dir_all(self.backup_dir()).await?;
        let mut temp = TempFiles::default();

        let encrypted = password.is_some() || crypto::is_encrypted_name(upload_name);
        let upload_path = self.artifact(&format!(
            "restore_upload_{}{}",
            uuid::Uuid::new_v4().simple(),
            if encrypted { ".sql.encrypted" } else { ".sql" }
        ));
        temp.track(upload_path.clone());
        fs::write(&upload_path, payload).await?;

        let dump_path = if encrypted {
            let password = password.ok_or_else(|| {
                AppError::Validation("Password required for encrypted backup".to_string())
            })?;
            let decrypted = crypto::decrypt_file(&upload_path, password).await?;
            temp.track(decrypted.clone());
            decrypted
        } else {
            upload_path
        };

        if let Err(e) = self.tools.restore(&dump_path).await {
            self.audit
                .record(
                    LogLevel::Error,
                    &format!("Restore from {} failed: {}", upload_name, e),
                    AuditEntry {
                        user_id: Some(user),
                        action: Some("restore_failed"),
                        details: Some(json!({ "snapshot": snapshot_name })),
                        ..Default::default()
                    },
                )
                .await;

            return Err(AppError::RestoreFailed {
                message: e.to_string(),
                snapshot: snapshot_name,
            });
        }

        self.audit
            .record(
                LogLevel::Warning,
                &format!("Database restored from {}", upload_name),
                AuditEntry {
                    user_id: Some(user),
                    action: Some("restore_completed"),
                    details: Some(json!({ "snapshot": snapshot_name })),
                    ..Default::default()
                },
            )
            .await;

        Ok(RestoreOutcome {
            restored_from: upload_name.to_string(),
            snapshot,
        })
    }

    /// Restore one of the stored artifacts
    pub async fn restore_backup(
        &self,
        id: i64,
        password: Option<&str>,
        create_snapshot: bool,
        user: i64,
    ) -> Result<RestoreOutcome> {
        let path = self.artifact_path(id).await?;
        let payload = fs::read(&path).await?;
        let name = file_name(&path)?;

        self.restore(&name, &payload, password, create_snapshot, user)
            .await
    }

    /// Newest first
    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Backup>> {
        self.repo.list_backups(skip, limit).await
    }

    pub async fn get(&self, id: i64) -> Result<Backup> {
        self.repo.get_backup(id).await
    }

    /// Location of a backup's artifact for download
    pub async fn artifact_path(&self, id: i64) -> Result<PathBuf> {
        let backup = self.repo.get_backup(id).await?;
        let path = self.artifact(&backup.filename);

        if !fs::try_exists(&path).await? {
            return Err(AppError::NotFound("Backup file".to_string()));
        }
        Ok(path)
    }

    /// Delete a backup's files and record
    pub async fn delete(&self, id: i64, user: i64) -> Result<()> {
        let backup = self.repo.get_backup(id).await?;
        self.remove_artifacts(&backup).await;
        self.repo.delete_backup_record(id).await?;

        self.audit
            .record(
                LogLevel::Warning,
                &format!("Backup deleted: {}", backup.filename),
                AuditEntry {
                    user_id: Some(user),
                    action: Some("backup_deleted"),
                    details: Some(json!({ "backup_id": id })),
                    ..Default::default()
                },
            )
            .await;

        Ok(())
    }

    /// Remove backups older than the retention period.
    ///
    /// A retention of zero days keeps everything.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        let days = self.settings.backup.retention_days;
        if days == 0 {
            return Ok(Vec::new());
        }

        let cutoff = now - Duration::days(i64::from(days));
        let expired = self.repo.backups_older_than(cutoff).await?;

        for backup in &expired {
            tracing::info!("Purging expired backup: {}", backup.filename);
            self.remove_artifacts(backup).await;
            self.repo.delete_backup_record(backup.id).await?;
        }

        if !expired.is_empty() {
            self.audit
                .record(
                    LogLevel::Info,
                    &format!("Purged {} expired backups", expired.len()),
                    AuditEntry {
                        action: Some("backup_purged"),
                        details: Some(json!({ "retention_days": days })),
                        ..Default::default()
                    },
                )
                .await;
        }

        Ok(expired)
    }

    async fn remove_artifacts(&self, backup: &Backup) {
        let mut names = vec![backup.filename.clone()];
        names.extend(companion_config(&backup.filename));

        for name in names {
            let path = self.artifact(&name);
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
            }
        }
    }

    async fn write_config_document(&self, path: &Path) -> Result<()> {
        let mut deployment_files = BTreeMap::new();
        for file in &self.settings.backup.deployment_files {
            match fs::read_to_string(file).await {
                Ok(contents) => {
                    let name = file_name(file)?;
                    deployment_files.insert(name, contents);
                }
                Err(e) => tracing::debug!("Deployment file {:?} not embedded: {}", file, e),
            }
        }

        let document = ConfigDocument {
            version: APP_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            settings: redacted_settings(&self.settings)?,
            database_url: redact_connection_string(&self.settings.database.connection_string()),
            deployment_files,
        };

        fs::write(path, serde_json::to_vec_pretty(&document)?).await?;
        Ok(())
    }

    fn artifact(&self, filename: &str) -> PathBuf {
        self.backup_dir().join(filename)
    }

    /// Reserve `<prefix>_<timestamp><extension>` in the backup directory,
    /// adding `_1`, `_2`, ... when an artifact with that stem already
    /// exists. The file is created empty so a concurrent backup within the
    /// same second cannot claim it too.
    async fn claim_artifact(&self, prefix: &str, extension: &str) -> Result<PathBuf> {
        let stamp = timestamp();

        for attempt in 0..NAME_ATTEMPTS {
            let stem = match attempt {
                0 => format!("{}_{}", prefix, stamp),
                n => format!("{}_{}_{}", prefix, stamp, n),
            };
            if self.stem_in_use(&stem).await? {
                continue;
            }

            let path = self.artifact(&format!("{}{}", stem, extension));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "No free artifact name for {}_{}",
            prefix, stamp
        )))
    }

    async fn stem_in_use(&self, stem: &str) -> Result<bool> {
        for extension in ARTIFACT_EXTENSIONS {
            if fs::try_exists(self.artifact(&format!("{}{}", stem, extension))).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Files deleted when the guard goes out of scope unless kept
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Stop tracking `path`; it survives the guard
    pub fn keep(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Cleaned up {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to clean up {:?}: {}", path, e),
            }
        }
    }
}

/// Settings with every configured secret replaced by a placeholder
fn redacted_settings(settings: &Settings) -> Result<Value> {
    let mut value = serde_json::to_value(settings)?;

    if settings.database.password.is_some() {
        value["database"]["password"] = json!(REDACTED);
    }
    for (key, share) in [("smb", &settings.backup.smb), ("nfs", &settings.backup.nfs)] {
        if share.password.is_some() {
            value["backup"][key]["password"] = json!(REDACTED);
        }
    }

    Ok(value)
}

/// The `.json` written next to a full backup's dump
fn companion_config(filename: &str) -> Option<String> {
    if !filename.starts_with("backup_full_") {
        return None;
    }
    let base = filename
        .strip_suffix(crate::config::ENCRYPTED_SUFFIX)
        .unwrap_or(filename);
    base.strip_suffix(".sql").map(|stem| format!("{}.json", stem))
}

fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();

    if cleaned.is_empty() {
        "manual".to_string()
    } else {
        cleaned
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Backup(format!("No file name in {:?}", path)))
}

fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpBackend;
    use crate::database::repository::test_support::create_test_repo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DUMP: &str = "-- dump of the live store\nCREATE TABLE t (id INTEGER);\n";

    /// Dump tool double: writes a fixed dump, can be told to fail, and
    /// records what the store looked like when a restore was applied
    struct FakeTool {
        repo: Repository,
        fail_dump: AtomicBool,
        fail_restore: AtomicBool,
        restored: Mutex<Vec<String>>,
        snapshots_at_restore: Mutex<Option<usize>>,
    }

    impl FakeTool {
        fn new(repo: Repository) -> Self {
            Self {
                repo,
                fail_dump: AtomicBool::new(false),
                fail_restore: AtomicBool::new(false),
                restored: Mutex::new(Vec::new()),
                snapshots_at_restore: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DumpTool for FakeTool {
        async fn dump(&self, out: &Path) -> Result<()> {
            if self.fail_dump.load(Ordering::SeqCst) {
                std::fs::write(out, "-- partial")?;
                return Err(AppError::Process {
                    program: "pg_dump".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            std::fs::write(out, DUMP)?;
            Ok(())
        }

        async fn restore(&self, input: &Path) -> Result<()> {
            let snapshots = self
                .repo
                .list_backups(0, 100)
                .await?
                .iter()
                .filter(|b| b.backup_type == "snapshot")
                .count();
            *self.snapshots_at_restore.lock().unwrap() = Some(snapshots);

            if self.fail_restore.load(Ordering::SeqCst) {
                return Err(AppError::Process {
                    program: "psql".to_string(),
                    message: "syntax error at line 1".to_string(),
                });
            }

            let contents = std::fs::read_to_string(input)?;
            self.restored.lock().unwrap().push(contents);
            Ok(())
        }
    }

    struct Fixture {
        service: BackupService,
        tool: Arc<FakeTool>,
        repo: Repository,
        dir: TempDir,
    }

    impl Fixture {
        fn backup_dir(&self) -> PathBuf {
            self.dir.path().join("backups")
        }

        fn files(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.backup_dir())
                .map(|entries| {
                    entries
                        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
        }
    }

    async fn fixture_with(configure: impl FnOnce(&mut Settings, &Path)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::rooted_at(dir.path());
        configure(&mut settings, dir.path());

        let repo = create_test_repo().await;
        let tool = Arc::new(FakeTool::new(repo.clone()));
        let service = BackupService::new(
            repo.clone(),
            AuditLog::new(repo.clone()),
            tool.clone(),
            Arc::new(settings),
        );

        Fixture {
            service,
            tool,
            repo,
            dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(|_, _| {}).await
    }

    #[tokio::test]
    async fn test_create_database_backup() {
        let fx = fixture().await;

        let outcome = fx.service.create("database", 1, None).await.unwrap();

        assert!(outcome.backup.filename.starts_with("backup_database_"));
        assert!(outcome.backup.filename.ends_with(".sql"));
        assert_eq!(outcome.backup.backup_type, "database");
        assert_eq!(outcome.backup.status, "completed");
        assert_eq!(outcome.backup.file_size, DUMP.len() as i64);
        assert_eq!(outcome.checksum, calculate_checksum(DUMP.as_bytes()));
        assert!(outcome.replicas.is_empty());
        assert_eq!(fx.files(), vec![outcome.backup.filename.clone()]);

        let logs = fx.repo.recent_logs(10).await.unwrap();
        assert_eq!(logs[0].action.as_deref(), Some("backup_created"));
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_no_record_or_file() {
        let fx = fixture().await;
        fx.tool.fail_dump.store(true, Ordering::SeqCst);

        for kind in ["database", "full"] {
            let err = fx.service.create(kind, 1, None).await.unwrap_err();
            assert!(err.to_string().contains("connection refused"));
        }

        assert!(fx.service.list(0, 100).await.unwrap().is_empty());
        assert!(fx.files().is_empty());

        let errors = fx
            .repo
            .list_logs(0, 10, Some(LogLevel::Error))
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|l| l.action.as_deref() == Some("backup_failed")));
    }

    #[tokio::test]
    async fn test_back_to_back_backups_get_distinct_artifacts() {
        let fx = fixture().await;

        let first = fx.service.create("database", 1, None).await.unwrap();
        let second = fx.service.create("database", 1, None).await.unwrap();
        let full_a = fx.service.create("full", 1, None).await.unwrap();
        let full_b = fx.service.create("full", 1, None).await.unwrap();

        let names = [
            &first.backup.filename,
            &second.backup.filename,
            &full_a.backup.filename,
            &full_b.backup.filename,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // Each full dump keeps its own config companion
        assert_eq!(fx.files().len(), 6);

        fx.service.delete(first.backup.id, 1).await.unwrap();
        fx.service.delete(full_a.backup.id, 1).await.unwrap();

        let path = fx.service.artifact_path(second.backup.id).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), DUMP);
        let path = fx.service.artifact_path(full_b.backup.id).await.unwrap();
        assert!(path.exists());
        let companion = companion_config(&full_b.backup.filename).unwrap();
        assert!(fx.backup_dir().join(companion).exists());
        assert_eq!(fx.files().len(), 3);
    }

    #[tokio::test]
    async fn test_same_second_snapshots_do_not_overwrite() {
        let fx = fixture().await;

        let first = fx.service.snapshot("restore", 1).await.unwrap();
        let second = fx.service.snapshot("restore", 1).await.unwrap();

        assert_ne!(first.filename, second.filename);
        assert_eq!(fx.files().len(), 2);
    }

    #[tokio::test]
    async fn test_claim_artifact_adds_suffix_for_taken_stem() {
        let fx = fixture().await;
        std::fs::create_dir_all(fx.backup_dir()).unwrap();

        let first = fx.service.claim_artifact("backup_database", ".sql").await.unwrap();
        let stem = file_name(&first).unwrap().trim_end_matches(".sql").to_string();
        // An encrypted artifact with the same stem also blocks the name
        std::fs::remove_file(&first).unwrap();
        std::fs::write(fx.backup_dir().join(format!("{}.sql.encrypted", stem)), b"x").unwrap();

        let second = fx.service.claim_artifact("backup_database", ".sql").await.unwrap();
        let second = file_name(&second).unwrap();
        assert_ne!(second, format!("{}.sql", stem));
        assert!(second.starts_with("backup_database_"));
    }

    #[tokio::test]
    async fn test_invalid_backup_types_rejected() {
        let fx = fixture().await;

        for kind in ["snapshot", "incremental", ""] {
            let result = fx.service.create(kind, 1, None).await;
            assert!(matches!(result, Err(AppError::Validation(_))), "{}", kind);
        }
        assert!(fx.service.list(0, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_backup_is_redacted() {
        let fx = fixture_with(|settings, dir| {
            settings.database.dump_backend = DumpBackend::Postgres;
            settings.database.password = Some("db-secret-pw".to_string());
            settings.backup.smb.password = Some("smb-secret-pw".to_string());

            let compose = dir.join("docker-compose.yml");
            std::fs::write(&compose, "services:\n  web: {}\n").unwrap();
            settings.backup.deployment_files = vec![compose, dir.join("missing.yml")];
        })
        .await;

        let outcome = fx.service.create("config", 1, None).await.unwrap();
        assert!(outcome.backup.filename.starts_with("backup_config_"));
        assert!(outcome.backup.filename.ends_with(".json"));

        let text =
            std::fs::read_to_string(fx.backup_dir().join(&outcome.backup.filename)).unwrap();
        assert!(!text.contains("db-secret-pw"));
        assert!(!text.contains("smb-secret-pw"));

        let doc: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["version"], APP_VERSION);
        assert_eq!(
            doc["database_url"],
            format!("postgresql://postgres:{}@localhost:5432/familytree", REDACTED)
        );
        assert_eq!(doc["settings"]["backup"]["smb"]["password"], REDACTED);
        assert_eq!(
            doc["deployment_files"]["docker-compose.yml"],
            "services:\n  web: {}\n"
        );
        assert!(doc["deployment_files"].get("missing.yml").is_none());
    }

    #[tokio::test]
    async fn test_full_backup_writes_dump_and_config() {
        let fx = fixture().await;

        let outcome = fx.service.create("full", 1, None).await.unwrap();
        let sql = outcome.backup.filename.clone();
        assert!(sql.starts_with("backup_full_") && sql.ends_with(".sql"));
        assert_eq!(outcome.backup.backup_type, "full");

        let json = companion_config(&sql).unwrap();
        assert_eq!(fx.files(), vec![json.clone(), sql.clone()]);

        fx.service.delete(outcome.backup.id, 1).await.unwrap();
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_backup_replaces_plaintext() {
        let fx = fixture().await;

        let outcome = fx
            .service
            .create("database", 1, Some("artifact-pass"))
            .await
            .unwrap();

        assert!(outcome.encrypted);
        assert!(outcome.backup.filename.ends_with(".sql.encrypted"));
        assert_eq!(fx.files(), vec![outcome.backup.filename.clone()]);

        let data = std::fs::read(fx.backup_dir().join(&outcome.backup.filename)).unwrap();
        assert_eq!(
            crypto::decrypt(&data, "artifact-pass").unwrap(),
            DUMP.as_bytes()
        );
    }

    #[tokio::test]
    async fn test_unmounted_share_does_not_fail_backup() {
        let fx = fixture_with(|settings, dir| {
            settings.backup.smb.enabled = true;
            std::fs::create_dir_all(dir.join("smb")).unwrap();
        })
        .await;

        let outcome = fx.service.create("database", 1, None).await.unwrap();
        assert_eq!(outcome.replicas.len(), 1);
        assert_eq!(outcome.replicas[0].destination, "smb");
        assert_eq!(outcome.replicas[0].status, "not_mounted");
        assert_eq!(fx.service.list(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_snapshots_before_apply() {
        let fx = fixture().await;

        let outcome = fx
            .service
            .restore("upload.sql", DUMP.as_bytes(), None, true, 1)
            .await
            .unwrap();

        assert_eq!(*fx.tool.snapshots_at_restore.lock().unwrap(), Some(1));
        assert_eq!(fx.tool.restored.lock().unwrap().as_slice(), [DUMP]);

        let snapshot = outcome.snapshot.unwrap();
        assert_eq!(snapshot.backup_type, "snapshot");
        assert!(snapshot.filename.starts_with("snapshot_before_restore_"));

        // Only the snapshot is left behind
        assert_eq!(fx.files(), vec![snapshot.filename]);
    }

    #[tokio::test]
    async fn test_failed_apply_reports_snapshot() {
        let fx = fixture().await;
        fx.tool.fail_restore.store(true, Ordering::SeqCst);

        let err = fx
            .service
            .restore("upload.sql", DUMP.as_bytes(), None, true, 1)
            .await
            .unwrap_err();

        let snapshot_name = match err {
            AppError::RestoreFailed { message, snapshot } => {
                assert!(message.contains("syntax error"));
                snapshot.unwrap()
            }
            other => panic!("expected RestoreFailed, got {:?}", other),
        };

        let backups = fx.service.list(0, 10).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].filename, snapshot_name);
        assert_eq!(fx.files(), vec![snapshot_name]);
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_restore() {
        let fx = fixture().await;
        fx.tool.fail_dump.store(true, Ordering::SeqCst);

        let result = fx
            .service
            .restore("upload.sql", DUMP.as_bytes(), None, true, 1)
            .await;

        assert!(matches!(result, Err(AppError::Backup(_))));
        assert_eq!(*fx.tool.snapshots_at_restore.lock().unwrap(), None);
        assert!(fx.service.list(0, 10).await.unwrap().is_empty());
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_snapshot() {
        let fx = fixture().await;

        let outcome = fx
            .service
            .restore("upload.sql", DUMP.as_bytes(), None, false, 1)
            .await
            .unwrap();

        assert!(outcome.snapshot.is_none());
        assert_eq!(*fx.tool.snapshots_at_restore.lock().unwrap(), Some(0));
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_restore() {
        let fx = fixture().await;
        let payload = crypto::encrypt(DUMP.as_bytes(), "upload-pass").unwrap();

        let wrong = fx
            .service
            .restore("dump.sql.encrypted", &payload, Some("not-it"), true, 1)
            .await;
        assert!(matches!(wrong, Err(AppError::Decryption)));
        assert!(fx.tool.snapshots_at_restore.lock().unwrap().is_none());

        // Encrypted name without a password
        let missing = fx
            .service
            .restore("dump.sql.encrypted", &payload, None, false, 1)
            .await;
        assert!(matches!(missing, Err(AppError::Validation(_))));

        fx.service
            .restore("dump.sql.encrypted", &payload, Some("upload-pass"), false, 1)
            .await
            .unwrap();
        assert_eq!(fx.tool.restored.lock().unwrap().as_slice(), [DUMP]);

        // The snapshot from the wrong-password attempt is all that remains
        let files = fx.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("snapshot_before_restore_"));
    }

    #[tokio::test]
    async fn test_restore_stored_backup() {
        let fx = fixture().await;
        let created = fx.service.create("database", 1, Some("pw")).await.unwrap();

        fx.service
            .restore_backup(created.backup.id, Some("pw"), false, 1)
            .await
            .unwrap();
        assert_eq!(fx.tool.restored.lock().unwrap().as_slice(), [DUMP]);
    }

    #[tokio::test]
    async fn test_artifact_path_and_delete() {
        let fx = fixture().await;
        let created = fx.service.create("database", 1, None).await.unwrap();

        let path = fx.service.artifact_path(created.backup.id).await.unwrap();
        assert!(path.exists());

        assert!(matches!(
            fx.service.artifact_path(999).await,
            Err(AppError::NotFound(_))
        ));

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            fx.service.artifact_path(created.backup.id).await,
            Err(AppError::NotFound(_))
        ));

        fx.service.delete(created.backup.id, 1).await.unwrap();
        assert!(matches!(
            fx.service.get(created.backup.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let fx = fixture_with(|settings, _| settings.backup.retention_days = 30).await;
        let created = fx.service.create("full", 1, None).await.unwrap();

        let purged = fx.service.purge_expired(Utc::now()).await.unwrap();
        assert!(purged.is_empty());

        let purged = fx
            .service
            .purge_expired(Utc::now() + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, created.backup.id);
        assert!(fx.files().is_empty());
        assert!(fx.service.list(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let fx = fixture_with(|settings, _| settings.backup.retention_days = 0).await;
        fx.service.create("database", 1, None).await.unwrap();

        let purged = fx
            .service
            .purge_expired(Utc::now() + Duration::days(3650))
            .await
            .unwrap();
        assert!(purged.is_empty());
    }

    #[test]
    fn test_temp_files_guard() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("scratch");
        let kept = dir.path().join("kept");
        std::fs::write(&scratch, "x").unwrap();
        std::fs::write(&kept, "y").unwrap();

        {
            let mut guard = TempFiles::default();
            guard.track(scratch.clone());
            guard.track(kept.clone());
            guard.track(dir.path().join("never-created"));
            guard.keep(&kept);
        }

        assert!(!scratch.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_companion_config_names() {
        assert_eq!(
            companion_config("backup_full_20240101_000000.sql").as_deref(),
            Some("backup_full_20240101_000000.json")
        );
        assert_eq!(
            companion_config("backup_full_20240101_000000.sql.encrypted").as_deref(),
            Some("backup_full_20240101_000000.json")
        );
        assert_eq!(companion_config("backup_database_20240101_000000.sql"), None);
    }

    #[test]
    fn test_sanitize_reason() {
        assert_eq!(sanitize_reason("restore"), "restore");
        assert_eq!(sanitize_reason("Pre Upgrade/2.1"), "pre_upgrade_2_1");
        assert_eq!(sanitize_reason(""), "manual");
    }
}
