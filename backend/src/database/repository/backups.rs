use super::Repository;
use crate::database::models::{Backup, BackupStatus, BackupType};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};

impl Repository {
    /// Record a backup artifact
    pub async fn record_backup(
        &self,
        filename: &str,
        backup_type: BackupType,
        file_size: i64,
        created_by: i64,
        status: BackupStatus,
    ) -> Result<Backup> {
        let backup = sqlx::query_as::<_, Backup>(
            r#"
            INSERT INTO backups (filename, backup_type, file_size, created_by, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(filename)
        .bind(backup_type.as_str())
        .bind(file_size)
        .bind(created_by)
        .bind(status.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Recorded backup: {} ({})", backup.filename, backup.id);
        Ok(backup)
    }

    /// Newest first
    pub async fn list_backups(&self, skip: i64, limit: i64) -> Result<Vec<Backup>> {
        let backups = sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        Ok(backups)
    }

    pub async fn find_backup(&self, id: i64) -> Result<Option<Backup>> {
        let backup = sqlx::query_as::<_, Backup>("SELECT * FROM backups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(backup)
    }

    pub async fn get_backup(&self, id: i64) -> Result<Backup> {
        self.find_backup(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Backup".to_string()))
    }

    pub async fn delete_backup_record(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Records created strictly before `cutoff`, oldest first
    pub async fn backups_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        let backups = sqlx::query_as::<_, Backup>(
            "SELECT * FROM backups WHERE created_at < ? ORDER BY created_at, id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(backups)
    }
}
