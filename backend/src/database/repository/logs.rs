use super::Repository;
use crate::database::models::{LogLevel, SystemLog};
use crate::error::Result;
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;

impl Repository {
    pub async fn insert_log(
        &self,
        level: LogLevel,
        message: &str,
        user_id: Option<i64>,
        action: Option<&str>,
        details: Option<&Value>,
        ip_address: Option<&str>,
    ) -> Result<SystemLog> {
        let log = sqlx::query_as::<_, SystemLog>(
            r#"
            INSERT INTO system_logs (level, message, user_id, action, details, ip_address,
                                     created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(level.as_str())
        .bind(message)
        .bind(user_id)
        .bind(action)
        .bind(details.map(Json))
        .bind(ip_address)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(log)
    }

    /// Newest first, optionally filtered by level
    pub async fn list_logs(
        &self,
        skip: i64,
        limit: i64,
        level: Option<LogLevel>,
    ) -> Result<Vec<SystemLog>> {
        let logs = sqlx::query_as::<_, SystemLog>(
            r#"
            SELECT * FROM system_logs
            WHERE ?1 IS NULL OR level = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(level.map(|l| l.as_str()))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    pub async fn recent_logs(&self, count: i64) -> Result<Vec<SystemLog>> {
        self.list_logs(0, count, None).await
    }
}

#[cfg(test)]
mod tests {
    use crate::database::repository::test_support::create_test_repo;
    use crate::database::LogLevel;
    use serde_json::json;

    #[tokio::test]
    async fn test_filter_by_level() {
        let repo = create_test_repo().await;

        repo.insert_log(LogLevel::Info, "login", Some(1), Some("LOGIN"), None, None)
            .await
            .unwrap();
        repo.insert_log(
            LogLevel::Warning,
            "failed login",
            None,
            Some("LOGIN_FAILED"),
            Some(&json!({"username": "bob"})),
            Some("10.0.0.1"),
        )
        .await
        .unwrap();

        assert_eq!(repo.list_logs(0, 10, None).await.unwrap().len(), 2);

        let warnings = repo.list_logs(0, 10, Some(LogLevel::Warning)).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(
            warnings[0].details.as_ref().map(|d| d.0.clone()),
            Some(json!({"username": "bob"}))
        );
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first() {
        let repo = create_test_repo().await;
        for n in 0..5 {
            repo.insert_log(LogLevel::Info, &format!("entry {}", n), None, None, None, None)
                .await
                .unwrap();
        }

        let recent = repo.recent_logs(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "entry 4");
    }
}
