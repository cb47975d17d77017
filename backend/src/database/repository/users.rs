use super::Repository;
use crate::database::models::{NewUser, User, UserUpdate};
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::types::Json;

impl Repository {
    /// Create a user account
    pub async fn create_user(&self, req: &NewUser) -> Result<User> {
        let now = Utc::now();

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, hashed_password, is_admin, is_active,
                               permissions, onboarding_completed, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, 0, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&req.username)
        .bind(&req.email)
        .bind(&req.hashed_password)
        .bind(req.is_admin)
        .bind(req.permissions.as_ref().map(Json))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created user: {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        self.find_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Look up an email, optionally ignoring one user (for updates)
    pub async fn email_taken(&self, email: &str, except_user: Option<i64>) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
                .bind(email)
                .bind(except_user.unwrap_or(0))
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    /// List users, newest first
    pub async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Apply the provided fields of a user update
    pub async fn update_user(&self, id: i64, req: &UserUpdate) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                email = COALESCE(?, email),
                is_admin = COALESCE(?, is_admin),
                is_active = COALESCE(?, is_active),
                permissions = COALESCE(?, permissions),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&req.email)
        .bind(req.is_admin)
        .bind(req.is_active)
        .bind(req.permissions.as_ref().map(Json))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        tracing::debug!("Updated user: {}", id);
        Ok(user)
    }

    pub async fn set_password_hash(&self, id: i64, hashed_password: &str) -> Result<()> {
        sqlx::query("UPDATE users SET hashed_password = ?, updated_at = ? WHERE id = ?")
            .bind(hashed_password)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_last_login(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete a user and everything they own.
    ///
    /// Removes shares on either side, views, members and trees before the
    /// account itself, in one transaction. Audit logs and backup records
    /// keep the dangling user id.
    pub async fn delete_user_cascade(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM tree_shares
            WHERE shared_by_user_id = ?1
               OR shared_with_user_id = ?1
               OR tree_id IN (SELECT id FROM family_trees WHERE user_id = ?1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tree_views WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM family_members
            WHERE user_id = ?1
               OR tree_id IN (SELECT id FROM family_trees WHERE user_id = ?1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM family_trees WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        tracing::debug!("Deleted user {} with cascade", id);
        Ok(rows > 0)
    }

    pub async fn count_users(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_active_users(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_admins(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin = 1")
            .fetch_one(&self.pool)
            .await?)
    }
}
