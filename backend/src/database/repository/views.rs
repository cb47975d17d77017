use super::Repository;
use crate::database::models::{NewTreeView, TreeView, TreeViewUpdate};
use crate::error::{AppError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::types::Json;

impl Repository {
    /// Default view first, then newest
    pub async fn list_views(&self, owner: i64) -> Result<Vec<TreeView>> {
        let views = sqlx::query_as::<_, TreeView>(
            r#"
            SELECT * FROM tree_views
            WHERE user_id = ?
            ORDER BY is_default DESC, created_at DESC, id DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(views)
    }

    pub async fn get_view(&self, owner: i64, id: i64) -> Result<TreeView> {
        sqlx::query_as::<_, TreeView>("SELECT * FROM tree_views WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Tree view".to_string()))
    }

    /// Create a view; missing JSON settings are stored as empty objects
    pub async fn create_view(&self, owner: i64, req: &NewTreeView) -> Result<TreeView> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if req.is_default {
            sqlx::query("UPDATE tree_views SET is_default = 0 WHERE user_id = ?")
                .bind(owner)
                .execute(&mut *tx)
                .await?;
        }

        let view = sqlx::query_as::<_, TreeView>(
            r#"
            INSERT INTO tree_views (user_id, name, description, is_default, node_positions,
                                    filter_settings, thumbnail, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.is_default)
        .bind(Json(req.node_positions.clone().unwrap_or_else(empty_object)))
        .bind(Json(req.filter_settings.clone().unwrap_or_else(empty_object)))
        .bind(&req.thumbnail)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Created tree view: {} for user: {}", view.id, owner);
        Ok(view)
    }

    pub async fn update_view(&self, owner: i64, id: i64, req: &TreeViewUpdate) -> Result<TreeView> {
        let mut tx = self.pool.begin().await?;

        if req.is_default == Some(true) {
            sqlx::query("UPDATE tree_views SET is_default = 0 WHERE user_id = ? AND id != ?")
                .bind(owner)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let view = sqlx::query_as::<_, TreeView>(
            r#"
            UPDATE tree_views SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                is_default = COALESCE(?, is_default),
                node_positions = COALESCE(?, node_positions),
                filter_settings = COALESCE(?, filter_settings),
                thumbnail = COALESCE(?, thumbnail),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.is_default)
        .bind(req.node_positions.as_ref().map(Json))
        .bind(req.filter_settings.as_ref().map(Json))
        .bind(&req.thumbnail)
        .bind(Utc::now())
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Tree view".to_string()))?;

        tx.commit().await?;
        Ok(view)
    }

    pub async fn delete_view(&self, owner: i64, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM tree_views WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    pub async fn count_views(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM tree_views")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn empty_object() -> Value {
    json!({})
}
