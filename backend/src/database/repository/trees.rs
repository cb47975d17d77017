use super::Repository;
use crate::database::models::{
    FamilyTree, Member, NewTree, ShareDetails, TreeShare, TreeSummary, TreeUpdate,
};
use crate::error::{AppError, Result};
use chrono::Utc;
use std::collections::HashMap;

const SHARE_DETAILS_SELECT: &str = r#"
    SELECT s.id, s.tree_id, t.name AS tree_name,
           s.shared_by_user_id, by_user.username AS shared_by_username,
           s.shared_with_user_id, with_user.username AS shared_with_username,
           s.permission_level, s.is_accepted, s.created_at
    FROM tree_shares s
    JOIN family_trees t ON t.id = s.tree_id
    JOIN users by_user ON by_user.id = s.shared_by_user_id
    JOIN users with_user ON with_user.id = s.shared_with_user_id
"#;

impl Repository {
    /// Create a tree; a new default replaces the owner's previous default
    pub async fn create_tree(&self, owner: i64, req: &NewTree) -> Result<FamilyTree> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if req.is_default {
            sqlx::query("UPDATE family_trees SET is_default = 0 WHERE user_id = ?")
                .bind(owner)
                .execute(&mut *tx)
                .await?;
        }

        let tree = sqlx::query_as::<_, FamilyTree>(
            r#"
            INSERT INTO family_trees (user_id, name, description, is_default, is_active,
                                      created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.is_default)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Created tree: {} for user: {}", tree.id, owner);
        Ok(tree)
    }

    /// Tree owned by `owner`
    pub async fn find_owned_tree(&self, owner: i64, id: i64) -> Result<Option<FamilyTree>> {
        let tree = sqlx::query_as::<_, FamilyTree>(
            "SELECT * FROM family_trees WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tree)
    }

    /// Tree owned by `user` or shared with them through an accepted share
    pub async fn find_accessible_tree(&self, user: i64, id: i64) -> Result<Option<FamilyTree>> {
        let tree = sqlx::query_as::<_, FamilyTree>(
            r#"
            SELECT * FROM family_trees
            WHERE id = ?1
              AND (user_id = ?2 OR id IN (
                    SELECT tree_id FROM tree_shares
                    WHERE shared_with_user_id = ?2 AND is_accepted = 1))
            "#,
        )
        .bind(id)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tree)
    }

    /// Owned trees with member counts, oldest first
    pub async fn list_owned_trees(&self, owner: i64) -> Result<Vec<TreeSummary>> {
        let trees = sqlx::query_as::<_, TreeSummary>(
            r#"
            SELECT t.*, COUNT(m.id) AS member_count
            FROM family_trees t
            LEFT JOIN family_members m ON m.tree_id = t.id
            WHERE t.user_id = ?
            GROUP BY t.id
            ORDER BY t.id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(trees)
    }

    /// Trees shared with `user` through accepted shares, with member counts
    pub async fn list_shared_trees(&self, user: i64) -> Result<Vec<TreeSummary>> {
        let trees = sqlx::query_as::<_, TreeSummary>(
            r#"
            SELECT t.*, COUNT(m.id) AS member_count
            FROM family_trees t
            JOIN tree_shares s ON s.tree_id = t.id
            LEFT JOIN family_members m ON m.tree_id = t.id
            WHERE s.shared_with_user_id = ? AND s.is_accepted = 1
            GROUP BY t.id, s.id
            ORDER BY t.id
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(trees)
    }

    /// Apply the provided fields of a tree update for its owner
    pub async fn update_tree(&self, owner: i64, id: i64, req: &TreeUpdate) -> Result<FamilyTree> {
        let mut tx = self.pool.begin().await?;

        if req.is_default == Some(true) {
            sqlx::query("UPDATE family_trees SET is_default = 0 WHERE user_id = ? AND id != ?")
                .bind(owner)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let tree = sqlx::query_as::<_, FamilyTree>(
            r#"
            UPDATE family_trees SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                is_default = COALESCE(?, is_default),
                is_active = COALESCE(?, is_active),
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.is_default)
        .bind(req.is_active)
        .bind(Utc::now())
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Tree".to_string()))?;

        tx.commit().await?;
        Ok(tree)
    }

    /// Delete a tree, its shares and its members
    pub async fn delete_tree_cascade(&self, owner: i64, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<i64> =
            sqlx::query_scalar("SELECT id FROM family_trees WHERE id = ? AND user_id = ?")
                .bind(id)
                .bind(owner)
                .fetch_optional(&mut *tx)
                .await?;

        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM tree_shares WHERE tree_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let members = sqlx::query("DELETE FROM family_members WHERE tree_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM family_trees WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Deleted tree {} with {} members", id, members);
        Ok(true)
    }

    /// Duplicate a tree and its members for `owner`.
    ///
    /// Members are inserted first, then parent links are rewritten through
    /// the old→new id map. Parents outside the source tree are dropped.
    pub async fn copy_tree(
        &self,
        owner: i64,
        source: &FamilyTree,
        new_name: &str,
    ) -> Result<TreeSummary> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let tree = sqlx::query_as::<_, FamilyTree>(
            r#"
            INSERT INTO family_trees (user_id, name, description, is_default, is_active,
                                      created_at, updated_at)
            VALUES (?, ?, ?, 0, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(new_name)
        .bind(format!("Copy of {}", source.name))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let source_members = sqlx::query_as::<_, Member>(
            "SELECT * FROM family_members WHERE tree_id = ? ORDER BY id",
        )
        .bind(source.id)
        .fetch_all(&mut *tx)
        .await?;

        let mut id_map: HashMap<i64, i64> = HashMap::with_capacity(source_members.len());

        for old in &source_members {
            let new_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO family_members (
                    user_id, tree_id, first_name, middle_name, last_name, nickname, gender,
                    birth_date, death_date, birth_place, location, country, occupation, bio,
                    photo_url, profile_picture_data, profile_picture_mime_type, social_media,
                    previous_partners, created_at, updated_at
                )
                SELECT ?, ?, first_name, middle_name, last_name, nickname, gender,
                       birth_date, death_date, birth_place, location, country, occupation, bio,
                       photo_url, profile_picture_data, profile_picture_mime_type, social_media,
                       previous_partners, ?, ?
                FROM family_members WHERE id = ?
                RETURNING id
                "#,
            )
            .bind(owner)
            .bind(tree.id)
            .bind(now)
            .bind(now)
            .bind(old.id)
            .fetch_one(&mut *tx)
            .await?;

            id_map.insert(old.id, new_id);
        }

        for old in &source_members {
            let father = old.father_id.and_then(|id| id_map.get(&id).copied());
            let mother = old.mother_id.and_then(|id| id_map.get(&id).copied());
            if father.is_none() && mother.is_none() {
                continue;
            }

            sqlx::query("UPDATE family_members SET father_id = ?, mother_id = ? WHERE id = ?")
                .bind(father)
                .bind(mother)
                .bind(id_map[&old.id])
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "Copied tree {} -> {} ({} members)",
            source.id,
            tree.id,
            source_members.len()
        );

        Ok(TreeSummary {
            tree,
            member_count: source_members.len() as i64,
        })
    }

    pub async fn find_share(&self, tree_id: i64, shared_with: i64) -> Result<Option<TreeShare>> {
        let share = sqlx::query_as::<_, TreeShare>(
            "SELECT * FROM tree_shares WHERE tree_id = ? AND shared_with_user_id = ?",
        )
        .bind(tree_id)
        .bind(shared_with)
        .fetch_optional(&self.pool)
        .await?;

        Ok(share)
    }

    pub async fn get_share(&self, id: i64) -> Result<Option<TreeShare>> {
        let share = sqlx::query_as::<_, TreeShare>("SELECT * FROM tree_shares WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(share)
    }

    /// Create a pending share invitation
    pub async fn create_share(
        &self,
        tree_id: i64,
        shared_by: i64,
        shared_with: i64,
        permission_level: &str,
    ) -> Result<ShareDetails> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tree_shares (tree_id, shared_by_user_id, shared_with_user_id,
                                     permission_level, is_accepted, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING id
            "#,
        )
        .bind(tree_id)
        .bind(shared_by)
        .bind(shared_with)
        .bind(permission_level)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let details = sqlx::query_as::<_, ShareDetails>(&format!(
            "{} WHERE s.id = ?",
            SHARE_DETAILS_SELECT
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Shared tree {} with user {}", tree_id, shared_with);
        Ok(details)
    }

    /// Invitations awaiting the recipient's acceptance
    pub async fn pending_shares(&self, user: i64) -> Result<Vec<ShareDetails>> {
        let shares = sqlx::query_as::<_, ShareDetails>(&format!(
            "{} WHERE s.shared_with_user_id = ? AND s.is_accepted = 0 ORDER BY s.id",
            SHARE_DETAILS_SELECT
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(shares)
    }

    /// Accept an invitation addressed to `user`
    pub async fn accept_share(&self, user: i64, share_id: i64) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE tree_shares SET is_accepted = 1 WHERE id = ? AND shared_with_user_id = ?",
        )
        .bind(share_id)
        .bind(user)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    pub async fn delete_share(&self, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM tree_shares WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }
}
