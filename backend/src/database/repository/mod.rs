//! Repository layer for database operations
//!
//! CRUD operations for all entities, split by table. Every query that
//! touches tenant data takes the owning user id so rows belonging to
//! someone else are indistinguishable from missing rows.
//!
//! Cascades that an ORM would perform implicitly are explicit,
//! transactional procedures here (`delete_user_cascade`,
//! `delete_tree_cascade`).

mod backups;
mod logs;
mod members;
mod trees;
mod users;
mod views;

use crate::error::Result;
use sqlx::SqlitePool;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// On-disk size of the record store in bytes
    pub async fn database_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;

        Ok(page_count * page_size)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::database::{memory_pool, NewUser, User};

    pub async fn create_test_repo() -> Repository {
        Repository::new(memory_pool().await)
    }

    pub async fn create_user(repo: &Repository, username: &str) -> User {
        repo.create_user(&NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            hashed_password: "$argon2id$test".to_string(),
            is_admin: false,
            permissions: None,
        })
        .await
        .unwrap()
    }
}
