//! Tree views service
//!
//! Saved layouts and filter presets. Views belong to one user and are never
//! shared.

use crate::database::{NewTreeView, Repository, TreeView, TreeViewUpdate};
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct TreeViewsService {
    repo: Repository,
}

impl TreeViewsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn list(&self, owner: i64) -> Result<Vec<TreeView>> {
        self.repo.list_views(owner).await
    }

    pub async fn get(&self, owner: i64, id: i64) -> Result<TreeView> {
        self.repo.get_view(owner, id).await
    }

    pub async fn create(&self, owner: i64, req: NewTreeView) -> Result<TreeView> {
        if req.name.trim().is_empty() {
            return Err(AppError::Validation("View name is required".to_string()));
        }

        let view = self.repo.create_view(owner, &req).await?;
        tracing::info!("Tree view created: {} ({})", view.name, view.id);
        Ok(view)
    }

    pub async fn update(&self, owner: i64, id: i64, req: TreeViewUpdate) -> Result<TreeView> {
        self.repo.update_view(owner, id, &req).await
    }

    pub async fn delete(&self, owner: i64, id: i64) -> Result<()> {
        if !self.repo.delete_view(owner, id).await? {
            return Err(AppError::NotFound("Tree view".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repository::test_support::{create_test_repo, create_user};

    #[tokio::test]
    async fn test_view_lifecycle() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let service = TreeViewsService::new(repo);

        let view = service
            .create(
                user.id,
                NewTreeView {
                    name: "Compact".to_string(),
                    is_default: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let renamed = service
            .update(
                user.id,
                view.id,
                TreeViewUpdate {
                    name: Some("Wide".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Wide");
        assert!(renamed.is_default);

        service.delete(user.id, view.id).await.unwrap();
        assert!(service.list(user.id).await.unwrap().is_empty());
        assert!(matches!(
            service.delete(user.id, view.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let service = TreeViewsService::new(repo);

        let result = service
            .create(
                user.id,
                NewTreeView {
                    name: "  ".to_string(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
