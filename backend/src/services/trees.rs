//! Trees service
//!
//! Tree lifecycle plus the share workflow: an owner invites another user by
//! username, the invitation stays pending until the recipient accepts it,
//! and either side may remove it afterwards.

use crate::database::{
    NewTree, PermissionLevel, Repository, ShareDetails, TreeSummary, TreeUpdate,
};
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct TreesService {
    repo: Repository,
}

impl TreesService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Owned trees followed by accepted shares, the latter renamed
    /// `"<name> (Shared)"` and never marked default
    pub async fn list(&self, user: i64, include_shared: bool) -> Result<Vec<TreeSummary>> {
        let mut trees = self.repo.list_owned_trees(user).await?;

        if include_shared {
            for mut shared in self.repo.list_shared_trees(user).await? {
                shared.tree.name = format!("{} (Shared)", shared.tree.name);
                shared.tree.is_default = false;
                trees.push(shared);
            }
        }

        Ok(trees)
    }

    pub async fn create(&self, owner: i64, req: NewTree) -> Result<TreeSummary> {
        if req.name.trim().is_empty() {
            return Err(AppError::Validation("Tree name is required".to_string()));
        }

        let tree = self.repo.create_tree(owner, &req).await?;
        tracing::info!("Tree created: {} ({})", tree.name, tree.id);

        Ok(TreeSummary {
            tree,
            member_count: 0,
        })
    }

    /// Visible to the owner and to recipients of an accepted share
    pub async fn get(&self, user: i64, id: i64) -> Result<TreeSummary> {
        let tree = self
            .repo
            .find_accessible_tree(user, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Tree".to_string()))?;

        let member_count = self.repo.count_members_in_tree(tree.id).await?;
        Ok(TreeSummary { tree, member_count })
    }

    pub async fn update(&self, owner: i64, id: i64, req: TreeUpdate) -> Result<TreeSummary> {
        let tree = self.repo.update_tree(owner, id, &req).await?;
        let member_count = self.repo.count_members_in_tree(tree.id).await?;
        Ok(TreeSummary { tree, member_count })
    }

    /// Owner only; removes the tree's shares and members too
    pub async fn delete(&self, owner: i64, id: i64) -> Result<()> {
        if !self.repo.delete_tree_cascade(owner, id).await? {
            return Err(AppError::NotFound("Tree".to_string()));
        }

        tracing::info!("Tree deleted: {}", id);
        Ok(())
    }

    /// Copy a tree the caller can see into a new tree they own
    pub async fn copy(&self, user: i64, id: i64, new_name: &str) -> Result<TreeSummary> {
        if new_name.trim().is_empty() {
            return Err(AppError::Validation("Tree name is required".to_string()));
        }

        let source = self
            .repo
            .find_accessible_tree(user, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Tree".to_string()))?;

        let copy = self.repo.copy_tree(user, &source, new_name).await?;
        tracing::info!(
            "Tree {} copied to {} with {} members",
            source.id,
            copy.tree.id,
            copy.member_count
        );

        Ok(copy)
    }

    /// Invite another user to a tree the caller owns
    pub async fn share(
        &self,
        owner: i64,
        tree_id: i64,
        username: &str,
        permission: PermissionLevel,
    ) -> Result<ShareDetails> {
        self.repo
            .find_owned_tree(owner, tree_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Tree".to_string()))?;

        let recipient = self
            .repo
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        if recipient.id == owner {
            return Err(AppError::Validation("Cannot share with yourself".to_string()));
        }

        if self.repo.find_share(tree_id, recipient.id).await?.is_some() {
            return Err(AppError::Conflict(
                "Tree already shared with this user".to_string(),
            ));
        }

        self.repo
            .create_share(tree_id, owner, recipient.id, permission.as_str())
            .await
    }

    pub async fn pending(&self, user: i64) -> Result<Vec<ShareDetails>> {
        self.repo.pending_shares(user).await
    }

    /// Recipient only
    pub async fn accept(&self, user: i64, share_id: i64) -> Result<()> {
        if !self.repo.accept_share(user, share_id).await? {
            return Err(AppError::NotFound("Share invitation".to_string()));
        }
        Ok(())
    }

    /// Either the sharer or the recipient may remove a share
    pub async fn remove_share(&self, user: i64, share_id: i64) -> Result<()> {
        let share = self
            .repo
            .get_share(share_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Share".to_string()))?;

        if share.shared_by_user_id != user && share.shared_with_user_id != user {
            return Err(AppError::Forbidden(
                "Not authorized to remove this share".to_string(),
            ));
        }

        self.repo.delete_share(share_id).await?;
        Ok(())
    }
}
