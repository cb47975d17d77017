//! Members service
//!
//! Validation around member records: parent references must point at
//! members of the same owner, a member cannot parent itself, and a tree
//! assignment must name one of the caller's trees.

use crate::database::{Member, MemberUpdate, NewMember, Repository};
use crate::error::{AppError, Result};
use crate::security::validate_file_upload;
use crate::services::family_tree::data_url;
use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Clone)]
pub struct MembersService {
    repo: Repository,
}

/// Result of a picture upload
#[derive(Debug, Clone, serde::Serialize)]
pub struct PhotoUpload {
    pub member: Member,
    pub photo_url: String,
}

impl MembersService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, owner: i64, req: NewMember) -> Result<Member> {
        self.check_tree(owner, req.tree_id).await?;
        self.check_parent(owner, req.father_id, "Father").await?;
        self.check_parent(owner, req.mother_id, "Mother").await?;

        let member = self.repo.create_member(owner, &req).await?;
        tracing::info!("Member created: {} ({} {})", member.id, member.first_name, member.last_name);
        Ok(member)
    }

    pub async fn get(&self, owner: i64, id: i64) -> Result<Member> {
        self.repo.get_member(owner, id).await
    }

    pub async fn list(&self, owner: i64, tree_id: Option<i64>) -> Result<Vec<Member>> {
        self.repo.list_members(owner, tree_id).await
    }

    /// Apply only the provided fields; an explicit null clears a link
    pub async fn update(&self, owner: i64, id: i64, req: MemberUpdate) -> Result<Member> {
        self.repo.get_member(owner, id).await?;

        if req.father_id == Some(Some(id)) || req.mother_id == Some(Some(id)) {
            return Err(AppError::Validation(
                "A member cannot be their own parent".to_string(),
            ));
        }

        self.check_tree(owner, req.tree_id.flatten()).await?;
        self.check_parent(owner, req.father_id.flatten(), "Father").await?;
        self.check_parent(owner, req.mother_id.flatten(), "Mother").await?;

        self.repo.update_member(owner, id, &req).await
    }

    pub async fn delete(&self, owner: i64, id: i64) -> Result<()> {
        if !self.repo.delete_member(owner, id).await? {
            return Err(AppError::NotFound("Family member".to_string()));
        }

        tracing::info!("Member deleted: {}", id);
        Ok(())
    }

    /// Store an uploaded picture inline and return its data URL
    pub async fn upload_photo(
        &self,
        owner: i64,
        id: i64,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<PhotoUpload> {
        self.repo.get_member(owner, id).await?;

        validate_file_upload(filename, content_type, bytes.len()).map_err(AppError::Validation)?;

        let encoded = STANDARD.encode(bytes);
        let member = self
            .repo
            .set_member_photo(owner, id, &encoded, content_type)
            .await?;

        tracing::debug!("Stored {} byte picture for member {}", bytes.len(), id);

        Ok(PhotoUpload {
            photo_url: data_url(content_type, &encoded),
            member,
        })
    }

    async fn check_parent(&self, owner: i64, parent_id: Option<i64>, role: &str) -> Result<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };

        match self.repo.find_member(owner, parent_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(role.to_string())),
        }
    }

    async fn check_tree(&self, owner: i64, tree_id: Option<i64>) -> Result<()> {
        let Some(tree_id) = tree_id else {
            return Ok(());
        };

        match self.repo.find_owned_tree(owner, tree_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound("Tree".to_string())),
        }
    }
}
