//! Family tree service
//!
//! Turns the flat member rows of one owner (optionally one tree) into the
//! node list a client renders: every member annotated with the ids of its
//! children.

use crate::database::{Member, Repository, TreeViewNode};
use crate::error::Result;
use std::collections::HashMap;

/// Build view nodes for a scoped set of members.
///
/// Output order follows the input. Children are listed in processing order,
/// father contributions and mother contributions interleaved as members are
/// visited. A parent id that is not part of `members` contributes nothing;
/// the member still carries that id.
pub fn materialize(members: &[Member]) -> Vec<TreeViewNode> {
    let mut children: HashMap<i64, Vec<i64>> =
        members.iter().map(|m| (m.id, Vec::new())).collect();

    for member in members {
        if let Some(list) = member.father_id.and_then(|id| children.get_mut(&id)) {
            list.push(member.id);
        }

        if let Some(list) = member.mother_id.and_then(|id| children.get_mut(&id)) {
            if !list.contains(&member.id) {
                list.push(member.id);
            }
        }
    }

    members
        .iter()
        .map(|m| TreeViewNode {
            id: m.id,
            first_name: m.first_name.clone(),
            middle_name: m.middle_name.clone(),
            last_name: m.last_name.clone(),
            nickname: m.nickname.clone(),
            gender: m.gender.clone(),
            birth_date: m.birth_date,
            death_date: m.death_date,
            birth_place: m.birth_place.clone(),
            location: m.location.clone(),
            country: m.country.clone(),
            occupation: m.occupation.clone(),
            bio: m.bio.clone(),
            photo_url: display_photo(m),
            profile_picture_data: m.profile_picture_data.clone(),
            profile_picture_mime_type: m.profile_picture_mime_type.clone(),
            father_id: m.father_id,
            mother_id: m.mother_id,
            children: children.remove(&m.id).unwrap_or_default(),
        })
        .collect()
}

/// Inline data URL when picture bytes are stored, else the legacy URL
pub fn display_photo(member: &Member) -> Option<String> {
    match (&member.profile_picture_data, &member.profile_picture_mime_type) {
        (Some(data), Some(mime)) => Some(data_url(mime, data)),
        _ => member.photo_url.clone(),
    }
}

pub fn data_url(mime_type: &str, base64_data: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_data)
}

/// Read-only tree rendering
#[derive(Clone)]
pub struct FamilyTreeService {
    repo: Repository,
}

impl FamilyTreeService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Materialize every member of `owner`, or only those in `tree_id`
    pub async fn tree(&self, owner: i64, tree_id: Option<i64>) -> Result<Vec<TreeViewNode>> {
        let members = self.repo.list_members(owner, tree_id).await?;
        let nodes = materialize(&members);

        tracing::debug!(
            "Materialized {} nodes for user {} (tree: {:?})",
            nodes.len(),
            owner,
            tree_id
        );

        Ok(nodes)
    }
}
