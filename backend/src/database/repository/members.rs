use super::Repository;
use crate::database::models::{Member, MemberUpdate, NewMember};
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};

impl Repository {
    /// Create a member owned by `owner`
    pub async fn create_member(&self, owner: i64, req: &NewMember) -> Result<Member> {
        let now = Utc::now();

        let member = sqlx::query_as::<_, Member>(
            r#"
            INSERT INTO family_members (
                user_id, tree_id, first_name, middle_name, last_name, nickname, gender,
                birth_date, death_date, birth_place, location, country, occupation, bio,
                photo_url, social_media, previous_partners, father_id, mother_id,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(req.tree_id)
        .bind(&req.first_name)
        .bind(&req.middle_name)
        .bind(&req.last_name)
        .bind(&req.nickname)
        .bind(&req.gender)
        .bind(req.birth_date)
        .bind(req.death_date)
        .bind(&req.birth_place)
        .bind(&req.location)
        .bind(&req.country)
        .bind(&req.occupation)
        .bind(&req.bio)
        .bind(&req.photo_url)
        .bind(req.social_media.as_ref().map(Json))
        .bind(&req.previous_partners)
        .bind(req.father_id)
        .bind(req.mother_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created member: {} for user: {}", member.id, owner);
        Ok(member)
    }

    pub async fn find_member(&self, owner: i64, id: i64) -> Result<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(
            "SELECT * FROM family_members WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    pub async fn get_member(&self, owner: i64, id: i64) -> Result<Member> {
        self.find_member(owner, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Family member".to_string()))
    }

    /// Every member of `owner`, optionally restricted to one tree, in id order
    pub async fn list_members(&self, owner: i64, tree_id: Option<i64>) -> Result<Vec<Member>> {
        let members = match tree_id {
            Some(tree_id) => {
                sqlx::query_as::<_, Member>(
                    "SELECT * FROM family_members WHERE user_id = ? AND tree_id = ? ORDER BY id",
                )
                .bind(owner)
                .bind(tree_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Member>(
                    "SELECT * FROM family_members WHERE user_id = ? ORDER BY id",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(members)
    }

    /// Write the provided fields of a member update. `Some(None)` clears a
    /// nullable column; absent fields keep their stored value.
    pub async fn update_member(&self, owner: i64, id: i64, req: &MemberUpdate) -> Result<Member> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE family_members SET ");
        {
            let mut fields = builder.separated(", ");
            fields.push("updated_at = ").push_bind_unseparated(Utc::now());

            macro_rules! set {
                ($column:literal, $value:expr) => {
                    if let Some(value) = $value {
                        fields
                            .push(concat!($column, " = "))
                            .push_bind_unseparated(value);
                    }
                };
            }

            set!("tree_id", req.tree_id);
            set!("first_name", req.first_name.clone());
            set!("middle_name", req.middle_name.clone());
            set!("last_name", req.last_name.clone());
            set!("nickname", req.nickname.clone());
            set!("gender", req.gender.clone());
            set!("birth_date", req.birth_date);
            set!("death_date", req.death_date);
            set!("birth_place", req.birth_place.clone());
            set!("location", req.location.clone());
            set!("country", req.country.clone());
            set!("occupation", req.occupation.clone());
            set!("bio", req.bio.clone());
            set!("photo_url", req.photo_url.clone());
            set!(
                "social_media",
                req.social_media.clone().map(|value| value.map(Json))
            );
            set!("previous_partners", req.previous_partners.clone());
            set!("father_id", req.father_id);
            set!("mother_id", req.mother_id);
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND user_id = ")
            .push_bind(owner)
            .push(" RETURNING *");

        let member = builder
            .build_query_as::<Member>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Family member".to_string()))?;

        tracing::debug!("Updated member: {}", id);
        Ok(member)
    }

    /// Store a base64 picture and drop the deprecated URL
    pub async fn set_member_photo(
        &self,
        owner: i64,
        id: i64,
        base64_data: &str,
        mime_type: &str,
    ) -> Result<Member> {
        let member = sqlx::query_as::<_, Member>(
            r#"
            UPDATE family_members SET
                profile_picture_data = ?,
                profile_picture_mime_type = ?,
                photo_url = NULL,
                updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(base64_data)
        .bind(mime_type)
        .bind(Utc::now())
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Family member".to_string()))?;

        Ok(member)
    }

    /// Delete one member. Children keep their now dangling parent id.
    pub async fn delete_member(&self, owner: i64, id: i64) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM family_members WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::debug!("Deleted member: {} ({} rows)", id, rows);
        Ok(rows > 0)
    }

    pub async fn count_members(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM family_members")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_members_in_tree(&self, tree_id: i64) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM family_members WHERE tree_id = ?")
                .bind(tree_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::database::repository::test_support::{create_test_repo, create_user};
    use crate::database::{MemberUpdate, NewMember};
    use crate::error::AppError;
    use chrono::NaiveDate;

    fn person(first: &str) -> NewMember {
        NewMember {
            first_name: first.to_string(),
            last_name: "Smith".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_member() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;

        let member = repo
            .create_member(
                user.id,
                &NewMember {
                    birth_date: NaiveDate::from_ymd_opt(1901, 2, 3),
                    ..person("John")
                },
            )
            .await
            .unwrap();

        let fetched = repo.get_member(user.id, member.id).await.unwrap();
        assert_eq!(fetched.first_name, "John");
        assert_eq!(fetched.birth_date, NaiveDate::from_ymd_opt(1901, 2, 3));
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let repo = create_test_repo().await;
        let alice = create_user(&repo, "alice").await;
        let mallory = create_user(&repo, "mallory").await;

        let member = repo.create_member(alice.id, &person("John")).await.unwrap();

        let result = repo.get_member(mallory.id, member.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(!repo.delete_member(mallory.id, member.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_only_touches_provided_fields() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let member = repo
            .create_member(
                user.id,
                &NewMember {
                    occupation: Some("Smith".to_string()),
                    ..person("John")
                },
            )
            .await
            .unwrap();

        let updated = repo
            .update_member(
                user.id,
                member.id,
                &MemberUpdate {
                    bio: Some(Some("Blacksmith in the village".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.bio.as_deref(), Some("Blacksmith in the village"));
        assert_eq!(updated.occupation.as_deref(), Some("Smith"));
        assert_eq!(updated.first_name, "John");
    }

    #[tokio::test]
    async fn test_update_clears_nullable_fields() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let father = repo.create_member(user.id, &person("Father")).await.unwrap();
        let child = repo
            .create_member(
                user.id,
                &NewMember {
                    father_id: Some(father.id),
                    occupation: Some("Miller".to_string()),
                    birth_date: NaiveDate::from_ymd_opt(1930, 5, 1),
                    ..person("Child")
                },
            )
            .await
            .unwrap();

        let req: MemberUpdate =
            serde_json::from_str(r#"{"father_id": null, "birth_date": null}"#).unwrap();
        assert_eq!(req.father_id, Some(None));
        assert_eq!(req.occupation, None);

        let updated = repo.update_member(user.id, child.id, &req).await.unwrap();
        assert_eq!(updated.father_id, None);
        assert_eq!(updated.birth_date, None);
        assert_eq!(updated.occupation.as_deref(), Some("Miller"));
    }

    #[tokio::test]
    async fn test_delete_leaves_dangling_parent() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let father = repo.create_member(user.id, &person("Father")).await.unwrap();
        let child = repo
            .create_member(
                user.id,
                &NewMember {
                    father_id: Some(father.id),
                    ..person("Child")
                },
            )
            .await
            .unwrap();

        assert!(repo.delete_member(user.id, father.id).await.unwrap());

        let child = repo.get_member(user.id, child.id).await.unwrap();
        assert_eq!(child.father_id, Some(father.id));
    }

    #[tokio::test]
    async fn test_list_members_by_tree() {
        let repo = create_test_repo().await;
        let user = create_user(&repo, "alice").await;
        let tree = repo
            .create_tree(
                user.id,
                &crate::database::NewTree {
                    name: "Paternal".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        repo.create_member(user.id, &person("Loose")).await.unwrap();
        repo.create_member(
            user.id,
            &NewMember {
                tree_id: Some(tree.id),
                ..person("InTree")
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_members(user.id, None).await.unwrap().len(), 2);
        let in_tree = repo.list_members(user.id, Some(tree.id)).await.unwrap();
        assert_eq!(in_tree.len(), 1);
        assert_eq!(in_tree[0].first_name, "InTree");
        assert_eq!(repo.count_members_in_tree(tree.id).await.unwrap(), 1);
    }
}
