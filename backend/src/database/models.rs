//! Database models
//!
//! Rust structs representing database entities and the request types
//! used to create or change them. All models use serde so they can be
//! handed to any outer surface as JSON.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Account holder; owns trees, members and views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub permissions: Option<Json<Value>>,
    pub last_login: Option<DateTime<Utc>>,
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub is_admin: bool,
    pub permissions: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub permissions: Option<Value>,
}

/// A person in a family tree
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: i64,
    pub user_id: i64,
    pub tree_id: Option<i64>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub nickname: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub birth_place: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub occupation: Option<String>,
    pub bio: Option<String>,
    /// Deprecated external picture reference
    pub photo_url: Option<String>,
    /// Base64-encoded picture bytes
    pub profile_picture_data: Option<String>,
    pub profile_picture_mime_type: Option<String>,
    pub social_media: Option<Json<Value>>,
    pub previous_partners: Option<String>,
    pub father_id: Option<i64>,
    pub mother_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create member request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMember {
    pub tree_id: Option<i64>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub nickname: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub birth_place: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub occupation: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub social_media: Option<Value>,
    pub previous_partners: Option<String>,
    pub father_id: Option<i64>,
    pub mother_id: Option<i64>,
}

/// Partial member update.
///
/// Absent fields are left alone. Nullable fields are doubly optional: an
/// explicit `null` arrives as `Some(None)` and clears the column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberUpdate {
    #[serde(default, deserialize_with = "present")]
    pub tree_id: Option<Option<i64>>,
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub middle_name: Option<Option<String>>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub nickname: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub birth_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub death_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub birth_place: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub occupation: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub photo_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub social_media: Option<Option<Value>>,
    #[serde(default, deserialize_with = "present")]
    pub previous_partners: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub father_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present")]
    pub mother_id: Option<Option<i64>>,
}

/// Marks a field as present, keeping an explicit `null` as `Some(None)`
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Member as rendered in a tree: scalars plus child ids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeViewNode {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub nickname: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub birth_place: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub occupation: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub profile_picture_data: Option<String>,
    pub profile_picture_mime_type: Option<String>,
    pub father_id: Option<i64>,
    pub mother_id: Option<i64>,
    pub children: Vec<i64>,
}

/// Named collection of members
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FamilyTree {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tree listing entry with its member count
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TreeSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tree: FamilyTree,
    pub member_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTree {
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    Edit,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::View => "view",
            PermissionLevel::Edit => "edit",
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(PermissionLevel::View),
            "edit" => Ok(PermissionLevel::Edit),
            other => Err(format!("Invalid permission level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreeShare {
    pub id: i64,
    pub tree_id: i64,
    pub shared_by_user_id: i64,
    pub shared_with_user_id: i64,
    pub permission_level: String,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Share joined with the names a recipient needs to see
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ShareDetails {
    pub id: i64,
    pub tree_id: i64,
    pub tree_name: String,
    pub shared_by_user_id: i64,
    pub shared_by_username: String,
    pub shared_with_user_id: i64,
    pub shared_with_username: String,
    pub permission_level: String,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Saved layout and filter preset
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreeView {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    /// `{member_id: {x, y}}`
    pub node_positions: Option<Json<Value>>,
    /// `{show_deceased, gender_filter, root_member_id}`
    pub filter_settings: Option<Json<Value>>,
    /// Base64 PNG
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTreeView {
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub node_positions: Option<Value>,
    pub filter_settings: Option<Value>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreeViewUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_default: Option<bool>,
    pub node_positions: Option<Value>,
    pub filter_settings: Option<Value>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("Invalid log level: {}", other)),
        }
    }
}

/// Persisted audit entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemLog {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub user_id: Option<i64>,
    pub action: Option<String>,
    pub details: Option<Json<Value>>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Database,
    Config,
    Full,
    Snapshot,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Database => "database",
            BackupType::Config => "config",
            BackupType::Full => "full",
            BackupType::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(BackupType::Database),
            "config" => Ok(BackupType::Config),
            "full" => Ok(BackupType::Full),
            "snapshot" => Ok(BackupType::Snapshot),
            other => Err(format!("Invalid backup type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Completed,
    Failed,
    InProgress,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::InProgress => "in_progress",
        }
    }
}

/// Backup record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Backup {
    pub id: i64,
    pub filename: String,
    pub backup_type: String,
    pub file_size: i64,
    pub created_by: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Figures shown on the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub active_users: i64,
    pub total_family_members: i64,
    pub total_tree_views: i64,
    pub recent_logs: Vec<SystemLog>,
    pub app_version: String,
    pub uptime: String,
    pub database_size: String,
}
