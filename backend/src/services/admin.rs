//! Admin service
//!
//! First-run setup, user management and the dashboard. Every mutating
//! action leaves an audit entry.

use crate::auth::hash_password;
use crate::config::APP_VERSION;
use crate::database::{DashboardStats, LogLevel, NewUser, Repository, SystemLog, User, UserUpdate};
use crate::error::{AppError, Result};
use crate::security::PasswordPolicy;
use crate::services::audit::{AuditEntry, AuditLog};
use serde_json::{json, Value};
use std::time::Instant;

const RECENT_LOG_COUNT: i64 = 10;

/// Account data supplied by an administrator
#[derive(Debug, Clone)]
pub struct AccountRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
    pub permissions: Option<Value>,
}

#[derive(Clone)]
pub struct AdminService {
    repo: Repository,
    audit: AuditLog,
    policy: PasswordPolicy,
    started: Instant,
}

impl AdminService {
    pub fn new(repo: Repository, audit: AuditLog, policy: PasswordPolicy, started: Instant) -> Self {
        Self {
            repo,
            audit,
            policy,
            started,
        }
    }

    /// No administrator exists yet
    pub async fn is_first_run(&self) -> Result<bool> {
        Ok(self.repo.count_admins().await? == 0)
    }

    /// Create the first administrator; refused once one exists
    pub async fn setup(&self, req: AccountRequest, ip: Option<&str>) -> Result<User> {
        if !self.is_first_run().await? {
            return Err(AppError::Conflict("Admin user already exists".to_string()));
        }

        let user = self
            .insert_account(AccountRequest {
                is_admin: true,
                ..req
            })
            .await?;

        self.audit
            .record(
                LogLevel::Info,
                &format!("Admin user '{}' created during initial setup", user.username),
                AuditEntry {
                    user_id: Some(user.id),
                    action: Some("admin_setup"),
                    ip_address: ip,
                    ..Default::default()
                },
            )
            .await;

        Ok(user)
    }

    /// Active administrator, else Forbidden
    pub async fn require_admin(&self, user_id: i64) -> Result<User> {
        match self.repo.find_user(user_id).await? {
            Some(user) if user.is_admin && user.is_active => Ok(user),
            _ => Err(AppError::Forbidden("Administrator access required".to_string())),
        }
    }

    pub async fn list_users(&self, admin: i64, skip: i64, limit: i64) -> Result<Vec<User>> {
        self.require_admin(admin).await?;
        self.repo.list_users(skip, limit).await
    }

    pub async fn create_user(&self, admin: i64, req: AccountRequest, ip: Option<&str>) -> Result<User> {
        self.require_admin(admin).await?;

        let user = self.insert_account(req).await?;

        self.audit
            .record(
                LogLevel::Info,
                &format!("User '{}' created by admin", user.username),
                AuditEntry {
                    user_id: Some(admin),
                    action: Some("user_created"),
                    details: Some(json!({ "created_user_id": user.id })),
                    ip_address: ip,
                },
            )
            .await;

        Ok(user)
    }

    pub async fn update_user(
        &self,
        admin: i64,
        user_id: i64,
        req: UserUpdate,
        ip: Option<&str>,
    ) -> Result<User> {
        self.require_admin(admin).await?;
        self.repo.get_user(user_id).await?;

        if user_id == admin && req.is_active == Some(false) {
            return Err(AppError::Validation(
                "Cannot deactivate your own account".to_string(),
            ));
        }

        if let Some(email) = &req.email {
            if self.repo.email_taken(email, Some(user_id)).await? {
                return Err(AppError::Conflict("Email already registered".to_string()));
            }
        }

        let user = self.repo.update_user(user_id, &req).await?;

        self.audit
            .record(
                LogLevel::Info,
                &format!("User '{}' updated by admin", user.username),
                AuditEntry {
                    user_id: Some(admin),
                    action: Some("user_updated"),
                    details: Some(json!({ "updated_user_id": user_id })),
                    ip_address: ip,
                },
            )
            .await;

        Ok(user)
    }

    /// Delete an account and everything it owns
    pub async fn delete_user(&self, admin: i64, user_id: i64, ip: Option<&str>) -> Result<String> {
        self.require_admin(admin).await?;

        if user_id == admin {
            return Err(AppError::Validation(
                "Cannot delete your own account".to_string(),
            ));
        }

        let user = self.repo.get_user(user_id).await?;
        self.repo.delete_user_cascade(user_id).await?;

        self.audit
            .record(
                LogLevel::Warning,
                &format!("User '{}' deleted by admin", user.username),
                AuditEntry {
                    user_id: Some(admin),
                    action: Some("user_deleted"),
                    details: Some(json!({ "deleted_user_id": user_id })),
                    ip_address: ip,
                },
            )
            .await;

        Ok(user.username)
    }

    pub async fn dashboard(&self, admin: i64) -> Result<DashboardStats> {
        self.require_admin(admin).await?;

        let database_size = match self.repo.database_size_bytes().await {
            Ok(bytes) => format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0)),
            Err(e) => {
                tracing::warn!("Could not determine database size: {}", e);
                "N/A".to_string()
            }
        };

        Ok(DashboardStats {
            total_users: self.repo.count_users().await?,
            active_users: self.repo.count_active_users().await?,
            total_family_members: self.repo.count_members().await?,
            total_tree_views: self.repo.count_views().await?,
            recent_logs: self.repo.recent_logs(RECENT_LOG_COUNT).await?,
            app_version: APP_VERSION.to_string(),
            uptime: format_uptime(self.started.elapsed().as_secs()),
            database_size,
        })
    }

    pub async fn logs(
        &self,
        admin: i64,
        skip: i64,
        limit: i64,
        level: Option<LogLevel>,
    ) -> Result<Vec<SystemLog>> {
        self.require_admin(admin).await?;
        self.repo.list_logs(skip, limit, level).await
    }

    async fn insert_account(&self, req: AccountRequest) -> Result<User> {
        if req.username.trim().is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }
        if self.repo.find_user_by_username(&req.username).await?.is_some() {
            return Err(AppError::Conflict("Username already registered".to_string()));
        }
        if self.repo.email_taken(&req.email, None).await? {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        self.policy.validate(&req.password)?;

        self.repo
            .create_user(&NewUser {
                username: req.username,
                email: req.email,
                hashed_password: hash_password(&req.password)?,
                is_admin: req.is_admin,
                permissions: req.permissions,
            })
            .await
    }
}

/// `H:MM:SS`, with a day prefix past 24 hours
fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!(
            "{} day{}, {}:{:02}:{:02}",
            days,
            if days == 1 { "" } else { "s" },
            hours,
            minutes,
            seconds
        )
    } else {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    }
}
