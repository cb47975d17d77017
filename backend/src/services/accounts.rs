//! Accounts service
//!
//! Self-service account operations: registration, credential checks and
//! changes to one's own email, password or account. Session tokens are
//! issued elsewhere; this service only answers whether credentials are good.

use crate::auth::{hash_password, verify_password};
use crate::database::{LogLevel, NewUser, Repository, User, UserUpdate};
use crate::error::{AppError, Result};
use crate::security::{PasswordPolicy, RateLimiter, RequestOrigin};
use crate::services::audit::{AuditEntry, AuditLog};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AccountsService {
    repo: Repository,
    audit: AuditLog,
    policy: PasswordPolicy,
    limiter: Arc<RateLimiter>,
}

impl AccountsService {
    pub fn new(
        repo: Repository,
        audit: AuditLog,
        policy: PasswordPolicy,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            repo,
            audit,
            policy,
            limiter,
        }
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        if self.repo.find_user_by_username(username).await?.is_some() {
            return Err(AppError::Conflict("Username already registered".to_string()));
        }
        if self.repo.email_taken(email, None).await? {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        self.policy.validate(password)?;

        let user = self
            .repo
            .create_user(&NewUser {
                username: username.to_string(),
                email: email.to_string(),
                hashed_password: hash_password(password)?,
                is_admin: false,
                permissions: None,
            })
            .await?;

        tracing::info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Check credentials under the login rate limit.
    ///
    /// Attempts are counted per client address, taken from the forwarding
    /// headers when present. Unknown users, wrong passwords and inactive
    /// accounts all produce the same error. A success clears the caller's
    /// failed attempts.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        origin: RequestOrigin<'_>,
    ) -> Result<User> {
        let client_ip = origin.client_ip();
        let ip = client_ip.as_str();

        if !self.limiter.check_login(ip) {
            self.audit
                .record(
                    LogLevel::Warning,
                    "Login rate limit exceeded",
                    AuditEntry {
                        action: Some("login_rate_limited"),
                        details: Some(json!({ "username": username })),
                        ip_address: Some(ip),
                        ..Default::default()
                    },
                )
                .await;
            return Err(AppError::Forbidden(
                "Too many login attempts. Please try again later.".to_string(),
            ));
        }

        let user = match self.repo.find_user_by_username(username).await? {
            Some(user) if user.is_active && verify_password(password, &user.hashed_password)? => user,
            _ => {
                self.audit
                    .record(
                        LogLevel::Warning,
                        "Failed login attempt",
                        AuditEntry {
                            action: Some("login_failed"),
                            details: Some(json!({ "username": username })),
                            ip_address: Some(ip),
                            ..Default::default()
                        },
                    )
                    .await;
                return Err(AppError::Forbidden(
                    "Incorrect username or password".to_string(),
                ));
            }
        };

        self.limiter.reset_login(ip);
        self.repo.set_last_login(user.id).await?;
        self.repo.get_user(user.id).await
    }

    pub async fn update_email(&self, user_id: i64, email: &str) -> Result<User> {
        if self.repo.email_taken(email, Some(user_id)).await? {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        self.repo
            .update_user(
                user_id,
                &UserUpdate {
                    email: Some(email.to_string()),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn update_password(&self, user_id: i64, current: &str, new: &str) -> Result<()> {
        let user = self.repo.get_user(user_id).await?;
        if !verify_password(current, &user.hashed_password)? {
            return Err(AppError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        self.policy.validate(new)?;
        self.repo
            .set_password_hash(user_id, &hash_password(new)?)
            .await
    }

    /// Delete one's own account after re-checking the password
    pub async fn delete_account(&self, user_id: i64, password: &str) -> Result<()> {
        let user = self.repo.get_user(user_id).await?;
        if !verify_password(password, &user.hashed_password)? {
            return Err(AppError::Validation("Password is incorrect".to_string()));
        }

        self.repo.delete_user_cascade(user_id).await?;
        tracing::info!("Account deleted: {}", user.username);
        Ok(())
    }
}
