//! Audit service
//!
//! Persists administrative and security events to `system_logs` and mirrors
//! them to the tracing output.

use crate::database::{LogLevel, Repository, SystemLog};
use crate::error::Result;
use serde_json::Value;

#[derive(Clone)]
pub struct AuditLog {
    repo: Repository,
}

/// One audit event
#[derive(Debug, Clone, Default)]
pub struct AuditEntry<'a> {
    pub user_id: Option<i64>,
    pub action: Option<&'a str>,
    pub details: Option<Value>,
    pub ip_address: Option<&'a str>,
}

impl AuditLog {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn log_action(
        &self,
        level: LogLevel,
        message: &str,
        entry: AuditEntry<'_>,
    ) -> Result<SystemLog> {
        match level {
            LogLevel::Info => tracing::info!(
                user_id = ?entry.user_id,
                action = ?entry.action,
                "{}",
                message
            ),
            LogLevel::Warning => tracing::warn!(
                user_id = ?entry.user_id,
                action = ?entry.action,
                "{}",
                message
            ),
            LogLevel::Error | LogLevel::Critical => tracing::error!(
                user_id = ?entry.user_id,
                action = ?entry.action,
                "{}",
                message
            ),
        }

        self.repo
            .insert_log(
                level,
                message,
                entry.user_id,
                entry.action,
                entry.details.as_ref(),
                entry.ip_address,
            )
            .await
    }

    /// Record an event without failing the caller when the log write fails
    pub async fn record(&self, level: LogLevel, message: &str, entry: AuditEntry<'_>) {
        if let Err(e) = self.log_action(level, message, entry).await {
            tracing::warn!("Failed to persist audit entry '{}': {}", message, e);
        }
    }
}
