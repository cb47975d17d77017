//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::config::Settings;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::security::{PasswordPolicy, RateLimiter, SystemClock};
use crate::services::{
    tools_for, AccountsService, AdminService, AuditLog, BackupService, DumpTool,
    FamilyTreeService, MembersService, TreeViewsService, TreesService, UpdaterService,
};
use std::sync::Arc;
use std::time::Instant;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repo: Repository,
    pub limiter: Arc<RateLimiter>,
    pub audit: AuditLog,
    pub accounts: AccountsService,
    pub admin: AdminService,
    pub members: MembersService,
    pub trees: TreesService,
    pub tree_views: TreeViewsService,
    pub family_tree: FamilyTreeService,
    pub backups: BackupService,
    pub updater: UpdaterService,
}

impl AppState {
    /// Open the record store and build every service with the dump tools
    /// selected by the settings
    pub async fn new(settings: Settings) -> Result<Self> {
        let tools = tools_for(&settings.database);
        Self::with_tools(settings, tools).await
    }

    pub async fn with_tools(settings: Settings, tools: Arc<dyn DumpTool>) -> Result<Self> {
        tracing::info!("Initializing application");

        std::fs::create_dir_all(&settings.backup.backup_dir)?;

        let pool = create_pool(&settings.database.path).await?;
        let repo = Repository::new(pool);
        let settings = Arc::new(settings);

        let audit = AuditLog::new(repo.clone());
        let policy = PasswordPolicy::new(settings.security.password_policy.clone());
        let limiter = Arc::new(RateLimiter::new(
            &settings.security,
            Arc::new(SystemClock),
        ));

        let backups = BackupService::new(repo.clone(), audit.clone(), tools, settings.clone());

        let state = Self {
            accounts: AccountsService::new(
                repo.clone(),
                audit.clone(),
                policy.clone(),
                limiter.clone(),
            ),
            admin: AdminService::new(repo.clone(), audit.clone(), policy, Instant::now()),
            members: MembersService::new(repo.clone()),
            trees: TreesService::new(repo.clone()),
            tree_views: TreeViewsService::new(repo.clone()),
            family_tree: FamilyTreeService::new(repo.clone()),
            updater: UpdaterService::new(settings.update.clone(), backups.clone()),
            backups,
            audit,
            limiter,
            repo,
            settings,
        };

        tracing::info!("Application initialized successfully");

        Ok(state)
    }
}
