//! Services module
//!
//! Business logic services that coordinate between callers and the repository.

pub mod accounts;
pub mod admin;
pub mod audit;
pub mod backup;
pub mod dump;
pub mod family_tree;
pub mod members;
pub mod replication;
pub mod tree_views;
pub mod trees;
pub mod updater;

pub use accounts::AccountsService;
pub use admin::{AccountRequest, AdminService};
pub use audit::{AuditEntry, AuditLog};
pub use backup::{BackupOutcome, BackupService, RestoreOutcome};
pub use dump::{tools_for, DumpTool};
pub use family_tree::FamilyTreeService;
pub use members::MembersService;
pub use replication::Replica;
pub use tree_views::TreeViewsService;
pub use trees::TreesService;
pub use updater::{UpdaterService, VersionInfo};
