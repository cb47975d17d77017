// Family tree backend - administrative command line
// Entry point and application setup

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use familytree::app::AppState;
use familytree::config::Settings;
use familytree::crypto;
use familytree::database::LogLevel;
use familytree::security::security_headers;
use familytree::services::AccountRequest;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a user's materialized family tree
    Tree {
        #[arg(long)]
        user: i64,
        /// Restrict to one tree
        #[arg(long)]
        tree: Option<i64>,
    },
    /// Attach a picture to a family member
    Photo {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        member: i64,
        file: PathBuf,
        /// MIME type of the picture, e.g. image/png
        #[arg(long)]
        content_type: String,
    },
    /// Manage backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Restore the record store from a dump file or a stored backup
    Restore(RestoreArgs),
    /// Encrypt a file to `<file>.encrypted`
    Encrypt {
        file: PathBuf,
        #[arg(long, env = "BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Decrypt an `.encrypted` file next to itself
    Decrypt {
        file: PathBuf,
        #[arg(long, env = "BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check for or apply an update
    #[command(subcommand)]
    Update(UpdateCommand),
    /// Administration
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Create a `database`, `config` or `full` backup
    Create {
        kind: String,
        #[arg(long)]
        user: i64,
        #[arg(long, env = "BACKUP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    List {
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Print the artifact location of a backup
    Path { id: i64 },
    Delete {
        id: i64,
        #[arg(long)]
        user: i64,
    },
    /// Remove backups older than the retention period
    Prune {
        #[arg(long)]
        user: i64,
    },
}

#[derive(Args, Debug)]
struct RestoreArgs {
    /// Dump file to restore
    #[arg(conflicts_with = "id", required_unless_present = "id")]
    file: Option<PathBuf>,
    /// Restore a stored backup instead of a file
    #[arg(long)]
    id: Option<i64>,
    #[arg(long)]
    user: i64,
    #[arg(long, env = "BACKUP_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Skip the pre-restore snapshot
    #[arg(long)]
    no_snapshot: bool,
}

#[derive(Subcommand, Debug)]
enum UpdateCommand {
    Check,
    Apply {
        #[arg(long)]
        user: i64,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Create the first administrator
    Setup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Dashboard {
        #[arg(long)]
        user: i64,
    },
    Logs {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        /// INFO, WARNING or ERROR
        #[arg(long)]
        level: Option<LogLevel>,
    },
    /// Print the response headers a front end should attach
    Headers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "familytree=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // File encryption needs no state
    match &cli.command {
        Command::Encrypt { file, password } => {
            let out = crypto::encrypt_file(file, password).await?;
            println!("{}", out.display());
            return Ok(());
        }
        Command::Decrypt { file, password } => {
            let out = crypto::decrypt_file(file, password).await?;
            println!("{}", out.display());
            return Ok(());
        }
        _ => {}
    }

    let settings = Settings::from_env().context("Failed to load settings")?;
    let state = AppState::new(settings)
        .await
        .context("Failed to initialize application")?;

    tracing::info!("Starting family tree backend");

    match cli.command {
        Command::Tree { user, tree } => print_json(&state.family_tree.tree(user, tree).await?),
        Command::Photo {
            user,
            member,
            file,
            content_type,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let upload = state
                .members
                .upload_photo(user, member, &filename, &content_type, &bytes)
                .await?;
            println!("{}", upload.photo_url);
            Ok(())
        }
        Command::Backup(cmd) => backup(&state, cmd).await,
        Command::Restore(args) => restore(&state, args).await,
        Command::Update(UpdateCommand::Check) => print_json(&state.updater.check().await?),
        Command::Update(UpdateCommand::Apply { user }) => {
            state.admin.require_admin(user).await?;
            print_json(&state.updater.apply(user).await?)
        }
        Command::Admin(cmd) => admin(&state, cmd).await,
        Command::Encrypt { .. } | Command::Decrypt { .. } => Ok(()),
    }
}

async fn backup(state: &AppState, cmd: BackupCommand) -> anyhow::Result<()> {
    match cmd {
        BackupCommand::Create {
            kind,
            user,
            password,
        } => {
            state.admin.require_admin(user).await?;
            let outcome = state
                .backups
                .create(&kind, user, password.as_deref())
                .await?;
            print_json(&outcome)
        }
        BackupCommand::List { skip, limit } => print_json(&state.backups.list(skip, limit).await?),
        BackupCommand::Path { id } => {
            println!("{}", state.backups.artifact_path(id).await?.display());
            Ok(())
        }
        BackupCommand::Delete { id, user } => {
            state.admin.require_admin(user).await?;
            state.backups.delete(id, user).await?;
            Ok(())
        }
        BackupCommand::Prune { user } => {
            state.admin.require_admin(user).await?;
            let purged = state.backups.purge_expired(chrono::Utc::now()).await?;
            print_json(&purged)
        }
    }
}

async fn restore(state: &AppState, args: RestoreArgs) -> anyhow::Result<()> {
    state.admin.require_admin(args.user).await?;
    let password = args.password.as_deref();
    let create_snapshot = !args.no_snapshot;

    let outcome = match (args.id, args.file) {
        (Some(id), _) => {
            state
                .backups
                .restore_backup(id, password, create_snapshot, args.user)
                .await?
        }
        (None, Some(file)) => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            state
                .backups
                .restore(&name, &payload, password, create_snapshot, args.user)
                .await?
        }
        (None, None) => bail!("Either a file or --id is required"),
    };

    print_json(&outcome)
}

async fn admin(state: &AppState, cmd: AdminCommand) -> anyhow::Result<()> {
    match cmd {
        AdminCommand::Setup {
            username,
            email,
            password,
        } => {
            let user = state
                .admin
                .setup(
                    AccountRequest {
                        username,
                        email,
                        password,
                        is_admin: true,
                        permissions: None,
                    },
                    None,
                )
                .await?;
            print_json(&user)
        }
        AdminCommand::Dashboard { user } => print_json(&state.admin.dashboard(user).await?),
        AdminCommand::Logs {
            user,
            skip,
            limit,
            level,
        } => print_json(&state.admin.logs(user, skip, limit, level).await?),
        AdminCommand::Headers => {
            for (name, value) in security_headers(&state.settings.security) {
                println!("{}: {}", name, value);
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
