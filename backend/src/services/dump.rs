//! External dump and restore tools
//!
//! The live store is exported and replayed by external programs. Each run is
//! described as an [`Invocation`] first, then executed; the process exit
//! status is the only success signal. Passwords travel through the
//! environment, never through arguments.

use crate::config::{DatabaseSettings, DumpBackend};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

/// Exports the live store to a file and replays such a file into it
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// Write a complete dump of the live store to `out`
    async fn dump(&self, out: &Path) -> Result<()>;

    /// Replay a dump produced by [`DumpTool::dump`] into the live store
    async fn restore(&self, input: &Path) -> Result<()>;
}

/// One external program run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
}

impl Invocation {
    pub(crate) fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            stdout: None,
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn path_arg(self, path: &Path) -> Self {
        let path = path.display().to_string();
        self.arg(path)
    }

    /// Run to completion; non-zero exit becomes [`AppError::Process`]
    pub async fn run(&self) -> Result<()> {
        self.output().await.map(|_| ())
    }

    /// Like [`Invocation::run`], returning captured stdout
    pub async fn output(&self) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(input) = &self.stdin {
            cmd.stdin(Stdio::from(std::fs::File::open(input)?));
        }
        match &self.stdout {
            Some(output) => cmd.stdout(Stdio::from(std::fs::File::create(output)?)),
            None => cmd.stdout(Stdio::piped()),
        };
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running {} {:?}", self.program, self.args);

        let spawn_error = |e: std::io::Error| AppError::Process {
            program: self.program.clone(),
            message: e.to_string(),
        };
        // `Command::output` would replace a file redirect with a pipe
        let output = cmd
            .spawn()
            .map_err(spawn_error)?
            .wait_with_output()
            .await
            .map_err(spawn_error)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            tracing::error!("{} failed: {}", self.program, message);
            return Err(AppError::Process {
                program: self.program.clone(),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `pg_dump` / `psql` against a PostgreSQL server
#[derive(Debug, Clone)]
pub struct PostgresTools {
    host: String,
    port: u16,
    user: String,
    database: String,
    password: Option<String>,
    dump_program: String,
    restore_program: String,
}

impl PostgresTools {
    pub fn new(settings: &DatabaseSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            user: settings.user.clone(),
            database: settings.name.clone(),
            password: settings.password.clone(),
            dump_program: program_or(&settings.dump_program, "pg_dump"),
            restore_program: program_or(&settings.restore_program, "psql"),
        }
    }

    fn connect(&self, program: &str) -> Invocation {
        let mut inv = Invocation::new(program)
            .arg("-h")
            .arg(&self.host)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-U")
            .arg(&self.user)
            .arg("-d")
            .arg(&self.database);

        if let Some(password) = &self.password {
            inv.env.push(("PGPASSWORD".to_string(), password.clone()));
        }
        inv
    }

    pub fn dump_invocation(&self, out: &Path) -> Invocation {
        self.connect(&self.dump_program)
            .arg("--clean")
            .arg("--if-exists")
            .arg("-f")
            .path_arg(out)
    }

    pub fn restore_invocation(&self, input: &Path) -> Invocation {
        self.connect(&self.restore_program)
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-f")
            .path_arg(input)
    }
}

#[async_trait]
impl DumpTool for PostgresTools {
    async fn dump(&self, out: &Path) -> Result<()> {
        self.dump_invocation(out).run().await
    }

    async fn restore(&self, input: &Path) -> Result<()> {
        self.restore_invocation(input).run().await
    }
}

/// `sqlite3` against the record store file.
///
/// Restores replay the dump into a scratch database first, then copy it over
/// the live file with the online backup API (`.restore`), so open
/// connections never see a half-replayed store.
#[derive(Debug, Clone)]
pub struct SqliteTools {
    db_path: PathBuf,
    program: String,
}

impl SqliteTools {
    pub fn new(settings: &DatabaseSettings) -> Self {
        Self {
            db_path: settings.path.clone(),
            program: program_or(&settings.dump_program, "sqlite3"),
        }
    }

    fn scratch_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.restore", self.db_path.display()))
    }

    pub fn dump_invocation(&self, out: &Path) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .path_arg(&self.db_path)
            .arg(".dump");
        inv.stdout = Some(out.to_path_buf());
        inv
    }

    pub fn replay_invocation(&self, input: &Path, scratch: &Path) -> Invocation {
        let mut inv = Invocation::new(&self.program).path_arg(scratch);
        inv.stdin = Some(input.to_path_buf());
        inv
    }

    pub fn swap_invocation(&self, scratch: &Path) -> Invocation {
        Invocation::new(&self.program)
            .path_arg(&self.db_path)
            .arg(format!(".restore '{}'", scratch.display()))
    }
}

#[async_trait]
impl DumpTool for SqliteTools {
    async fn dump(&self, out: &Path) -> Result<()> {
        self.dump_invocation(out).run().await
    }

    async fn restore(&self, input: &Path) -> Result<()> {
        let scratch = self.scratch_path();
        if tokio::fs::try_exists(&scratch).await? {
            tokio::fs::remove_file(&scratch).await?;
        }

        let result = async {
            self.replay_invocation(input, &scratch).run().await?;
            self.swap_invocation(&scratch).run().await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            tracing::debug!("Scratch database {:?} not removed: {}", scratch, e);
        }

        result
    }
}

/// Tools for the configured backend
pub fn tools_for(settings: &DatabaseSettings) -> Arc<dyn DumpTool> {
    match settings.dump_backend {
        DumpBackend::Postgres => Arc::new(PostgresTools::new(settings)),
        DumpBackend::Sqlite => Arc::new(SqliteTools::new(settings)),
    }
}

fn program_or(configured: &str, default: &str) -> String {
    if configured.trim().is_empty() {
        default.to_string()
    } else {
        configured.to_string()
    }
}
