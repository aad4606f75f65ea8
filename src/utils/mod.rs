pub mod archive;
pub mod scratch;

use serde::de::DeserializeOwned;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use which::which;

use crate::errors::{MigrationError, Result};

/// Finds an external tool (pg_dump, azcopy, az, ...) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        MigrationError::Configuration(format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        ))
    })
}

/// Runs an external command to completion and returns its stdout.
///
/// Arguments are never logged since several of them (SAS URLs, registry passwords) carry secrets.
/// On unix the child leads its own process group, so a terminal Ctrl-C reaches only this
/// process and in-flight dumps and copies run to completion while the batch winds down.
pub async fn run_command<I, S>(program: &Path, args: I, envs: &[(&str, &str)]) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program_name = program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string());
    debug!(program = %program_name, "running external command");

    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().await?;

    if !output.status.success() {
        return Err(MigrationError::Command {
            program: program_name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Thin wrapper around the `az` CLI returning parsed JSON output.
#[derive(Debug, Clone)]
pub struct AzCli {
    path: PathBuf,
}

/// Environment variable `az storage` reads the account key from, keeping it off the command line.
pub const STORAGE_KEY_ENV: &str = "AZURE_STORAGE_KEY";

impl AzCli {
    pub fn locate() -> Result<Self> {
        Ok(Self {
            path: find_executable("az")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        self.json_with_env(args, &[]).await
    }

    pub async fn json_with_env<T: DeserializeOwned>(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<T> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend_from_slice(&["--output", "json", "--only-show-errors"]);
        let stdout = run_command(&self.path, &full, envs).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Runs a command whose output is not needed.
    pub async fn run(&self, args: &[&str]) -> Result<()> {
        let mut full: Vec<&str> = args.to_vec();
        full.push("--only-show-errors");
        run_command(&self.path, &full, &[]).await.map(|_| ())
    }
}

/// Quotes a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
