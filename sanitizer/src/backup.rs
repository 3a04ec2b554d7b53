//! Orchestration for `sanitizer backup`.
//!
//! Mirrors the image registry's on-disk metadata to remote storage. The run is
//! gated on the restore marker: backing up before the one-time restore would
//! overwrite the remote copy with an empty registry.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::exit_codes;
use crate::io::config::BackupConfig;
use crate::io::process::run_command;

const CONFIG_SCHEMA: &str = include_str!("../schemas/backup_config.schema.json");

/// Registry layout reported by the config loader.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    pub remote: String,
    pub directories: Vec<PathBuf>,
}

/// One local directory and the remote path it is mirrored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOptions {
    /// Skip the confirmation prompt.
    pub assume_yes: bool,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("restore marker missing: {0} (run the restore first)")]
    MarkerMissing(PathBuf),
    #[error("backup declined")]
    Aborted,
    #[error("sync of {local} failed with status {code:?}")]
    SyncFailed { local: PathBuf, code: Option<i32> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::MarkerMissing(_) => exit_codes::PRECONDITION,
            BackupError::Aborted => exit_codes::ABORTED,
            // The mirror tool's own status; a signal death has none.
            BackupError::SyncFailed { code, .. } => code
                .filter(|code| *code != exit_codes::OK)
                .unwrap_or(exit_codes::SYNC_FAILED),
            BackupError::Other(_) => exit_codes::INVALID,
        }
    }
}

/// Writes the final exit code to the status file when dropped.
///
/// Starts at `INVALID` so an early return or a panic still leaves a failure
/// status behind.
#[derive(Debug)]
pub struct StatusGuard {
    path: PathBuf,
    code: i32,
}

impl StatusGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            code: exit_codes::INVALID,
        }
    }

    pub fn set(&mut self, code: i32) {
        self.code = code;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if let Err(err) = write_status(&self.path, self.code) {
            warn!(path = %self.path.display(), err = %format!("{err:#}"), "failed to write status file");
        }
    }
}

fn write_status(path: &Path, code: i32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, format!("{code}\n")).with_context(|| format!("write {}", path.display()))
}

/// Run a backup and return its exit code, recording it in the status file.
pub fn backup_command<R: BufRead, W: Write>(
    cfg: &BackupConfig,
    opts: &BackupOptions,
    input: &mut R,
    out: &mut W,
) -> i32 {
    let mut status = StatusGuard::new(&cfg.status_path);
    let code = match run_backup(cfg, opts, input, out) {
        Ok(jobs) => {
            info!(synced = jobs.len(), "backup complete");
            exit_codes::OK
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "backup failed");
            eprintln!("{err:#}");
            err.exit_code()
        }
    };
    status.set(code);
    code
}

/// Check the restore marker, load the registry layout, confirm, then mirror each directory.
#[instrument(skip_all)]
pub fn run_backup<R: BufRead, W: Write>(
    cfg: &BackupConfig,
    opts: &BackupOptions,
    input: &mut R,
    out: &mut W,
) -> Result<Vec<SyncJob>, BackupError> {
    if !cfg.restore_marker.exists() {
        return Err(BackupError::MarkerMissing(cfg.restore_marker.clone()));
    }

    let registry = load_registry_config(cfg)?;
    let jobs = plan_jobs(&registry)?;
    for job in &jobs {
        if !job.local.is_dir() {
            return Err(anyhow!("local directory {} does not exist", job.local.display()).into());
        }
    }

    if !opts.assume_yes && !confirm(&jobs, input, out)? {
        return Err(BackupError::Aborted);
    }

    for job in &jobs {
        sync_one(cfg, job)?;
    }
    Ok(jobs)
}

/// Run the config loader and parse its stdout.
fn load_registry_config(cfg: &BackupConfig) -> anyhow::Result<RegistryConfig> {
    let (program, args) = cfg
        .config_command
        .split_first()
        .ok_or_else(|| anyhow!("backup.config_command is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_command(cmd, Some(Duration::from_secs(cfg.config_timeout_secs)))
        .with_context(|| format!("run config loader {program}"))?;
    if output.timed_out {
        bail!("config loader {program} timed out");
    }
    if !output.success() {
        bail!(
            "config loader {program} failed with status {:?}: {}",
            output.status.code(),
            output.stderr_lossy().trim()
        );
    }
    parse_registry_config(&output.stdout_lossy())
}

/// Parse and schema-check the loader's JSON.
pub fn parse_registry_config(raw: &str) -> anyhow::Result<RegistryConfig> {
    let instance: Value = serde_json::from_str(raw).context("parse registry config json")?;
    let schema: Value = serde_json::from_str(CONFIG_SCHEMA).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("registry config invalid:\n- {}", messages.join("\n- "));
    }
    serde_json::from_value(instance).context("parse registry config")
}

/// Map each local directory to `<remote>/<dir name>`.
pub fn plan_jobs(registry: &RegistryConfig) -> anyhow::Result<Vec<SyncJob>> {
    let remote = registry.remote.trim_end_matches('/');
    let mut jobs: Vec<SyncJob> = Vec::with_capacity(registry.directories.len());
    for local in &registry.directories {
        let name = local
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("directory {} has no name", local.display()))?;
        let target = format!("{remote}/{name}");
        if jobs.iter().any(|job| job.remote == target) {
            bail!("directories map to the same remote path {target}");
        }
        jobs.push(SyncJob {
            local: local.clone(),
            remote: target,
        });
    }
    Ok(jobs)
}

fn confirm<R: BufRead, W: Write>(
    jobs: &[SyncJob],
    input: &mut R,
    out: &mut W,
) -> anyhow::Result<bool> {
    writeln!(out, "About to mirror (remote extras are deleted):").context("write prompt")?;
    for job in jobs {
        writeln!(out, "  {} -> {}", job.local.display(), job.remote).context("write prompt")?;
    }
    write!(out, "Proceed? [y/N] ").context("write prompt")?;
    out.flush().context("flush prompt")?;

    let mut answer = String::new();
    input.read_line(&mut answer).context("read answer")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[instrument(skip_all, fields(local = %job.local.display(), remote = %job.remote))]
fn sync_one(cfg: &BackupConfig, job: &SyncJob) -> Result<(), BackupError> {
    let (program, args) = cfg
        .sync_command
        .split_first()
        .ok_or_else(|| anyhow!("backup.sync_command is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(&job.local).arg(&job.remote);

    info!("syncing");
    let output = run_command(cmd, None).with_context(|| format!("run sync command {program}"))?;
    if !output.success() {
        warn!(exit_code = ?output.status.code(), stderr = %output.stderr_lossy().trim(), "sync failed");
        return Err(BackupError::SyncFailed {
            local: job.local.clone(),
            code: output.status.code(),
        });
    }
    debug!("sync finished");
    Ok(())
}
