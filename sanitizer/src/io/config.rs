//! Sanitizer configuration (TOML).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::registry::canonical_key;

/// Default location of the config file on an image.
pub const DEFAULT_CONFIG_PATH: &str = r"C:\ProgramData\sanitizer\config.toml";

/// Top-level configuration.
///
/// Missing fields default to the values baked into the image pipeline, so an
/// absent file yields a working config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub sanitize: SanitizeConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Parent key holding one subkey per cleanup category.
    pub volume_caches_key: String,

    /// Key the expensive categories are parked under while the cleanup utility runs.
    /// Must not be inside `volume_caches_key`.
    pub stash_key: String,

    /// Exactly two category names kept out of the unattended cleanup.
    pub expensive_categories: Vec<String>,

    /// DWORD value the cleanup utility reads to decide whether a category runs.
    pub autorun_value: String,

    /// Executable invoked as `<metadata_sink> <key> <value>`.
    pub metadata_sink: PathBuf,

    pub cleanup_utility: String,
    pub cleanup_args: Vec<String>,

    /// Kill the cleanup utility after this many seconds. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanmgr_timeout_secs: Option<u64>,

    /// Command that empties every recycle bin.
    pub recycle_command: Vec<String>,

    /// Wildcard paths force-deleted at the end of a run.
    pub purge_globs: Vec<String>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            volume_caches_key:
                r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches".to_string(),
            stash_key: r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCachesStash"
                .to_string(),
            expensive_categories: vec![
                "Update Cleanup".to_string(),
                "Service Pack Cleanup".to_string(),
            ],
            autorun_value: "Autorun".to_string(),
            metadata_sink: PathBuf::from(r"C:\Program Files\sanitizer\metadata.exe"),
            cleanup_utility: "cleanmgr.exe".to_string(),
            cleanup_args: vec!["/autoclean".to_string()],
            cleanmgr_timeout_secs: None,
            recycle_command: vec![
                "powershell.exe".to_string(),
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                "Clear-RecycleBin -Force -ErrorAction Stop".to_string(),
            ],
            purge_globs: [
                r"C:\Windows\Temp\*",
                r"C:\Windows\Logs\*",
                r"C:\Windows\Minidump\*",
                r"C:\PerfLogs\*",
                r"C:\Windows\Downloaded Program Files\*",
                r"C:\Windows\*.log",
                r"C:\Users\*\AppData\Local\Temp\*",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl SanitizeConfig {
    pub fn cleanmgr_timeout(&self) -> Option<Duration> {
        self.cleanmgr_timeout_secs.map(Duration::from_secs)
    }

    /// Registry path of category `name` under the cleanup parent.
    pub fn category_key(&self, name: &str) -> String {
        format!("{}\\{name}", self.volume_caches_key.trim_end_matches('\\'))
    }

    /// Registry path of category `name` while stashed.
    pub fn stashed_key(&self, name: &str) -> String {
        format!("{}\\{name}", self.stash_key.trim_end_matches('\\'))
    }

    pub fn validate(&self) -> Result<()> {
        if self.volume_caches_key.trim().is_empty() {
            return Err(anyhow!("sanitize.volume_caches_key must be non-empty"));
        }
        if self.stash_key.trim().is_empty() {
            return Err(anyhow!("sanitize.stash_key must be non-empty"));
        }
        let parent = canonical_key(self.volume_caches_key.trim_end_matches('\\'))
            .to_ascii_lowercase();
        let stash = canonical_key(self.stash_key.trim_end_matches('\\')).to_ascii_lowercase();
        if stash == parent || stash.starts_with(&format!("{parent}\\")) {
            return Err(anyhow!(
                "sanitize.stash_key must be outside sanitize.volume_caches_key"
            ));
        }
        if self.expensive_categories.len() != 2 {
            return Err(anyhow!(
                "sanitize.expensive_categories must name exactly 2 categories (got {})",
                self.expensive_categories.len()
            ));
        }
        for name in &self.expensive_categories {
            if name.trim().is_empty() || name.contains('\\') {
                return Err(anyhow!(
                    "sanitize.expensive_categories entry {name:?} must be a plain key name"
                ));
            }
        }
        if self.autorun_value.trim().is_empty() {
            return Err(anyhow!("sanitize.autorun_value must be non-empty"));
        }
        if self.metadata_sink.as_os_str().is_empty() {
            return Err(anyhow!("sanitize.metadata_sink must be non-empty"));
        }
        if self.cleanup_utility.trim().is_empty() {
            return Err(anyhow!("sanitize.cleanup_utility must be non-empty"));
        }
        if self.cleanmgr_timeout_secs == Some(0) {
            return Err(anyhow!("sanitize.cleanmgr_timeout_secs must be > 0 when set"));
        }
        if self.recycle_command.is_empty() || self.recycle_command[0].trim().is_empty() {
            return Err(anyhow!("sanitize.recycle_command must be a non-empty array"));
        }
        if self.purge_globs.iter().any(|glob| glob.trim().is_empty()) {
            return Err(anyhow!("sanitize.purge_globs entries must be non-empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Sentinel written by the one-time restore; backups refuse to run without it.
    pub restore_marker: PathBuf,

    /// File that receives the exit code of every backup invocation.
    pub status_path: PathBuf,

    /// Command printing the registry config as JSON on stdout.
    pub config_command: Vec<String>,

    /// Mirror command; `<local> <remote>` are appended.
    pub sync_command: Vec<String>,

    /// Upper bound for the config loader.
    pub config_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            restore_marker: PathBuf::from("/var/lib/registry/.restored"),
            status_path: PathBuf::from("/var/lib/registry/backup.status"),
            config_command: vec!["registry-config".to_string(), "--json".to_string()],
            sync_command: vec![
                "gsutil".to_string(),
                "-m".to_string(),
                "rsync".to_string(),
                "-r".to_string(),
                "-d".to_string(),
            ],
            config_timeout_secs: 60,
        }
    }
}

impl BackupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.restore_marker.as_os_str().is_empty() {
            return Err(anyhow!("backup.restore_marker must be non-empty"));
        }
        if self.status_path.as_os_str().is_empty() {
            return Err(anyhow!("backup.status_path must be non-empty"));
        }
        if self.config_command.is_empty() || self.config_command[0].trim().is_empty() {
            return Err(anyhow!("backup.config_command must be a non-empty array"));
        }
        if self.sync_command.is_empty() || self.sync_command[0].trim().is_empty() {
            return Err(anyhow!("backup.sync_command must be a non-empty array"));
        }
        if self.config_timeout_secs == 0 {
            return Err(anyhow!("backup.config_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.sanitize.validate()?;
        self.backup.validate()?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Render config as TOML with a trailing newline.
pub fn render_config(cfg: &Config) -> Result<String> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}
