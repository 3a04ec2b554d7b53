//! Metadata sink: the key/value channel the image capture pipeline polls.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command;

pub const STATE_KEY: &str = "state";
pub const ERROR_KEY: &str = "error";

/// Upper bound for a single sink invocation.
pub const SINK_TIMEOUT: Duration = Duration::from_secs(60);

/// Abstraction over the metadata sink.
pub trait MetadataSink {
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Sink backed by an external executable invoked as `<program> <key> <value>`.
#[derive(Debug, Clone)]
pub struct ExeSink {
    program: PathBuf,
}

impl ExeSink {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MetadataSink for ExeSink {
    #[instrument(skip_all, fields(key = %key, value = %value))]
    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(key).arg(value);
        let out = run_command(cmd, Some(SINK_TIMEOUT))
            .with_context(|| format!("run metadata sink {}", self.program.display()))?;
        if out.timed_out {
            return Err(anyhow!("metadata sink timed out after {SINK_TIMEOUT:?}"));
        }
        if !out.success() {
            warn!(exit_code = ?out.status.code(), stderr = %out.stderr_lossy().trim(), "metadata sink failed");
            return Err(anyhow!(
                "metadata sink failed with status {:?}",
                out.status.code()
            ));
        }
        debug!("metadata written");
        Ok(())
    }
}
