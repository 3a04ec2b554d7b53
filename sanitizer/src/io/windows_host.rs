//! Production [`Host`] backed by `reg.exe`, the cleanup utility and PowerShell.

use std::process::Command;

use tracing::{info, instrument, warn};

use crate::io::host::{CleanupRequest, Host, HostError, HostResult, PurgeSummary};
use crate::io::process::{is_not_found, run_command};
use crate::io::purge;
use crate::io::registry::Reg;

/// Host that mutates the live machine.
#[derive(Debug, Clone)]
pub struct WindowsHost {
    reg: Reg,
    recycle_command: Vec<String>,
}

impl WindowsHost {
    pub fn new(reg: Reg, recycle_command: Vec<String>) -> Self {
        Self {
            reg,
            recycle_command,
        }
    }
}

impl Host for WindowsHost {
    fn move_key(&self, from: &str, to: &str) -> HostResult<()> {
        self.reg.move_key(from, to)
    }

    fn list_subkeys(&self, parent: &str) -> HostResult<Vec<String>> {
        self.reg.subkeys(parent)
    }

    fn read_dword(&self, key: &str, name: &str) -> HostResult<Option<u32>> {
        self.reg.query_dword(key, name)
    }

    fn write_dword(&self, key: &str, name: &str, value: u32) -> HostResult<()> {
        self.reg.add_dword(key, name, value)
    }

    fn delete_value(&self, key: &str, name: &str) -> HostResult<()> {
        self.reg.delete_value(key, name)
    }

    fn delete_key_if_empty(&self, key: &str) -> HostResult<bool> {
        self.reg.delete_key_if_empty(key)
    }

    #[instrument(skip_all, fields(program = %request.program))]
    fn run_cleanup(&self, request: &CleanupRequest) -> HostResult<()> {
        info!(args = ?request.args, "running cleanup utility");
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        let out = run_command(cmd, request.timeout).map_err(|err| {
            if is_not_found(&err) {
                HostError::unavailable(format!("{}: {err:#}", request.program))
            } else {
                HostError::other(format!("{}: {err:#}", request.program))
            }
        })?;
        if out.timed_out {
            return Err(HostError::other(format!(
                "{} timed out after {:?}",
                request.program, request.timeout
            )));
        }
        // The utility's exit code carries no contract.
        info!(exit_code = ?out.status.code(), "cleanup utility finished");
        Ok(())
    }

    #[instrument(skip_all)]
    fn empty_recycle_bin(&self) -> HostResult<()> {
        let Some((program, args)) = self.recycle_command.split_first() else {
            return Err(HostError::other("empty recycle command"));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        let out = run_command(cmd, None).map_err(|err| {
            if is_not_found(&err) {
                HostError::unavailable(format!("{program}: {err:#}"))
            } else {
                HostError::other(format!("{program}: {err:#}"))
            }
        })?;
        if out.success() {
            return Ok(());
        }
        let stderr = out.stderr_lossy();
        warn!(exit_code = ?out.status.code(), stderr = %stderr.trim(), "recycle command failed");
        Err(classify_recycle_failure(&stderr))
    }

    fn purge(&self, pattern: &str) -> HostResult<PurgeSummary> {
        purge::purge(pattern).map_err(|err| HostError::other(format!("{err:#}")))
    }
}

/// Classify a failed `Clear-RecycleBin` from the PowerShell error record.
pub fn classify_recycle_failure(stderr: &str) -> HostError {
    let detail = stderr.trim().to_string();
    if stderr.contains("CommandNotFoundException") || stderr.contains("is not recognized") {
        HostError::unavailable(detail)
    } else if stderr.contains("Win32Exception") {
        HostError::os(detail)
    } else {
        HostError::other(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorKind;

    fn host(recycle_command: &[&str]) -> WindowsHost {
        WindowsHost::new(
            Reg::new("sanitizer-no-such-reg-7f3a"),
            recycle_command.iter().map(|arg| arg.to_string()).collect(),
        )
    }

    #[test]
    fn recycle_failures_are_classified() {
        let missing = classify_recycle_failure(
            "Clear-RecycleBin : The term 'Clear-RecycleBin' is not recognized as the name of a cmdlet\n\
             + FullyQualifiedErrorId : CommandNotFoundException",
        );
        assert_eq!(missing.kind, ErrorKind::UtilityUnavailable);

        let os = classify_recycle_failure(
            "Clear-RecycleBin : The system cannot find the path specified\n\
             + CategoryInfo : NotSpecified: (:) [Clear-RecycleBin], Win32Exception",
        );
        assert_eq!(os.kind, ErrorKind::Os);

        let other = classify_recycle_failure("Access denied");
        assert_eq!(other.kind, ErrorKind::Other);
    }

    #[test]
    fn missing_cleanup_utility_is_unavailable() {
        let err = host(&["true"])
            .run_cleanup(&CleanupRequest {
                program: "sanitizer-no-such-cleanmgr-7f3a".to_string(),
                args: vec!["/autoclean".to_string()],
                timeout: None,
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UtilityUnavailable);
    }

    #[test]
    fn missing_recycle_program_is_unavailable() {
        let err = host(&["sanitizer-no-such-powershell-7f3a"])
            .empty_recycle_bin()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UtilityUnavailable);
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_exit_code_is_ignored() {
        host(&["true"])
            .run_cleanup(&CleanupRequest {
                program: "false".to_string(),
                args: Vec::new(),
                timeout: None,
            })
            .expect("exit code ignored");
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_timeout_is_a_failure() {
        let err = host(&["true"])
            .run_cleanup(&CleanupRequest {
                program: "sleep".to_string(),
                args: vec!["5".to_string()],
                timeout: Some(std::time::Duration::from_millis(100)),
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
    }
}
