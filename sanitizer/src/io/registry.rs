//! `reg.exe` adapter.
//!
//! Registry edits go through the stock `reg` tool rather than the Win32 API so
//! every mutation is a visible, loggable command. `reg` exits 1 for every
//! error and localizes its messages, so absence is never read from stderr. A
//! key is missing when its parent's listing does not name it, and a value is
//! missing when its key's listing does not carry it.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::io::host::{HostError, HostResult};
use crate::io::process::{CommandOutput, is_not_found, run_command};

/// Upper bound for a single `reg` invocation.
pub const REG_TIMEOUT: Duration = Duration::from_secs(60);

static VALUE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(.+?)\s{4}(REG_[A-Z_]+)\s{4}(.*)$").unwrap());

const HIVE_ALIASES: [(&str, &str); 5] = [
    ("HKLM", "HKEY_LOCAL_MACHINE"),
    ("HKCU", "HKEY_CURRENT_USER"),
    ("HKCR", "HKEY_CLASSES_ROOT"),
    ("HKU", "HKEY_USERS"),
    ("HKCC", "HKEY_CURRENT_CONFIG"),
];

/// Wrapper for executing `reg` commands.
#[derive(Debug, Clone)]
pub struct Reg {
    program: PathBuf,
}

impl Default for Reg {
    fn default() -> Self {
        Self::new("reg.exe")
    }
}

impl Reg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Whether `key` exists, decided from its parent's subkey listing.
    pub fn key_exists(&self, key: &str) -> HostResult<bool> {
        let key = key.trim_end_matches('\\');
        let Some((parent, _)) = key.rsplit_once('\\') else {
            // Hive roots always exist.
            return Ok(true);
        };
        match self.run_checked(&["query", parent]) {
            Ok(out) => Ok(lists_subkey(&out.stdout_lossy(), parent, key)),
            Err(err) => {
                if self.key_exists(parent)? {
                    Err(err)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Full paths of the direct subkeys of `parent`.
    #[instrument(skip_all, fields(parent = %parent))]
    pub fn subkeys(&self, parent: &str) -> HostResult<Vec<String>> {
        let out = self.run_checked(&["query", parent])?;
        let keys = parse_subkeys(&out.stdout_lossy(), parent);
        debug!(count = keys.len(), "listed subkeys");
        Ok(keys)
    }

    /// Read DWORD `name` under `key`. A missing value is `Ok(None)`.
    ///
    /// Lists every value of `key` rather than asking for `name`, so a missing
    /// value is an absent line instead of a failed command.
    pub fn query_dword(&self, key: &str, name: &str) -> HostResult<Option<u32>> {
        let out = self.run_checked(&["query", key])?;
        parse_dword(&out.stdout_lossy(), name)
    }

    pub fn add_dword(&self, key: &str, name: &str, value: u32) -> HostResult<()> {
        let data = value.to_string();
        self.run_checked(&["add", key, "/v", name, "/t", "REG_DWORD", "/d", &data, "/f"])?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str, name: &str) -> HostResult<()> {
        self.run_checked(&["delete", key, "/v", name, "/f"])?;
        Ok(())
    }

    /// Copy `from` (with subkeys) to `to`, then delete `from`.
    #[instrument(skip_all, fields(from = %from, to = %to))]
    pub fn move_key(&self, from: &str, to: &str) -> HostResult<()> {
        if !self.key_exists(from)? {
            return Err(HostError::absent(format!("registry key {from} not found")));
        }
        self.run_checked(&["copy", from, to, "/s", "/f"])?;
        self.run_checked(&["delete", from, "/f"])?;
        debug!("moved registry key");
        Ok(())
    }

    /// Delete `key` when it has no subkeys left. `Ok(false)` when it is
    /// missing or still holds subkeys.
    #[instrument(skip_all, fields(key = %key))]
    pub fn delete_key_if_empty(&self, key: &str) -> HostResult<bool> {
        if !self.key_exists(key)? {
            return Ok(false);
        }
        let out = self.run_checked(&["query", key])?;
        if !parse_subkeys(&out.stdout_lossy(), key).is_empty() {
            debug!("key still has subkeys");
            return Ok(false);
        }
        self.run_checked(&["delete", key, "/f"])?;
        debug!("deleted empty key");
        Ok(true)
    }

    fn run_checked(&self, args: &[&str]) -> HostResult<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        let out = run_command(cmd, Some(REG_TIMEOUT)).map_err(|err| {
            if is_not_found(&err) {
                HostError::unavailable(format!("{}: {err:#}", self.program.display()))
            } else {
                HostError::other(format!("reg {}: {err:#}", args.join(" ")))
            }
        })?;
        if out.timed_out {
            warn!(args = ?args, "reg timed out");
            return Err(HostError::other(format!("reg {} timed out", args.join(" "))));
        }
        if !out.success() {
            let stderr = out.stderr_lossy();
            return Err(classify_reg_failure(args, &stderr));
        }
        Ok(out)
    }
}

/// A `reg` command that ran and failed. The message is kept for logs only.
fn classify_reg_failure(args: &[&str], stderr: &str) -> HostError {
    HostError::os(format!("reg {}: {}", args.join(" "), stderr.trim()))
}

/// Expand a leading hive alias (`HKLM`) to the long name `reg query` prints.
pub fn canonical_key(key: &str) -> String {
    let (head, rest) = match key.split_once('\\') {
        Some((head, rest)) => (head, Some(rest)),
        None => (key, None),
    };
    let hive = HIVE_ALIASES
        .iter()
        .find(|(short, _)| short.eq_ignore_ascii_case(head))
        .map_or(head, |(_, long)| *long);
    match rest {
        Some(rest) => format!("{hive}\\{rest}"),
        None => hive.to_string(),
    }
}

/// Direct subkeys listed in `reg query <parent>` output.
pub fn parse_subkeys(stdout: &str, parent: &str) -> Vec<String> {
    let prefix = format!(
        "{}\\",
        canonical_key(parent.trim_end_matches('\\')).to_ascii_lowercase()
    );
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with(char::is_whitespace))
        .filter(|line| {
            let lower = canonical_key(line).to_ascii_lowercase();
            lower
                .strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('\\'))
        })
        .map(str::to_string)
        .collect()
}

/// Whether `reg query <parent>` output lists `key` as a direct subkey.
pub fn lists_subkey(stdout: &str, parent: &str, key: &str) -> bool {
    let wanted = canonical_key(key.trim_end_matches('\\')).to_ascii_lowercase();
    parse_subkeys(stdout, parent)
        .iter()
        .any(|listed| canonical_key(listed).to_ascii_lowercase() == wanted)
}

/// Value of DWORD `name` in `reg query <key> /v <name>` output.
pub fn parse_dword(stdout: &str, name: &str) -> HostResult<Option<u32>> {
    for line in stdout.lines() {
        let Some(caps) = VALUE_LINE_RE.captures(line.trim_end()) else {
            continue;
        };
        if !caps[1].eq_ignore_ascii_case(name) {
            continue;
        }
        if &caps[2] != "REG_DWORD" {
            return Err(HostError::other(format!(
                "value {name} has type {}, expected REG_DWORD",
                &caps[2]
            )));
        }
        let raw = caps[3].trim();
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        let value = u32::from_str_radix(digits, 16)
            .map_err(|err| HostError::other(format!("parse {name} data {raw:?}: {err}")))?;
        return Ok(Some(value));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorKind;

    const PARENT: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches";

    #[test]
    fn canonical_key_expands_aliases() {
        assert_eq!(
            canonical_key(r"hklm\SOFTWARE\Foo"),
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Foo"
        );
        assert_eq!(canonical_key("HKU"), "HKEY_USERS");
        assert_eq!(
            canonical_key(r"HKEY_CURRENT_USER\X"),
            r"HKEY_CURRENT_USER\X"
        );
    }

    #[test]
    fn parse_subkeys_keeps_direct_children_only() {
        let stdout = [
            "",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches",
            "    (Default)    REG_SZ    x",
            "",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Active Setup Temp Folders",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Temporary Files",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCachesStash\Update Cleanup",
        ]
        .join("\r\n");

        let keys = parse_subkeys(&stdout, PARENT);
        assert_eq!(
            keys,
            vec![
                r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Active Setup Temp Folders",
                r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Temporary Files",
            ]
        );
    }

    #[test]
    fn parse_dword_reads_hex_data() {
        let stdout = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\X\r\n    Autorun    REG_DWORD    0x1\r\n\r\n";
        assert_eq!(parse_dword(stdout, "Autorun").expect("parse"), Some(1));
        assert_eq!(parse_dword(stdout, "autorun").expect("parse"), Some(1));
    }

    #[test]
    fn parse_dword_missing_value_is_none() {
        let stdout = "\r\nHKEY_LOCAL_MACHINE\\SOFTWARE\\X\r\n    Other    REG_DWORD    0x0\r\n";
        assert_eq!(parse_dword(stdout, "Autorun").expect("parse"), None);
    }

    #[test]
    fn parse_dword_rejects_other_types() {
        let stdout = "    Autorun    REG_SZ    yes\r\n";
        let err = parse_dword(stdout, "Autorun").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
    }

    #[test]
    fn reg_failures_never_depend_on_message_language() {
        for stderr in [
            "ERROR: The system was unable to find the specified registry key or value.",
            "FEHLER: Der angegebene Registrierungsschlüssel bzw. Wert wurde nicht gefunden.",
            "ERROR: Access is denied.",
        ] {
            let err = classify_reg_failure(&["query", r"HKLM\X"], stderr);
            assert_eq!(err.kind, ErrorKind::Os, "stderr {stderr:?}");
        }
    }

    #[test]
    fn lists_subkey_matches_direct_children_by_name() {
        let stdout = [
            "",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Update Cleanup",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Explorer\VolumeCaches\Temporary Files",
        ]
        .join("\r\n");

        assert!(lists_subkey(&stdout, PARENT, &format!(r"{PARENT}\update cleanup")));
        assert!(!lists_subkey(&stdout, PARENT, &format!(r"{PARENT}\Service Pack Cleanup")));
        // A prefix of a listed name is not a match.
        assert!(!lists_subkey(&stdout, PARENT, &format!(r"{PARENT}\Update")));
    }

    #[test]
    fn parse_dword_finds_value_in_full_key_listing() {
        let stdout = [
            "",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\X",
            "    (Default)    REG_SZ    {C0E13E61-0CC6-11d1-BBB6-0060978B2AE6}",
            "    Display    REG_SZ    Temporary Files",
            "    Autorun    REG_DWORD    0x0",
            "",
            r"HKEY_LOCAL_MACHINE\SOFTWARE\X\Child",
        ]
        .join("\r\n");
        assert_eq!(parse_dword(&stdout, "Autorun").expect("parse"), Some(0));
        assert_eq!(parse_dword(&stdout, "StateFlags0001").expect("parse"), None);
    }

    #[test]
    fn missing_reg_program_is_not_mistaken_for_absence() {
        let reg = Reg::new("sanitizer-no-such-reg-7f3a");
        let err = reg
            .key_exists(&format!(r"{PARENT}\Update Cleanup"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UtilityUnavailable);
        let err = reg.query_dword(PARENT, "Autorun").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UtilityUnavailable);
    }

    #[test]
    fn missing_reg_program_is_unavailable() {
        let reg = Reg::new("sanitizer-no-such-reg-7f3a");
        let err = reg.subkeys(PARENT).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UtilityUnavailable);
    }
}
