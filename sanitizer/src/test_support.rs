//! Test-only fakes for driving `run_sanitize` without touching the OS.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::types::ErrorKind;
use crate::io::host::{CleanupRequest, Host, HostError, HostResult, PurgeSummary};
use crate::io::metadata::MetadataSink;

/// Host operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    MoveKey,
    ListSubkeys,
    ReadDword,
    WriteDword,
    DeleteValue,
    DeleteKey,
    RunCleanup,
    EmptyRecycleBin,
}

#[derive(Debug, Clone)]
struct Failure {
    op: FakeOp,
    /// Only fail for this key; `None` fails every call.
    key: Option<String>,
    kind: ErrorKind,
}

/// In-memory registry plus call log.
///
/// Every key maps to the autorun flag it carries (`None` when the value is absent).
#[derive(Debug, Default)]
pub struct FakeHost {
    keys: RefCell<BTreeMap<String, Option<u32>>>,
    failures: Vec<Failure>,
    failing_purges: Vec<String>,
    calls: RefCell<Vec<String>>,
    purged: RefCell<Vec<String>>,
    cleanup_requests: RefCell<Vec<CleanupRequest>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(self, key: &str, flag: Option<u32>) -> Self {
        self.keys.borrow_mut().insert(key.to_string(), flag);
        self
    }

    /// Fail every call to `op` with `kind`.
    pub fn failing(mut self, op: FakeOp, kind: ErrorKind) -> Self {
        self.failures.push(Failure {
            op,
            key: None,
            kind,
        });
        self
    }

    /// Fail calls to `op` that address `key`.
    pub fn failing_at(mut self, op: FakeOp, key: &str, kind: ErrorKind) -> Self {
        self.failures.push(Failure {
            op,
            key: Some(key.to_string()),
            kind,
        });
        self
    }

    pub fn failing_purge(mut self, pattern: &str) -> Self {
        self.failing_purges.push(pattern.to_string());
        self
    }

    pub fn key_exists(&self, key: &str) -> bool {
        self.keys.borrow().contains_key(key)
    }

    /// Autorun flag of `key`; `None` when the key or the value is missing.
    pub fn flag(&self, key: &str) -> Option<u32> {
        self.keys.borrow().get(key).copied().flatten()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Option<u32>> {
        self.keys.borrow().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls whose operation name is `op` (e.g. `"write_dword"`).
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .cloned()
            .collect()
    }

    pub fn purged(&self) -> Vec<String> {
        self.purged.borrow().clone()
    }

    pub fn cleanup_requests(&self) -> Vec<CleanupRequest> {
        self.cleanup_requests.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, op: FakeOp, key: Option<&str>) -> HostResult<()> {
        let hit = self.failures.iter().find(|failure| {
            failure.op == op
                && match (&failure.key, key) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        });
        match hit {
            Some(failure) => Err(HostError::new(
                failure.kind,
                format!("injected {:?} failure", failure.op),
            )),
            None => Ok(()),
        }
    }
}

impl Host for FakeHost {
    fn move_key(&self, from: &str, to: &str) -> HostResult<()> {
        self.record(format!("move_key {from} -> {to}"));
        self.check(FakeOp::MoveKey, Some(from))?;
        let mut keys = self.keys.borrow_mut();
        let Some(flag) = keys.remove(from) else {
            return Err(HostError::absent(format!("{from} not found")));
        };
        keys.insert(to.to_string(), flag);
        Ok(())
    }

    fn list_subkeys(&self, parent: &str) -> HostResult<Vec<String>> {
        self.record(format!("list_subkeys {parent}"));
        self.check(FakeOp::ListSubkeys, Some(parent))?;
        let prefix = format!("{parent}\\");
        Ok(self
            .keys
            .borrow()
            .keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('\\'))
            })
            .cloned()
            .collect())
    }

    fn read_dword(&self, key: &str, _name: &str) -> HostResult<Option<u32>> {
        self.record(format!("read_dword {key}"));
        self.check(FakeOp::ReadDword, Some(key))?;
        match self.keys.borrow().get(key) {
            Some(flag) => Ok(*flag),
            None => Err(HostError::absent(format!("{key} not found"))),
        }
    }

    fn write_dword(&self, key: &str, _name: &str, value: u32) -> HostResult<()> {
        self.record(format!("write_dword {key}={value}"));
        self.check(FakeOp::WriteDword, Some(key))?;
        match self.keys.borrow_mut().get_mut(key) {
            Some(flag) => {
                *flag = Some(value);
                Ok(())
            }
            None => Err(HostError::absent(format!("{key} not found"))),
        }
    }

    fn delete_value(&self, key: &str, _name: &str) -> HostResult<()> {
        self.record(format!("delete_value {key}"));
        self.check(FakeOp::DeleteValue, Some(key))?;
        match self.keys.borrow_mut().get_mut(key) {
            Some(flag) => {
                *flag = None;
                Ok(())
            }
            None => Err(HostError::absent(format!("{key} not found"))),
        }
    }

    fn delete_key_if_empty(&self, key: &str) -> HostResult<bool> {
        self.record(format!("delete_key_if_empty {key}"));
        self.check(FakeOp::DeleteKey, Some(key))?;
        let prefix = format!("{key}\\");
        let mut keys = self.keys.borrow_mut();
        if keys.keys().any(|existing| existing.starts_with(&prefix)) {
            return Ok(false);
        }
        Ok(keys.remove(key).is_some())
    }

    fn run_cleanup(&self, request: &CleanupRequest) -> HostResult<()> {
        self.record(format!("run_cleanup {}", request.program));
        self.cleanup_requests.borrow_mut().push(request.clone());
        self.check(FakeOp::RunCleanup, None)
    }

    fn empty_recycle_bin(&self) -> HostResult<()> {
        self.record("empty_recycle_bin".to_string());
        self.check(FakeOp::EmptyRecycleBin, None)
    }

    fn purge(&self, pattern: &str) -> HostResult<PurgeSummary> {
        self.record(format!("purge {pattern}"));
        self.purged.borrow_mut().push(pattern.to_string());
        if self.failing_purges.iter().any(|failing| failing == pattern) {
            return Err(HostError::other(format!("injected purge failure for {pattern}")));
        }
        Ok(PurgeSummary::default())
    }
}

/// Sink that records every `put` in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    puts: RefCell<Vec<(String, String)>>,
    failing_key: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `put` to `key`.
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_key = Some(key.to_string());
        self
    }

    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.borrow().clone()
    }

    /// Most recent value written to `key`.
    pub fn last(&self, key: &str) -> Option<String> {
        self.puts
            .borrow()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Every value written to `key`, in order.
    pub fn values(&self, key: &str) -> Vec<String> {
        self.puts
            .borrow()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl MetadataSink for RecordingSink {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        if self.failing_key.as_deref() == Some(key) {
            return Err(anyhow!("metadata sink rejected {key}"));
        }
        self.puts
            .borrow_mut()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

/// Create a temp directory containing `files` (relative paths, parents created).
pub fn temp_tree(files: &[&str]) -> Result<tempfile::TempDir> {
    let temp = tempfile::tempdir().context("create tempdir")?;
    for file in files {
        write_file(&temp.path().join(file))?;
    }
    Ok(temp)
}

fn write_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, b"cruft").with_context(|| format!("write {}", path.display()))
}
