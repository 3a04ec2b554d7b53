//! Best-effort deletion of wildcard paths.
//!
//! Patterns use `*` and `?` inside any path component (`C:\Users\*\AppData\Local\Temp\*`).
//! Each component is matched against directory listings one level at a time, so a
//! wildcard never crosses a separator.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::io::host::PurgeSummary;

/// Expand `pattern` to the existing paths it matches, in sorted order.
///
/// Unreadable directories along the way are skipped.
pub fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut current = vec![PathBuf::new()];
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        let is_wild = matches!(component, Component::Normal(_)) && has_wildcard(&text);
        if !is_wild {
            current = current
                .into_iter()
                .map(|base| base.join(component.as_os_str()))
                .collect();
            continue;
        }
        let matcher = component_regex(&text)?;
        let mut next = Vec::new();
        for base in &current {
            let dir = if base.as_os_str().is_empty() {
                Path::new(".")
            } else {
                base.as_path()
            };
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = %dir.display(), err = %err, "skip unreadable directory");
                    continue;
                }
            };
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| matcher.is_match(name))
                .collect();
            names.sort();
            next.extend(names.into_iter().map(|name| base.join(name)));
        }
        current = next;
    }
    current.retain(|path| !path.as_os_str().is_empty() && fs::symlink_metadata(path).is_ok());
    Ok(current)
}

/// Force-delete everything `pattern` matches. Per-item failures are counted, not returned.
pub fn purge(pattern: &str) -> Result<PurgeSummary> {
    let targets = expand(pattern).with_context(|| format!("expand {pattern}"))?;
    let mut summary = PurgeSummary {
        matched: targets.len(),
        ..PurgeSummary::default()
    };
    for target in &targets {
        match remove_tree(target, remove_entry) {
            0 => summary.removed += 1,
            failed => summary.failed += failed,
        }
    }
    debug!(pattern, ?summary, "purged pattern");
    Ok(summary)
}

/// Delete `root` and everything below it, children first.
///
/// An entry that cannot be deleted is logged and skipped; its siblings are still
/// tried. Returns the number of entries left behind.
fn remove_tree<F>(root: &Path, mut remove: F) -> usize
where
    F: FnMut(&Path, bool) -> io::Result<()>,
{
    let mut failed = 0;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failed += 1;
                warn!(root = %root.display(), err = %err, "failed to walk");
                continue;
            }
        };
        if let Err(err) = remove(entry.path(), entry.file_type().is_dir()) {
            failed += 1;
            warn!(path = %entry.path().display(), err = %err, "failed to delete");
        }
    }
    failed
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.file_type().is_symlink() && meta.permissions().readonly() {
        let mut perms = meta.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

fn has_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

/// Anchored regex for one wildcard path component.
fn component_regex(glob: &str) -> Result<Regex> {
    let mut source = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    RegexBuilder::new(&source)
        .case_insensitive(cfg!(windows))
        .build()
        .with_context(|| format!("compile wildcard {glob}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, b"x").expect("write");
    }

    fn pattern(root: &Path, rest: &str) -> String {
        root.join(rest).to_string_lossy().into_owned()
    }

    #[test]
    fn component_regex_matches_whole_name() {
        let re = component_regex("*.log").expect("regex");
        assert!(re.is_match("setup.log"));
        assert!(re.is_match(".log"));
        assert!(!re.is_match("setup.log.bak"));

        let re = component_regex("a?c").expect("regex");
        assert!(re.is_match("abc"));
        assert!(!re.is_match("abbc"));
    }

    #[test]
    fn component_regex_escapes_metacharacters() {
        let re = component_regex("file(1)+.txt").expect("regex");
        assert!(re.is_match("file(1)+.txt"));
        assert!(!re.is_match("file1.txt"));
    }

    #[test]
    fn expand_walks_wildcards_in_middle_components() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("Users/alice/Temp/a.tmp"));
        touch(&root.join("Users/bob/Temp/b.tmp"));
        touch(&root.join("Users/carol/Other/c.tmp"));

        let matches = expand(&pattern(root, "Users/*/Temp/*")).expect("expand");
        assert_eq!(
            matches,
            vec![
                root.join("Users/alice/Temp/a.tmp"),
                root.join("Users/bob/Temp/b.tmp"),
            ]
        );
    }

    #[test]
    fn expand_literal_missing_path_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let matches = expand(&pattern(temp.path(), "missing/dir")).expect("expand");
        assert!(matches.is_empty());
    }

    #[test]
    fn purge_removes_files_and_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("Temp/one.tmp"));
        touch(&root.join("Temp/nested/two.tmp"));
        touch(&root.join("keep.txt"));

        let summary = purge(&pattern(root, "Temp/*")).expect("purge");
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.failed, 0);
        assert!(root.join("Temp").is_dir());
        assert_eq!(fs::read_dir(root.join("Temp")).expect("read").count(), 0);
        assert!(root.join("keep.txt").exists());
    }

    #[test]
    fn purge_only_matching_extension() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("a.log"));
        touch(&root.join("b.txt"));

        let summary = purge(&pattern(root, "*.log")).expect("purge");
        assert_eq!(summary.removed, 1);
        assert!(!root.join("a.log").exists());
        assert!(root.join("b.txt").exists());
    }

    #[test]
    fn purge_removes_readonly_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("ro.tmp");
        touch(&file);
        let mut perms = fs::metadata(&file).expect("meta").permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).expect("chmod");

        let summary = purge(&pattern(temp.path(), "*.tmp")).expect("purge");
        assert_eq!(summary.removed, 1);
        assert!(!file.exists());
    }

    #[test]
    fn undeletable_entry_does_not_spare_its_siblings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("Temp/sub/a/locked"));
        for i in 0..4 {
            touch(&root.join(format!("Temp/sub/z{i}.tmp")));
        }

        let failed = remove_tree(&root.join("Temp/sub"), |path, is_dir| {
            if path.ends_with("locked") {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                remove_entry(path, is_dir)
            }
        });

        // The locked file and both directories above it stay behind.
        assert_eq!(failed, 3);
        assert!(root.join("Temp/sub/a/locked").exists());
        for i in 0..4 {
            assert!(!root.join(format!("Temp/sub/z{i}.tmp")).exists());
        }
    }

    #[test]
    fn purge_descends_into_nested_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("Temp/deep/er/still/file.tmp"));
        touch(&root.join("Temp/deep/top.tmp"));

        let summary = purge(&pattern(root, "Temp/*")).expect("purge");
        assert_eq!(summary, PurgeSummary { matched: 1, removed: 1, failed: 0 });
        assert!(!root.join("Temp/deep").exists());
    }
}
