//! CLI tests for `sanitizer backup`.
//!
//! Spawns the sanitizer binary against a generated config and checks both the
//! exit code and the status file every invocation leaves behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use sanitizer::exit_codes;
use sanitizer::io::config::{BackupConfig, Config, render_config};

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

/// Write a config whose backup section points into `root`.
fn write_config(root: &Path, backup: BackupConfig) -> PathBuf {
    let cfg = Config {
        backup,
        ..Config::default()
    };
    let path = root.join("config.toml");
    fs::write(&path, render_config(&cfg).expect("render")).expect("write config");
    path
}

fn backup_config(root: &Path) -> BackupConfig {
    BackupConfig {
        restore_marker: root.join(".restored"),
        status_path: root.join("backup.status"),
        ..BackupConfig::default()
    }
}

fn run_backup(config: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_sanitizer"))
        .arg("--config")
        .arg(config)
        .arg("backup")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn sanitizer backup");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("sanitizer backup")
}

fn status_file(root: &Path) -> String {
    fs::read_to_string(root.join("backup.status")).expect("status file")
}

#[test]
fn missing_restore_marker_is_a_precondition_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = write_config(temp.path(), backup_config(temp.path()));

    let output = run_backup(&config, &["-y"], "");

    assert_eq!(output.status.code(), Some(exit_codes::PRECONDITION));
    assert_eq!(status_file(temp.path()), format!("{}\n", exit_codes::PRECONDITION));
}

#[test]
fn unparseable_config_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("config.toml");
    fs::write(&config, "backup = [not toml").expect("write config");

    let output = run_backup(&config, &["-y"], "");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
mod unix {
    use super::*;

    /// Marker, two local directories, and a loader that prints the registry JSON.
    fn prepared(root: &Path, sync_command: &[&str]) -> PathBuf {
        fs::write(root.join(".restored"), b"").expect("marker");
        let images = root.join("images");
        let manifests = root.join("manifests");
        fs::create_dir_all(&images).expect("mkdir images");
        fs::create_dir_all(&manifests).expect("mkdir manifests");

        let json = serde_json::json!({
            "remote": "gs://bucket/registry",
            "directories": [images, manifests],
        });
        let script = format!("printf '%s' '{json}'");
        write_config(
            root,
            BackupConfig {
                config_command: strings(&["sh", "-c", &script]),
                sync_command: strings(sync_command),
                ..backup_config(root)
            },
        )
    }

    #[test]
    fn successful_sync_exits_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = prepared(temp.path(), &["true"]);

        let output = run_backup(&config, &["-y"], "");

        assert_eq!(
            output.status.code(),
            Some(exit_codes::OK),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert_eq!(status_file(temp.path()), "0\n");
    }

    #[test]
    fn failed_sync_exits_with_the_sync_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `<local> <remote>` land in `$0` and `$1`.
        let config = prepared(temp.path(), &["sh", "-c", "exit 7"]);

        let output = run_backup(&config, &["-y"], "");

        assert_eq!(output.status.code(), Some(7));
        assert_eq!(status_file(temp.path()), "7\n");
    }

    #[test]
    fn declined_prompt_aborts_without_syncing() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A sync that would fail proves it never ran.
        let config = prepared(temp.path(), &["false"]);

        let output = run_backup(&config, &[], "n\n");

        assert_eq!(output.status.code(), Some(exit_codes::ABORTED));
        assert_eq!(status_file(temp.path()), format!("{}\n", exit_codes::ABORTED));
        assert!(String::from_utf8_lossy(&output.stdout).contains("Proceed?"));
    }

    #[test]
    fn loader_output_failing_schema_is_invalid() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(".restored"), b"").expect("marker");
        let config = write_config(
            temp.path(),
            BackupConfig {
                config_command: strings(&["sh", "-c", r#"printf '%s' '{"remote": ""}'"#]),
                sync_command: strings(&["true"]),
                ..backup_config(temp.path())
            },
        );

        let output = run_backup(&config, &["-y"], "");

        assert_eq!(output.status.code(), Some(exit_codes::INVALID));
        assert_eq!(status_file(temp.path()), format!("{}\n", exit_codes::INVALID));
    }
}
