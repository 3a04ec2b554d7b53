//! Image sanitizer CLI.
//!
//! `sanitize` runs once as the last step before an OS image snapshot. Its
//! outcome is published to the metadata sink; the exit code only reflects
//! whether the tool could run at all.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use sanitizer::backup::{BackupOptions, backup_command};
use sanitizer::exit_codes;
use sanitizer::io::config::{DEFAULT_CONFIG_PATH, load_config, render_config};
use sanitizer::io::metadata::ExeSink;
use sanitizer::io::registry::Reg;
use sanitizer::io::windows_host::WindowsHost;
use sanitizer::logging;
use sanitizer::sanitize::run_sanitize;

#[derive(Parser)]
#[command(
    name = "sanitizer",
    version,
    about = "Clear transient OS state before image capture"
)]
struct Cli {
    /// Path to the TOML config (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the image cleanup and publish its state to the metadata sink.
    Sanitize,
    /// Mirror the image registry metadata to remote storage.
    Backup {
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Sanitize => {
            let host = WindowsHost::new(Reg::default(), cfg.sanitize.recycle_command.clone());
            let sink = ExeSink::new(&cfg.sanitize.metadata_sink);
            let report = run_sanitize(&host, &sink, &cfg.sanitize)?;
            info!(state = %report.state, flagged = report.flagged.len(), "sanitize finished");
            Ok(exit_codes::OK)
        }
        Command::Backup { yes } => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stdout();
            Ok(backup_command(
                &cfg.backup,
                &BackupOptions { assume_yes: yes },
                &mut input,
                &mut out,
            ))
        }
        Command::Config => {
            print!("{}", render_config(&cfg)?);
            Ok(exit_codes::OK)
        }
    }
}
