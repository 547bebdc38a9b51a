use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use susfs_patcher::config::loader::load_config_from_file;
use susfs_patcher::kernel::validator::verify;
use susfs_patcher::{LogCollector, PatchRunner, PatcherConfig};

#[derive(Parser, Debug)]
#[command(name = "susfs_patcher")]
#[command(about = "Apply and verify SUSFS integration edits on a kernel source tree")]
#[command(version)]
struct Cli {
    /// Root of the kernel source tree
    tree_root: PathBuf,

    /// Optional JSON or TOML config file
    config: Option<PathBuf>,

    /// Skip patching and only verify the tree
    #[arg(long)]
    verify_only: bool,

    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,

    /// Keep `<file>.bak` copies of modified files
    #[arg(long)]
    backup: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let collector = LogCollector::new(level);
    if let Err(e) = collector.install() {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    }

    let config = match &cli.config {
        Some(path) => match load_config_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::from(2);
            }
        },
        None => PatcherConfig::default(),
    }
    .with_overrides(cli.backup, cli.dry_run);

    if let Some(log_dir) = &config.log_dir {
        match collector.start_new_session(log_dir) {
            Ok(path) => log::info!("[Main] Session log: {}", path.display()),
            Err(e) => log::warn!("[Main] Session log unavailable: {}", e),
        }
    }

    match run(&cli, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Patches (unless verify-only) and verifies; `Ok(false)` on any failure
/// that affects the exit status.
fn run(cli: &Cli, config: &PatcherConfig) -> Result<bool> {
    let mut success = true;

    if !cli.verify_only {
        let plan = config.build_plan().context("Failed to build patch plan")?;
        let mut runner = PatchRunner::new(&cli.tree_root)
            .with_backup(config.backup)
            .with_dry_run(config.dry_run);
        let report = runner
            .apply_plan(&plan)
            .with_context(|| format!("Patch run on {} aborted", cli.tree_root.display()))?;

        println!("{}", report);
        success &= report.success();
    }

    let checks = config.build_checks().context("Failed to build checklist")?;
    let verification = verify(&cli.tree_root, &checks);
    println!("{}", verification);

    if let Err(e) = verification.into_result() {
        log::error!("[Main] {}", e);
        success = false;
    }
    Ok(success)
}
