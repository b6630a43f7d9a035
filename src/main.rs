use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super_compactor::config::loader::{find_manifests, META_DIR_NAME};
use super_compactor::config::{validator, ConfigSession};
use super_compactor::log_collector::default_log_dir;
use super_compactor::orchestrator::validation_result_code;
use super_compactor::planner::{
    create_build_plan, estimate_build_time, format_file_size, recommend_all,
};
use super_compactor::{
    BuildEvent, BuildOrchestrator, BuildState, BundledToolLocator, ConfigError, LogCollector,
    ResultCode, ToolLocator, VerificationStatus, Verifier,
};

#[derive(Parser)]
#[command(name = "super_compactor", version)]
#[command(about = "Rebuild Android super.img from an exported ROM folder")]
#[command(
    after_help = "ROM LAYOUT:\n  <ROM_DIR>/META/<manifest>.json   partition manifest\n  <ROM_DIR>/...                     partition images referenced by the manifest"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log directory (default: <cache>/super_compactor/logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Echo log records to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, build and verify super.img
    Build {
        /// Exported ROM folder containing META/
        rom_dir: PathBuf,
        /// Manifest file name inside META/ (required when there are several)
        #[arg(short, long)]
        config: Option<String>,
        /// Output directory for super.img (default: ROM folder)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the manifest against the partition images
    Validate {
        rom_dir: PathBuf,
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show the lpmake command, estimates and size recommendations without building
    Plan {
        rom_dir: PathBuf,
        #[arg(short, long)]
        config: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run lpdump against an existing image
    Verify {
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let collector = init_logging(&cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("ERROR: {:#}", e);
            e.downcast_ref::<ConfigError>()
                .map(ResultCode::from)
                .unwrap_or(ResultCode::InvalidPath)
        }
    };

    if let Some(collector) = collector {
        if let Err(e) = collector.wait_for_empty().await {
            eprintln!("WARNING: Failed to flush logs: {}", e);
        }
    }

    ExitCode::from(code.code())
}

fn init_logging(cli: &Cli) -> Option<LogCollector> {
    let log_dir = cli.log_dir.clone().unwrap_or_else(default_log_dir);
    let echo = match cli.verbose {
        0 => LevelFilter::Off,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    match LogCollector::with_console(log_dir, LevelFilter::Debug, echo) {
        Ok(collector) => {
            if let Err(e) = collector.install() {
                eprintln!("WARNING: Failed to register logger: {}", e);
            }
            log::info!(target: "parsed", "super_compactor {} started", super_compactor::VERSION);
            Some(collector)
        }
        Err(e) => {
            eprintln!("WARNING: Logging disabled: {}", e);
            None
        }
    }
}

async fn run(cli: Cli) -> Result<ResultCode> {
    match cli.command {
        Commands::Build {
            rom_dir,
            config,
            output,
        } => build(&rom_dir, config.as_deref(), output).await,
        Commands::Validate { rom_dir, config } => validate(&rom_dir, config.as_deref()),
        Commands::Plan {
            rom_dir,
            config,
            output,
        } => plan(&rom_dir, config.as_deref(), output),
        Commands::Verify { image } => verify(&image).await,
    }
}

/// Pick the manifest under `<rom_dir>/META`.
fn resolve_manifest(rom_dir: &Path, name: Option<&str>) -> Result<PathBuf> {
    if !rom_dir.is_dir() {
        return Err(ConfigError::InvalidPath(format!(
            "ROM folder not found: {}",
            rom_dir.display()
        ))
        .into());
    }

    let meta = rom_dir.join(META_DIR_NAME);
    let manifests = find_manifests(&meta)?;
    let listing = || {
        manifests
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| format!("  - {}", n.to_string_lossy()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    match name {
        Some(name) => manifests
            .iter()
            .find(|p| {
                p.file_name().map_or(false, |f| {
                    f == name || f.to_string_lossy() == format!("{}.json", name)
                })
            })
            .cloned()
            .ok_or_else(|| ConfigError::ManifestNotFound(meta.join(name)))
            .with_context(|| format!("Available manifests:\n{}", listing())),
        None => match manifests.as_slice() {
            [] => Err(ConfigError::ManifestNotFound(meta).into()),
            [only] => Ok(only.clone()),
            _ => bail!(
                "Several manifests found, choose one with --config:\n{}",
                listing()
            ),
        },
    }
}

fn output_dir_for(rom_dir: &Path, output: Option<PathBuf>) -> Result<PathBuf> {
    match output {
        None => Ok(rom_dir.to_path_buf()),
        Some(dir) if dir.is_dir() => Ok(dir),
        Some(dir) => Err(ConfigError::InvalidPath(format!(
            "Output folder not found: {}",
            dir.display()
        ))
        .into()),
    }
}

fn load_session(manifest: &Path) -> Result<ConfigSession> {
    let mut session = ConfigSession::new();
    session.load(manifest)?;
    Ok(session)
}

async fn build(rom_dir: &Path, name: Option<&str>, output: Option<PathBuf>) -> Result<ResultCode> {
    let manifest = resolve_manifest(rom_dir, name)?;
    let output_dir = output_dir_for(rom_dir, output)?;
    println!("Using configuration: {}", manifest.display());

    let locator: Arc<dyn ToolLocator> = Arc::new(BundledToolLocator::new());
    let orchestrator = Arc::new(BuildOrchestrator::new(Arc::clone(&locator)));
    let config = orchestrator.load_config(&manifest).await?;
    orchestrator.set_output_dir(&output_dir).await;

    let estimate = estimate_build_time(&config);
    println!(
        "Device: {} ({}), {} partitions",
        config.layout,
        format_file_size(config.block_device.size),
        config.partitions.len()
    );
    println!(
        "Estimated time: {} for {}",
        estimate.estimated_time_str,
        format_file_size(estimate.total_bytes_to_process)
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            let _ = cancel_tx.send(true);
        }
    });

    let printer = tokio::spawn(print_events(orchestrator.subscribe()));
    let outcome = orchestrator
        .start(cancel_rx)
        .await
        .map_err(|e| anyhow!("Build not started: {}", e))?;
    let _ = printer.await;

    match outcome.state {
        BuildState::Succeeded => {
            println!("\nOK {}", outcome.message);
            println!("  Build time: {:.1}s", outcome.duration.as_secs_f64());
            print_vbmeta_notice();
        }
        _ => {
            eprintln!("\nERROR [{}]: {}", outcome.code, outcome.message);
            for error in &outcome.errors {
                eprintln!("  - {}", error);
            }
        }
    }

    Ok(outcome.code)
}

async fn print_events(mut events: broadcast::Receiver<BuildEvent>) {
    let mut last_decile = 0;
    loop {
        match events.recv().await {
            Ok(BuildEvent::Log(line)) => println!("{}", line),
            Ok(BuildEvent::Warning(w)) => println!("WARNING: {}", w),
            Ok(BuildEvent::StateChanged { to, .. }) if !to.is_outcome() && to != BuildState::Idle => {
                println!("== {}", to)
            }
            Ok(BuildEvent::Progress(p)) => {
                if p / 10 > last_decile {
                    last_decile = p / 10;
                    println!("Progress: {}%", p);
                }
            }
            Ok(BuildEvent::Finished(_)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_vbmeta_notice() {
    println!("\nNOTE: the rebuilt image carries new LP metadata, so the stock vbmeta");
    println!("will not verify it. Flash with verification disabled:");
    println!("  fastboot --disable-verity --disable-verification flash vbmeta vbmeta.img");
    println!("  fastboot flash super super.img");
}

fn validate(rom_dir: &Path, name: Option<&str>) -> Result<ResultCode> {
    let manifest = resolve_manifest(rom_dir, name)?;
    let session = load_session(&manifest)?;
    let config = session
        .config()
        .ok_or_else(|| anyhow!("Manifest did not load"))?;

    let report = validator::validate(config);
    for warning in report.warning_messages() {
        println!("WARNING: {}", warning);
    }
    for error in report.error_messages() {
        println!("ERROR: {}", error);
    }
    println!(
        "{}: {} error(s), {} warning(s)",
        if report.success() { "OK" } else { "FAILED" },
        report.errors.len(),
        report.warnings.len()
    );

    Ok(validation_result_code(&report))
}

fn plan(rom_dir: &Path, name: Option<&str>, output: Option<PathBuf>) -> Result<ResultCode> {
    let manifest = resolve_manifest(rom_dir, name)?;
    let output_dir = output_dir_for(rom_dir, output)?;
    let session = load_session(&manifest)?;
    let config = session
        .config()
        .ok_or_else(|| anyhow!("Manifest did not load"))?;

    let locator: Arc<dyn ToolLocator> = Arc::new(BundledToolLocator::new());
    let plan = create_build_plan(config, &output_dir.join("super.img"), locator);
    let estimate = estimate_build_time(config);

    println!("Build plan");
    println!("  Output: {}", plan.output_path.display());
    println!("  Required files: {}", plan.required_files.len());
    println!("  Estimated output size: {}", format_file_size(plan.estimated_output_size));
    println!("  Estimated time: {}", estimate.estimated_time_str);
    println!("\nCommand:\n  {}", plan.command);

    println!("\nSize recommendations (alignment {}):", config.block_device.alignment);
    for (name, rec) in recommend_all(config) {
        let marker = if rec.needs_resize { "*" } else { " " };
        println!(
            " {} {:<24} declared {:>12}  actual {:>12}  recommended {:>12}",
            marker, name, rec.current_size, rec.actual_file_size, rec.recommended_size
        );
    }

    Ok(ResultCode::Success)
}

async fn verify(image: &Path) -> Result<ResultCode> {
    let verifier = Verifier::new(Arc::new(BundledToolLocator::new()));
    match verifier.verify(image).await {
        Ok(status) => {
            println!("{}", status.summary());
            match status {
                VerificationStatus::Passed { partitions, .. } => {
                    for name in partitions {
                        println!("  - {}", name);
                    }
                    Ok(ResultCode::Success)
                }
                _ => Ok(ResultCode::VerificationFailed),
            }
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            Ok(ResultCode::from(&e))
        }
    }
}
