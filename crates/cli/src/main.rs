use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sysdump_core::{
    build_catalog, collect_doctor_info, default_output_name, enumerate_devices, human_bytes,
    resynthesize, run_inventory, task_id, CaptureOptions, LocalRunner, Orchestrator,
    SystemProber,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sysdump",
    version,
    about = "Capture a one-shot hardware and software inventory of this host."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every capture task and write the artifact tree plus summary report.
    Capture(CaptureArgs),
    /// Re-synthesize the summary report from an existing artifact tree.
    Report(ReportArgs),
    /// Show environment, privilege, tool availability and classified devices.
    Doctor,
    /// Print the capture tasks planned for this host.
    Catalog(CatalogArgs),
}

#[derive(Debug, Args)]
struct CaptureArgs {
    /// Artifact root. Defaults to `sysdump-<hostname>-<timestamp>` in the current directory.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// File name of the summary report inside the artifact root.
    #[arg(long, default_value = "summary.txt", value_name = "FILE")]
    report_name: String,

    /// Skip block device enumeration and per-device tasks.
    #[arg(long)]
    no_devices: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Artifact root written by an earlier `capture`.
    #[arg(long, value_name = "DIR")]
    input: PathBuf,

    /// Write the report here instead of stdout.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CatalogArgs {
    /// Emit the catalog as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Capture(args) => run_capture_command(args),
        Commands::Report(args) => run_report_command(args),
        Commands::Doctor => {
            run_doctor_command();
            Ok(())
        }
        Commands::Catalog(args) => run_catalog_command(args),
    }
}

fn run_capture_command(args: CaptureArgs) -> Result<()> {
    let CaptureArgs {
        output,
        report_name,
        no_devices,
    } = args;

    let options = CaptureOptions {
        output_dir: output.unwrap_or_else(|| PathBuf::from(default_output_name(Utc::now()))),
        report_name,
        enumerate_devices: !no_devices,
        ..CaptureOptions::default()
    };

    let run = run_inventory(&options, &SystemProber, &LocalRunner)?;

    println!("Artifacts written to {}", run.root.display());
    println!(
        "Ran {} task(s): {} succeeded, {} warning(s), {} device(s) classified.",
        run.manifest.results.len(),
        run.succeeded_count(),
        run.manifest.warnings.len(),
        run.manifest.devices.len()
    );
    match &run.report_path {
        Some(path) => println!("Summary report: {}", path.display()),
        None => println!("Summary report could not be written; see log output."),
    }
    if run.manifest_path.is_none() {
        println!("Manifest could not be written; `sysdump report` will not work on this tree.");
    }

    Ok(())
}

fn run_report_command(args: ReportArgs) -> Result<()> {
    let report = resynthesize(&args.input)?;
    let rendered = report.render();

    match args.output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

fn run_doctor_command() {
    let info = collect_doctor_info(&SystemProber, &LocalRunner, Path::new("/sys"));
    println!("OS: {} ({})", info.os, info.arch);
    if let Some(host_name) = info.host_name {
        println!("Host: {}", host_name);
    }
    if let Some(os_version) = info.os_version {
        println!("OS version: {}", os_version);
    }
    if let Some(kernel_version) = info.kernel_version {
        println!("Kernel: {}", kernel_version);
    }
    println!("Elevated: {}", info.elevated);
    println!("Platform extras: {}", info.platform_marker);

    let available = info.tools.iter().filter(|tool| tool.available).count();
    println!("Tools: {}/{} available", available, info.tools.len());
    for tool in info.tools.iter().filter(|tool| !tool.available) {
        println!("- missing: {}", tool.name);
    }

    println!("Classified devices: {}", info.devices.len());
    for device in info.devices {
        println!(
            "- {} [{}] size={} model={}",
            device.path,
            device.transport,
            human_bytes(device.size_bytes),
            device.model.as_deref().unwrap_or("unknown")
        );
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
}

fn run_catalog_command(args: CatalogArgs) -> Result<()> {
    let prober = SystemProber;
    let runner = LocalRunner;
    let devices = enumerate_devices(&prober, &runner, Path::new("/sys"));
    let catalog = build_catalog(&prober, &devices, Path::new("/"));

    if args.json {
        let payload =
            serde_json::to_string_pretty(&catalog).context("failed to serialize catalog")?;
        println!("{payload}");
        return Ok(());
    }

    let orchestrator = Orchestrator::new(&prober, &runner);
    println!("{} task(s) planned:", catalog.len());
    for task in &catalog {
        println!("{}", task_id(task));
        for (index, alternative) in task.alternatives.iter().enumerate() {
            let requires = if alternative.requires.is_empty() {
                "nothing".to_string()
            } else {
                alternative
                    .requires
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let readiness = match orchestrator.first_unmet(task, alternative) {
                Some(unmet) => format!("unmet: {}", unmet.describe_unmet()),
                None => "ready".to_string(),
            };
            println!(
                "  {}. {}: {} (requires {}) [{}]",
                index + 1,
                alternative.label,
                alternative.action,
                requires,
                readiness
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
