use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sysinfo::System;
use tracing::{error, info};

use crate::artifact::{ArtifactTree, MANIFEST_FILE};
use crate::capture::Orchestrator;
use crate::catalog::{build_catalog, validate, CATALOG_VERSION};
use crate::device::enumerate_devices;
use crate::exec::CommandRunner;
use crate::model::{Manifest, MANIFEST_VERSION};
use crate::probe::Prober;
use crate::report::{synthesize, ReportDocument, RunInfo};

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub output_dir: PathBuf,
    pub report_name: String,
    pub enumerate_devices: bool,
    pub sysfs_root: PathBuf,
    /// Root under which captured files are read; commands always run on the live host.
    pub file_root: PathBuf,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("sysdump"),
            report_name: "summary.txt".to_string(),
            enumerate_devices: true,
            sysfs_root: PathBuf::from("/sys"),
            file_root: PathBuf::from("/"),
        }
    }
}

#[derive(Debug)]
pub struct InventoryRun {
    pub root: PathBuf,
    pub manifest: Manifest,
    pub report: ReportDocument,
    pub manifest_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl InventoryRun {
    pub fn succeeded_count(&self) -> usize {
        self.manifest
            .results
            .iter()
            .filter(|result| result.succeeded())
            .count()
    }
}

/// Directory name used when the caller does not choose one: `sysdump-<host>-<timestamp>`.
pub fn default_output_name(now: DateTime<Utc>) -> String {
    let host = System::host_name()
        .map(|name| {
            name.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "host".to_string());
    format!("sysdump-{host}-{}", now.format("%Y%m%dT%H%M%S"))
}

/// Create the output root, capture the full catalog, then write manifest and report.
///
/// Only failure to create the output root is fatal; every task failure is a warning.
pub fn run_inventory(
    options: &CaptureOptions,
    prober: &dyn Prober,
    runner: &dyn CommandRunner,
) -> Result<InventoryRun> {
    let tree = ArtifactTree::create(&options.output_dir)?;
    let root = tree.root().to_path_buf();
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let devices = if options.enumerate_devices {
        enumerate_devices(prober, runner, &options.sysfs_root)
    } else {
        Vec::new()
    };
    info!(devices = devices.len(), "classified block devices");

    let catalog = build_catalog(prober, &devices, &options.file_root);
    validate(&catalog)?;
    info!(tasks = catalog.len(), root = %root.display(), "starting capture");

    let outcome = Orchestrator::new(prober, runner).run(&catalog, tree);
    info!(
        succeeded = outcome.succeeded_count(),
        warnings = outcome.warnings.len(),
        "capture finished"
    );

    let manifest = Manifest {
        manifest_version: MANIFEST_VERSION.to_string(),
        catalog_version: CATALOG_VERSION.to_string(),
        generated_at: generated_at.clone(),
        devices,
        results: outcome.results,
        warnings: outcome.warnings,
    };
    let manifest_path = match write_manifest(&root, &manifest) {
        Ok(path) => Some(path),
        Err(err) => {
            error!(error = %format!("{err:#}"), "manifest not written");
            None
        }
    };

    let info = RunInfo {
        generated_at,
        task_count: catalog.len(),
    };
    let report = synthesize(&outcome.tree, &manifest.warnings, &info);
    let report_path = root.join(&options.report_name);
    let report_path = match fs::write(&report_path, report.render()) {
        Ok(()) => Some(report_path),
        Err(err) => {
            error!(
                error = %err,
                path = %report_path.display(),
                "report not written"
            );
            None
        }
    };

    Ok(InventoryRun {
        root,
        manifest,
        report,
        manifest_path,
        report_path,
    })
}

pub fn write_manifest(root: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = root.join(MANIFEST_FILE);
    let payload = serde_json::to_string_pretty(manifest).context("failed to serialize manifest")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed to write manifest to {}", path.display()))?;
    Ok(path)
}

pub fn load_manifest(root: &Path) -> Result<Manifest> {
    let path = root.join(MANIFEST_FILE);
    let data = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Rebuild the report of an earlier run from its manifest and artifact tree.
pub fn resynthesize(root: &Path) -> Result<ReportDocument> {
    let manifest = load_manifest(root)?;
    let tree = ArtifactTree::from_results(root, &manifest.results);
    let info = RunInfo {
        generated_at: manifest.generated_at.clone(),
        task_count: manifest.results.len(),
    };
    Ok(synthesize(&tree, &manifest.warnings, &info))
}
