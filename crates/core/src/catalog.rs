use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::model::{
    Action, CaptureTask, DeviceDescriptor, Requirement, TaskGroup, TransportClass,
};
use crate::probe::Prober;

pub const CATALOG_VERSION: &str = "1";

/// Presence of this file marks a board with the platform-extras toolset.
pub const PLATFORM_MARKER: &str = "/proc/device-tree/model";

pub const DISK_BENCH_PREFIX: &str = "disk-bench-";
pub const DISK_HEALTH_PREFIX: &str = "disk-health-";
pub const NVME_SMART_PREFIX: &str = "nvme-smart-";

/// Full catalog for this host. File sources are resolved below `file_root` (normally `/`).
pub fn build_catalog(
    prober: &dyn Prober,
    devices: &[DeviceDescriptor],
    file_root: &Path,
) -> Vec<CaptureTask> {
    let mut catalog = system_catalog();
    catalog.extend(device_catalog(devices));
    if prober.probe(&Requirement::File(host_path(file_root, PLATFORM_MARKER))) {
        catalog.extend(platform_catalog());
    }
    rebase(&mut catalog, file_root);
    catalog
}

pub fn host_path(file_root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    file_root.join(path.strip_prefix("/").unwrap_or(path))
}

fn rebase(catalog: &mut [CaptureTask], file_root: &Path) {
    for alternative in catalog
        .iter_mut()
        .flat_map(|task| task.alternatives.iter_mut())
    {
        for requirement in &mut alternative.requires {
            if let Requirement::File(path) = requirement {
                *path = host_path(file_root, &*path);
            }
        }
        match &mut alternative.action {
            Action::CopyFile { source } | Action::CopyDir { source } => {
                *source = host_path(file_root, &*source);
            }
            Action::Run { .. } => {}
        }
    }
}

pub fn system_catalog() -> Vec<CaptureTask> {
    vec![
        command("hostname", "hostname", &[]).then(
            "etc-hostname",
            vec![Requirement::file("/etc/hostname")],
            Action::copy_file("/etc/hostname"),
        ),
        file("os-release", "/etc/os-release"),
        command("uname", "uname", &["-a"]),
        command("uptime", "uptime", &[]),
        command("lscpu", "lscpu", &[]),
        file("cpuinfo", "/proc/cpuinfo"),
        file("meminfo", "/proc/meminfo"),
        command("free", "free", &["-h"]),
        elevated_command("dmidecode-memory", "dmidecode", &["-t", "memory"]),
        command(
            "lsblk",
            "lsblk",
            &["-o", "NAME,SIZE,TYPE,FSTYPE,MOUNTPOINT,MODEL"],
        ),
        command("df", "df", &["-h"]),
        elevated_command("fdisk", "fdisk", &["-l"]),
        command("nvme-list", "nvme", &["list"]),
        command("lspci", "lspci", &[]),
        command("lsusb", "lsusb", &[]),
        command("glxinfo", "glxinfo", &["-B"]),
        command("ip-addr", "ip", &["-brief", "address"]).then(
            "ifconfig",
            vec![Requirement::tool("ifconfig")],
            Action::run("ifconfig", &["-a"]),
        ),
        command("ip-route", "ip", &["route"]),
        command("sensors", "sensors", &[]),
        command("lsmod", "lsmod", &[]),
        file("cmdline", "/proc/cmdline"),
        elevated_command("kernel-log", "dmesg", &[]).then(
            "journal",
            vec![Requirement::tool("journalctl")],
            Action::run("journalctl", &["-k", "-b", "--no-pager"]),
        ),
        directory("modprobe-d", "/etc/modprobe.d"),
        directory("udev-rules", "/etc/udev/rules.d"),
    ]
}

pub fn device_catalog(devices: &[DeviceDescriptor]) -> Vec<CaptureTask> {
    let mut tasks = Vec::new();
    for device in devices {
        let path = device.path.as_str();
        let transport = Requirement::Transport(device.transport.clone());
        let bench = CaptureTask::new(
            format!("{DISK_BENCH_PREFIX}{}", device.output_stem()),
            TaskGroup::System,
        )
        .for_device(device);
        let bench = match device.transport {
            TransportClass::AtaScsi => bench
                .then(
                    "identity-timing",
                    vec![
                        Requirement::tool("hdparm"),
                        Requirement::Elevated,
                        transport.clone(),
                    ],
                    Action::run("hdparm", &["-I", "-t", path]),
                )
                .then(
                    "identity",
                    vec![Requirement::tool("hdparm"), transport.clone()],
                    Action::run("hdparm", &["-I", path]),
                ),
            // Identity probing does not apply to NVMe namespaces.
            TransportClass::Nvme => bench.then(
                "timing",
                vec![
                    Requirement::tool("hdparm"),
                    Requirement::Elevated,
                    transport.clone(),
                ],
                Action::run("hdparm", &["-t", path]),
            ),
        };
        tasks.push(bench);

        tasks.push(
            CaptureTask::new(
                format!("{DISK_HEALTH_PREFIX}{}", device.output_stem()),
                TaskGroup::System,
            )
            .for_device(device)
            .then(
                "smartctl",
                vec![Requirement::tool("smartctl"), Requirement::Elevated],
                Action::run("smartctl", &["-i", "-H", "-A", path]),
            ),
        );

        if device.transport == TransportClass::Nvme {
            tasks.push(
                CaptureTask::new(
                    format!("{NVME_SMART_PREFIX}{}", device.output_stem()),
                    TaskGroup::System,
                )
                .for_device(device)
                .then(
                    "smart-log",
                    vec![
                        Requirement::tool("nvme"),
                        Requirement::Elevated,
                        transport.clone(),
                    ],
                    Action::run("nvme", &["smart-log", path]),
                ),
            );
        }
    }
    tasks
}

pub fn platform_catalog() -> Vec<CaptureTask> {
    vec![
        CaptureTask::new("model", TaskGroup::Platform).then(
            "copy",
            vec![Requirement::file(PLATFORM_MARKER)],
            Action::copy_file(PLATFORM_MARKER),
        ),
        vcgencmd("temperature", &["measure_temp"]),
        vcgencmd("throttled", &["get_throttled"]),
        vcgencmd("arm-clock", &["measure_clock", "arm"]),
        vcgencmd("arm-memory", &["get_mem", "arm"]),
        vcgencmd("gpu-memory", &["get_mem", "gpu"]),
        CaptureTask::new("boot-config", TaskGroup::Platform)
            .then(
                "firmware",
                vec![Requirement::file("/boot/firmware/config.txt")],
                Action::copy_file("/boot/firmware/config.txt"),
            )
            .then(
                "legacy",
                vec![Requirement::file("/boot/config.txt")],
                Action::copy_file("/boot/config.txt"),
            ),
    ]
}

/// Reject catalogs the orchestrator cannot execute faithfully.
pub fn validate(catalog: &[CaptureTask]) -> Result<()> {
    let mut seen = HashSet::new();
    for task in catalog {
        if task.alternatives.is_empty() {
            bail!("task `{}` has no alternatives", task.name);
        }
        if !seen.insert((task.group, task.name.as_str())) {
            bail!("duplicate output name `{}` in {:?} group", task.name, task.group);
        }
    }
    Ok(())
}

/// Every distinct tool referenced by the catalog, in first-use order.
pub fn referenced_tools(catalog: &[CaptureTask]) -> Vec<String> {
    let mut tools = Vec::new();
    for requirement in catalog
        .iter()
        .flat_map(|task| task.alternatives.iter())
        .flat_map(|alternative| alternative.requires.iter())
    {
        if let Requirement::Tool(name) = requirement {
            if !tools.contains(name) {
                tools.push(name.clone());
            }
        }
    }
    tools
}

fn command(name: &str, program: &str, args: &[&str]) -> CaptureTask {
    CaptureTask::new(name, TaskGroup::System).then(
        program,
        vec![Requirement::tool(program)],
        Action::run(program, args),
    )
}

fn elevated_command(name: &str, program: &str, args: &[&str]) -> CaptureTask {
    CaptureTask::new(name, TaskGroup::System).then(
        program,
        vec![Requirement::tool(program), Requirement::Elevated],
        Action::run(program, args),
    )
}

fn file(name: &str, source: &str) -> CaptureTask {
    CaptureTask::new(name, TaskGroup::System).then(
        "copy",
        vec![Requirement::file(source)],
        Action::copy_file(source),
    )
}

fn directory(name: &str, source: &str) -> CaptureTask {
    CaptureTask::new(name, TaskGroup::System).then(
        "copy",
        vec![Requirement::file(source)],
        Action::copy_dir(source),
    )
}

fn vcgencmd(name: &str, args: &[&str]) -> CaptureTask {
    CaptureTask::new(name, TaskGroup::Platform).then(
        "vcgencmd",
        vec![Requirement::tool("vcgencmd")],
        Action::run("vcgencmd", args),
    )
}
