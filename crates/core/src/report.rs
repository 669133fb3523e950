use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactTree;
use crate::catalog::{DISK_BENCH_PREFIX, DISK_HEALTH_PREFIX, NVME_SMART_PREFIX};
use crate::extract;
use crate::model::{TaskGroup, Warning};

const EMPTY_SECTION: &str = "No data captured.";

/// Run metadata; the only timestamp-bearing input to the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    pub generated_at: String,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSection {
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportDocument {
    pub sections: Vec<ReportSection>,
}

impl ReportDocument {
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|section| section.title == title)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# sysdump summary\n\n");
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n", section.title));
            if section.lines.is_empty() {
                out.push_str(EMPTY_SECTION);
                out.push('\n');
            } else {
                for line in &section.lines {
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out
    }
}

pub fn synthesize(tree: &ArtifactTree, warnings: &[Warning], info: &RunInfo) -> ReportDocument {
    let mut sections = vec![
        section("Overview", overview(tree, info)),
        section("CPU", cpu(tree)),
        section("Memory", memory(tree)),
        section("Storage Layout", storage_layout(tree)),
        section("Disk Benchmarks", disk_benchmarks(tree)),
        section("Disk Health", disk_health(tree)),
        section("NVMe", nvme(tree)),
        section("Graphics", graphics(tree)),
        section("Network", network(tree)),
        section("Sensors", sensors(tree)),
        section("PCI Devices", pci(tree)),
        section("USB Devices", usb(tree)),
        section("Kernel", kernel(tree)),
        section("Platform Extras", platform_extras(tree)),
    ];
    if !warnings.is_empty() {
        sections.push(section(
            "Warnings",
            warnings.iter().map(|warning| format!("- {warning}")).collect(),
        ));
    }
    sections.push(section(
        "Footer",
        vec![format!(
            "Generated by sysdump {} at {}: {} task(s), {} warning(s).",
            env!("CARGO_PKG_VERSION"),
            info.generated_at,
            info.task_count,
            warnings.len()
        )],
    ));
    ReportDocument { sections }
}

fn section(title: &str, lines: Vec<String>) -> ReportSection {
    ReportSection {
        title: title.to_string(),
        lines,
    }
}

fn captured(tree: &ArtifactTree, name: &str) -> Option<String> {
    tree.read(TaskGroup::System, name).text().map(str::to_string)
}

fn device_heading(stem: &str) -> String {
    format!("### /dev/{}", stem.replace('!', "/"))
}

fn push_field(lines: &mut Vec<String>, label: &str, value: Option<impl AsRef<str>>) {
    if let Some(value) = value {
        lines.push(format!("- {label}: {}", value.as_ref()));
    }
}

fn overview(tree: &ArtifactTree, info: &RunInfo) -> Vec<String> {
    let mut lines = Vec::new();
    push_field(
        &mut lines,
        "Host",
        captured(tree, "hostname").and_then(|text| extract::first_line(&text)),
    );
    push_field(
        &mut lines,
        "Operating system",
        captured(tree, "os-release").and_then(|text| extract::os_release(&text).pretty_name),
    );
    push_field(
        &mut lines,
        "Uptime",
        captured(tree, "uptime").and_then(|text| extract::first_line(&text)),
    );
    lines.push(format!("- Captured at: {}", info.generated_at));
    lines
}

fn cpu(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "lscpu") {
        let facts = extract::lscpu(&text);
        push_field(&mut lines, "Model", facts.model_name);
        push_field(&mut lines, "Architecture", facts.architecture);
        push_field(&mut lines, "Logical CPUs", facts.cpus);
        push_field(&mut lines, "Sockets", facts.sockets);
        push_field(&mut lines, "Cores per socket", facts.cores_per_socket);
        push_field(&mut lines, "Threads per core", facts.threads_per_core);
        push_field(&mut lines, "Max MHz", facts.max_mhz);
    }
    if lines.is_empty() {
        if let Some(text) = captured(tree, "cpuinfo") {
            let info = extract::cpuinfo(&text);
            push_field(&mut lines, "Model", info.model_name);
            push_field(&mut lines, "Hardware", info.hardware);
            push_field(&mut lines, "Board", info.model);
            if info.processors > 0 {
                lines.push(format!("- Logical CPUs: {}", info.processors));
            }
        }
    }
    lines
}

fn memory(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "meminfo") {
        let info = extract::meminfo(&text);
        push_field(&mut lines, "Total", info.total_kb.map(kib));
        push_field(&mut lines, "Available", info.available_kb.map(kib));
        push_field(&mut lines, "Swap", info.swap_total_kb.map(kib));
    }
    if let Some(text) = captured(tree, "dmidecode-memory") {
        let modules = extract::dmidecode_memory(&text);
        if !modules.is_empty() {
            lines.push(format!("- Installed modules: {}", modules.len()));
        }
        for module in modules {
            let mut line = format!(
                "  - {}: {}",
                module.locator.as_deref().unwrap_or("unknown slot"),
                module.size
            );
            if let Some(kind) = module.kind {
                line.push_str(&format!(" {kind}"));
            }
            if let Some(speed) = module.speed {
                line.push_str(&format!(" @ {speed}"));
            }
            lines.push(line);
        }
    }
    lines
}

fn storage_layout(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "lsblk") {
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("    {line}"))
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            lines.push("- Block devices:".to_string());
            lines.extend(rows);
        }
    }
    if let Some(text) = captured(tree, "fdisk") {
        for disk in extract::fdisk_disks(&text) {
            lines.push(format!("- Disk {disk}"));
        }
    }
    if let Some(text) = captured(tree, "df") {
        for fs in extract::df(&text) {
            lines.push(format!(
                "- {} on {}: {} total, {} used ({}), {} free",
                fs.source, fs.mount, fs.size, fs.used, fs.use_percent, fs.available
            ));
        }
    }
    lines
}

fn disk_benchmarks(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    for (device, text) in tree.device_artifacts(DISK_BENCH_PREFIX) {
        let facts = extract::hdparm(&text);
        lines.push(device_heading(&device));
        if facts.is_empty() {
            lines.push("- No recognizable benchmark fields.".to_string());
        }
        push_field(&mut lines, "Model", facts.model);
        push_field(&mut lines, "Serial", facts.serial);
        push_field(&mut lines, "Firmware", facts.firmware);
        push_field(&mut lines, "Cached reads", facts.cached_reads);
        push_field(&mut lines, "Buffered disk reads", facts.buffered_reads);
    }
    lines
}

fn disk_health(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    for (device, text) in tree.device_artifacts(DISK_HEALTH_PREFIX) {
        let facts = extract::smartctl(&text);
        lines.push(device_heading(&device));
        if facts.is_empty() {
            lines.push("- No recognizable health fields.".to_string());
        }
        push_field(&mut lines, "Model", facts.model);
        push_field(&mut lines, "Serial", facts.serial);
        push_field(&mut lines, "Capacity", facts.capacity);
        push_field(&mut lines, "Health", facts.verdict);
        push_field(
            &mut lines,
            "Temperature",
            facts.temperature_c.map(|value| format!("{value} °C")),
        );
        push_field(&mut lines, "Power-on hours", facts.power_on_hours);
    }
    lines
}

fn nvme(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "nvme-list") {
        for row in extract::nvme_list(&text) {
            lines.push(format!("- {row}"));
        }
    }
    for (device, text) in tree.device_artifacts(NVME_SMART_PREFIX) {
        let health = extract::nvme_smart_log(&text);
        lines.push(device_heading(&device));
        if health.is_empty() {
            lines.push("- No recognizable SMART log fields.".to_string());
        }
        push_field(&mut lines, "Critical warning", health.critical_warning);
        push_field(&mut lines, "Temperature", health.temperature);
        push_field(&mut lines, "Percentage used", health.percentage_used);
        push_field(&mut lines, "Data units written", health.data_units_written);
    }
    lines
}

fn graphics(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "lspci") {
        for controller in extract::lspci(&text).display {
            lines.push(format!("- Controller: {controller}"));
        }
    }
    if let Some(text) = captured(tree, "glxinfo") {
        let facts = extract::glxinfo(&text);
        push_field(&mut lines, "OpenGL renderer", facts.renderer);
        push_field(&mut lines, "OpenGL version", facts.version);
    }
    lines
}

fn network(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "ip-addr") {
        for interface in extract::interfaces(&text) {
            let state = interface.state.as_deref().unwrap_or("?");
            if interface.addresses.is_empty() {
                lines.push(format!("- {} ({state})", interface.name));
            } else {
                lines.push(format!(
                    "- {} ({state}): {}",
                    interface.name,
                    interface.addresses.join(", ")
                ));
            }
        }
    }
    if let Some(text) = captured(tree, "ip-route") {
        if let Some(route) = text.lines().find(|line| line.starts_with("default")) {
            lines.push(format!("- Default route: {}", route.trim()));
        }
    }
    lines
}

fn sensors(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(text) = captured(tree, "sensors") else {
        return lines;
    };
    let mut current_chip: Option<String> = None;
    for reading in extract::sensors(&text) {
        if reading.chip != current_chip {
            if let Some(chip) = &reading.chip {
                lines.push(format!("- {chip}"));
            }
            current_chip = reading.chip.clone();
        }
        lines.push(format!("  - {}: {}", reading.label, reading.value));
    }
    lines
}

fn pci(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "lspci") {
        let summary = extract::lspci(&text);
        if summary.devices > 0 {
            lines.push(format!("- Devices: {}", summary.devices));
        }
        for (class, count) in summary.classes {
            lines.push(format!("  - {class}: {count}"));
        }
    }
    lines
}

fn usb(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(text) = captured(tree, "lsusb") {
        let devices = extract::lsusb(&text);
        if !devices.is_empty() {
            lines.push(format!("- Devices: {}", devices.len()));
        }
        for device in devices {
            lines.push(format!(
                "  - {} (bus {} device {}) {}",
                device.id, device.bus, device.device, device.description
            ));
        }
    }
    lines
}

fn kernel(tree: &ArtifactTree) -> Vec<String> {
    let mut lines = Vec::new();
    push_field(
        &mut lines,
        "Kernel",
        captured(tree, "uname").and_then(|text| extract::first_line(&text)),
    );
    push_field(
        &mut lines,
        "Command line",
        captured(tree, "cmdline").and_then(|text| extract::first_line(&text)),
    );
    if let Some(text) = captured(tree, "lsmod") {
        lines.push(format!("- Loaded modules: {}", extract::module_count(&text)));
    }
    if let Some(text) = captured(tree, "kernel-log") {
        let log = extract::kernel_log(&text);
        lines.push(format!(
            "- Kernel log: {} line(s), {} mentioning errors or failures",
            log.lines, log.error_lines
        ));
    }
    lines
}

fn platform_extras(tree: &ArtifactTree) -> Vec<String> {
    if !tree.has_group(TaskGroup::Platform) {
        return vec!["Platform extras not detected.".to_string()];
    }
    let platform = |name: &str| {
        tree.read(TaskGroup::Platform, name)
            .text()
            .map(str::to_string)
    };

    let mut lines = Vec::new();
    push_field(
        &mut lines,
        "Model",
        platform("model").and_then(|text| extract::device_tree_model(&text)),
    );
    push_field(
        &mut lines,
        "SoC temperature",
        platform("temperature").and_then(|text| extract::vcgencmd_value(&text)),
    );
    if let Some(state) = platform("throttled").and_then(|text| extract::throttled(&text)) {
        if state.flags.is_empty() {
            lines.push(format!("- Throttling: none ({})", state.raw));
        } else {
            lines.push(format!(
                "- Throttling: {} ({})",
                state.flags.join(", "),
                state.raw
            ));
        }
    }
    push_field(
        &mut lines,
        "ARM clock",
        platform("arm-clock")
            .and_then(|text| extract::clock_mhz(&text))
            .map(|mhz| format!("{mhz} MHz")),
    );
    push_field(
        &mut lines,
        "ARM memory",
        platform("arm-memory").and_then(|text| extract::vcgencmd_value(&text)),
    );
    push_field(
        &mut lines,
        "GPU memory",
        platform("gpu-memory").and_then(|text| extract::vcgencmd_value(&text)),
    );
    if let Some(text) = platform("boot-config") {
        let active = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count();
        lines.push(format!("- Boot config: {active} active setting(s)"));
    }
    lines
}

fn kib(value: u64) -> String {
    human_bytes(value.saturating_mul(1024))
}

pub fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::{human_bytes, synthesize, RunInfo};
    use crate::artifact::ArtifactTree;
    use crate::model::{TaskGroup, Warning};

    const SECTION_ORDER: &[&str] = &[
        "Overview",
        "CPU",
        "Memory",
        "Storage Layout",
        "Disk Benchmarks",
        "Disk Health",
        "NVMe",
        "Graphics",
        "Network",
        "Sensors",
        "PCI Devices",
        "USB Devices",
        "Kernel",
        "Platform Extras",
    ];

    fn info() -> RunInfo {
        RunInfo {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            task_count: 3,
        }
    }

    #[test]
    fn empty_tree_renders_every_heading_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = ArtifactTree::create(dir.path()).expect("tree");
        let document = synthesize(&tree, &[], &info());

        let titles = document
            .sections
            .iter()
            .map(|section| section.title.as_str())
            .collect::<Vec<_>>();
        let mut expected = SECTION_ORDER.to_vec();
        expected.push("Footer");
        assert_eq!(titles, expected);

        let rendered = document.render();
        assert!(rendered.contains("## Graphics\n\nNo data captured.\n"));
        assert!(rendered.contains("Platform extras not detected."));
        assert!(!rendered.contains("## Warnings"));
    }

    #[test]
    fn nested_device_names_render_as_device_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(
            TaskGroup::System,
            "disk-bench-cciss!c0d0",
            b" Model Number:       HP LOGICAL VOLUME\n",
        )
        .expect("bench");
        let document = synthesize(&tree, &[], &info());

        assert_eq!(
            document
                .section("Disk Benchmarks")
                .map(|section| section.lines.clone()),
            Some(vec![
                "### /dev/cciss/c0d0".to_string(),
                "- Model: HP LOGICAL VOLUME".to_string(),
            ])
        );
    }

    #[test]
    fn failed_captures_contribute_no_facts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(
            TaskGroup::System,
            "uname",
            b"FAILED: failed to run `uname`: permission denied\n",
        )
        .expect("uname");
        let document = synthesize(&tree, &[], &info());

        assert_eq!(
            document.section("Kernel").map(|section| section.lines.len()),
            Some(0)
        );
    }

    #[test]
    fn warnings_render_verbatim_in_recorded_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = ArtifactTree::create(dir.path()).expect("tree");
        let warnings = vec![
            Warning {
                task: "lspci".to_string(),
                message: "skipped: tool `lspci` not found on PATH".to_string(),
            },
            Warning {
                task: "fdisk".to_string(),
                message: "skipped: elevated privilege required".to_string(),
            },
        ];
        let document = synthesize(&tree, &warnings, &info());
        let section = document.section("Warnings").expect("warnings section");
        assert_eq!(
            section.lines,
            vec![
                "- [lspci] skipped: tool `lspci` not found on PATH",
                "- [fdisk] skipped: elevated privilege required"
            ]
        );
        let footer = document.section("Footer").expect("footer");
        assert!(footer.lines[0].ends_with("3 task(s), 2 warning(s)."));
    }

    #[test]
    fn per_device_blocks_skip_placeholders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(
            TaskGroup::System,
            "disk-bench-sda",
            include_str!("../../../fixtures/hdparm-sda.txt").as_bytes(),
        )
        .expect("bench");
        tree.write_placeholder(TaskGroup::System, "disk-bench-nvme0n1")
            .expect("placeholder");
        tree.write_text(
            TaskGroup::System,
            "disk-health-nvme0n1",
            include_str!("../../../fixtures/smartctl-nvme0n1.txt").as_bytes(),
        )
        .expect("health");

        let document = synthesize(&tree, &[], &info());
        let bench = document.section("Disk Benchmarks").expect("bench");
        assert_eq!(bench.lines[0], "### /dev/sda");
        assert!(bench
            .lines
            .contains(&"- Buffered disk reads: 535.54 MB/sec".to_string()));
        assert!(!bench.lines.iter().any(|line| line.contains("nvme0n1")));

        let health = document.section("Disk Health").expect("health");
        assert_eq!(health.lines[0], "### /dev/nvme0n1");
        assert!(health.lines.contains(&"- Temperature: 38 °C".to_string()));
    }

    #[test]
    fn platform_section_decodes_throttling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(TaskGroup::Platform, "model", b"Raspberry Pi 4 Model B Rev 1.4\0")
            .expect("model");
        tree.write_text(TaskGroup::Platform, "throttled", b"throttled=0x50000\n")
            .expect("throttled");
        tree.write_placeholder(TaskGroup::Platform, "temperature")
            .expect("temperature");

        let document = synthesize(&tree, &[], &info());
        let extras = document.section("Platform Extras").expect("extras");
        assert_eq!(
            extras.lines,
            vec![
                "- Model: Raspberry Pi 4 Model B Rev 1.4",
                "- Throttling: under-voltage has occurred, throttling has occurred (0x50000)"
            ]
        );
    }

    #[test]
    fn human_bytes_scales() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(human_bytes(16_303_412 * 1024), "15.5 GB");
    }
}
