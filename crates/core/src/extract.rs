//! Field extraction from raw tool output.
//!
//! Every function here is pure: raw text in, a small record of optional fields out.
//! Unknown or partial input yields `None`/empty fields rather than an error.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

static RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\s*([\d.]+\s*\S+/sec)").expect("static rate pattern"));
static USB_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Bus (\d+) Device (\d+): ID ([0-9a-fA-F]{4}:[0-9a-fA-F]{4})\s*(.*)$")
        .expect("static lsusb pattern")
});
static PCI_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{4}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]\s+([^:]+):\s*(.*)$")
        .expect("static lspci pattern")
});

/// Value after the first `label:` at the start of a (trimmed) line.
pub fn labelled<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(label)?;
        let value = rest.trim_start().strip_prefix(':')?.trim();
        (!value.is_empty()).then_some(value)
    })
}

pub fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub pretty_name: Option<String>,
    pub id: Option<String>,
    pub version_id: Option<String>,
}

pub fn os_release(text: &str) -> OsRelease {
    let value = |key: &str| {
        text.lines().find_map(|line| {
            let raw = line.trim().strip_prefix(key)?.strip_prefix('=')?;
            Some(raw.trim_matches('"').to_string())
        })
    };
    OsRelease {
        pretty_name: value("PRETTY_NAME"),
        id: value("ID"),
        version_id: value("VERSION_ID"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuFacts {
    pub model_name: Option<String>,
    pub architecture: Option<String>,
    pub cpus: Option<String>,
    pub threads_per_core: Option<String>,
    pub cores_per_socket: Option<String>,
    pub sockets: Option<String>,
    pub max_mhz: Option<String>,
}

pub fn lscpu(text: &str) -> CpuFacts {
    let get = |label: &str| labelled(text, label).map(str::to_string);
    CpuFacts {
        model_name: get("Model name"),
        architecture: get("Architecture"),
        cpus: get("CPU(s)"),
        threads_per_core: get("Thread(s) per core"),
        cores_per_socket: get("Core(s) per socket"),
        sockets: get("Socket(s)"),
        max_mhz: get("CPU max MHz"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub processors: usize,
    pub model_name: Option<String>,
    pub hardware: Option<String>,
    pub model: Option<String>,
}

pub fn cpuinfo(text: &str) -> CpuInfo {
    CpuInfo {
        processors: text
            .lines()
            .filter(|line| line.starts_with("processor"))
            .count(),
        model_name: labelled(text, "model name").map(str::to_string),
        hardware: labelled(text, "Hardware").map(str::to_string),
        // "Model\t\t: Raspberry Pi 4 ..." on ARM boards; x86 uses a numeric "model".
        model: labelled(text, "Model").map(str::to_string),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: Option<u64>,
    pub available_kb: Option<u64>,
    pub swap_total_kb: Option<u64>,
}

pub fn meminfo(text: &str) -> MemInfo {
    let kb = |label: &str| {
        labelled(text, label)
            .and_then(|value| value.split_whitespace().next())
            .and_then(|number| number.parse().ok())
    };
    MemInfo {
        total_kb: kb("MemTotal"),
        available_kb: kb("MemAvailable"),
        swap_total_kb: kb("SwapTotal"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryModule {
    pub locator: Option<String>,
    pub size: String,
    pub kind: Option<String>,
    pub speed: Option<String>,
}

/// Populated "Memory Device" blocks of `dmidecode -t memory`.
pub fn dmidecode_memory(text: &str) -> Vec<MemoryModule> {
    text.split("\n\n")
        .filter(|block| block.lines().any(|line| line.trim() == "Memory Device"))
        .filter_map(|block| {
            let size = labelled(block, "Size")?;
            if size.starts_with("No Module") || size == "Unknown" {
                return None;
            }
            let known = |label: &str| {
                labelled(block, label)
                    .filter(|value| *value != "Unknown")
                    .map(str::to_string)
            };
            Some(MemoryModule {
                locator: known("Locator"),
                size: size.to_string(),
                kind: known("Type"),
                speed: known("Speed"),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub source: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub use_percent: String,
    pub mount: String,
}

/// Device-backed rows of `df -h`.
pub fn df(text: &str) -> Vec<Filesystem> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() < 6 || !fields[0].starts_with("/dev/") {
                return None;
            }
            Some(Filesystem {
                source: fields[0].to_string(),
                size: fields[1].to_string(),
                used: fields[2].to_string(),
                available: fields[3].to_string(),
                use_percent: fields[4].to_string(),
                mount: fields[5..].join(" "),
            })
        })
        .collect()
}

/// `Disk /dev/...` headline rows of `fdisk -l`.
pub fn fdisk_disks(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("Disk /dev/"))
        .map(|line| line.trim_start_matches("Disk ").trim().to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BenchFacts {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub cached_reads: Option<String>,
    pub buffered_reads: Option<String>,
}

impl BenchFacts {
    pub fn is_empty(&self) -> bool {
        *self == BenchFacts::default()
    }
}

pub fn hdparm(text: &str) -> BenchFacts {
    let rate = |marker: &str| {
        text.lines()
            .find(|line| line.contains(marker))
            .and_then(|line| RATE.captures(line))
            .map(|capture| capture[1].to_string())
    };
    BenchFacts {
        model: labelled(text, "Model Number").map(str::to_string),
        serial: labelled(text, "Serial Number").map(str::to_string),
        firmware: labelled(text, "Firmware Revision").map(str::to_string),
        cached_reads: rate("Timing cached reads"),
        buffered_reads: rate("Timing buffered disk reads"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthFacts {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub capacity: Option<String>,
    pub verdict: Option<String>,
    pub temperature_c: Option<String>,
    pub power_on_hours: Option<String>,
}

impl HealthFacts {
    pub fn is_empty(&self) -> bool {
        *self == HealthFacts::default()
    }
}

/// `smartctl -i -H -A` for both ATA attribute tables and the NVMe health log layout.
pub fn smartctl(text: &str) -> HealthFacts {
    let get = |label: &str| labelled(text, label).map(str::to_string);
    let attribute = |name: &str| {
        text.lines().find_map(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() >= 10 && fields[1] == name {
                Some(fields[9].to_string())
            } else {
                None
            }
        })
    };
    let nvme_temperature = get("Temperature")
        .and_then(|value| value.split_whitespace().next().map(str::to_string));

    HealthFacts {
        model: get("Device Model").or_else(|| get("Model Number")),
        serial: get("Serial Number"),
        capacity: get("User Capacity").or_else(|| get("Total NVM Capacity")),
        verdict: get("SMART overall-health self-assessment test result")
            .or_else(|| get("SMART Health Status")),
        temperature_c: attribute("Temperature_Celsius")
            .or_else(|| attribute("Airflow_Temperature_Cel"))
            .or(nvme_temperature),
        power_on_hours: attribute("Power_On_Hours").or_else(|| get("Power On Hours")),
    }
}

/// Device rows of `nvme list`.
pub fn nvme_list(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("/dev/"))
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmeHealth {
    pub critical_warning: Option<String>,
    pub temperature: Option<String>,
    pub percentage_used: Option<String>,
    pub data_units_written: Option<String>,
}

impl NvmeHealth {
    pub fn is_empty(&self) -> bool {
        *self == NvmeHealth::default()
    }
}

pub fn nvme_smart_log(text: &str) -> NvmeHealth {
    let get = |key: &str| {
        text.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            (name.trim() == key).then(|| value.trim().to_string())
        })
    };
    NvmeHealth {
        critical_warning: get("critical_warning"),
        temperature: get("temperature")
            .map(|value| value.split(" (").next().unwrap_or_default().to_string()),
        percentage_used: get("percentage_used"),
        data_units_written: get("data_units_written"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PciSummary {
    pub devices: usize,
    pub classes: BTreeMap<String, usize>,
    pub display: Vec<String>,
}

pub fn lspci(text: &str) -> PciSummary {
    let mut summary = PciSummary::default();
    for capture in text.lines().filter_map(|line| PCI_LINE.captures(line.trim())) {
        let class = capture[1].trim().to_string();
        summary.devices += 1;
        if is_display_class(&class) {
            summary.display.push(capture[2].trim().to_string());
        }
        *summary.classes.entry(class).or_default() += 1;
    }
    summary
}

fn is_display_class(class: &str) -> bool {
    matches!(
        class,
        "VGA compatible controller" | "3D controller" | "Display controller"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlxFacts {
    pub renderer: Option<String>,
    pub version: Option<String>,
}

pub fn glxinfo(text: &str) -> GlxFacts {
    GlxFacts {
        renderer: labelled(text, "OpenGL renderer string").map(str::to_string),
        version: labelled(text, "OpenGL version string").map(str::to_string),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub state: Option<String>,
    pub addresses: Vec<String>,
}

/// Interfaces from either `ip -brief address` rows or `ifconfig -a` blocks.
pub fn interfaces(text: &str) -> Vec<Interface> {
    if text.contains("flags=") {
        return ifconfig_interfaces(text);
    }
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let state = fields.next()?;
            if !state.chars().all(|c| c.is_ascii_uppercase()) {
                return None;
            }
            Some(Interface {
                name: name.split('@').next().unwrap_or(name).to_string(),
                state: Some(state.to_string()),
                addresses: fields.map(str::to_string).collect(),
            })
        })
        .collect()
}

fn ifconfig_interfaces(text: &str) -> Vec<Interface> {
    let mut found: Vec<Interface> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let state = if rest.contains("RUNNING") {
                "UP"
            } else {
                "DOWN"
            };
            found.push(Interface {
                name: name.trim().to_string(),
                state: Some(state.to_string()),
                addresses: Vec::new(),
            });
            continue;
        }
        let mut words = line.split_whitespace();
        if let (Some(kind), Some(address)) = (words.next(), words.next()) {
            if kind == "inet" || kind == "inet6" {
                if let Some(current) = found.last_mut() {
                    current.addresses.push(address.to_string());
                }
            }
        }
    }
    found
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    pub chip: Option<String>,
    pub label: String,
    pub value: String,
}

pub fn sensors(text: &str) -> Vec<SensorReading> {
    let mut chip = None;
    let mut readings = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            chip = None;
            continue;
        }
        let Some((label, rest)) = trimmed.split_once(':') else {
            if chip.is_none() {
                chip = Some(trimmed.to_string());
            }
            continue;
        };
        let value = rest
            .split_whitespace()
            .take_while(|token| !token.starts_with('('))
            .collect::<Vec<_>>()
            .join(" ");
        if value.contains("°C") || value.ends_with("RPM") || value.ends_with(" V") {
            readings.push(SensorReading {
                chip: chip.clone(),
                label: label.trim().to_string(),
                value,
            });
        }
    }
    readings
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub bus: String,
    pub device: String,
    pub id: String,
    pub description: String,
}

pub fn lsusb(text: &str) -> Vec<UsbDevice> {
    text.lines()
        .filter_map(|line| USB_LINE.captures(line.trim()))
        .map(|capture| UsbDevice {
            bus: capture[1].to_string(),
            device: capture[2].to_string(),
            id: capture[3].to_string(),
            description: capture[4].trim().to_string(),
        })
        .collect()
}

/// Loaded modules in `lsmod` output (header excluded).
pub fn module_count(text: &str) -> usize {
    text.lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("Module "))
        .count()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelLog {
    pub lines: usize,
    pub error_lines: usize,
}

pub fn kernel_log(text: &str) -> KernelLog {
    let mut log = KernelLog::default();
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        log.lines += 1;
        let lowered = line.to_lowercase();
        if lowered.contains("error") || lowered.contains("fail") {
            log.error_lines += 1;
        }
    }
    log
}

/// `key=value` output of `vcgencmd`; returns the value for the first matching line.
pub fn vcgencmd_value(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (_, value) = line.trim().split_once('=')?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// `frequency(48)=1500398464` in MHz.
pub fn clock_mhz(text: &str) -> Option<u64> {
    vcgencmd_value(text)?
        .parse::<u64>()
        .ok()
        .map(|hz| hz / 1_000_000)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleState {
    pub raw: String,
    pub flags: Vec<&'static str>,
}

const THROTTLE_BITS: &[(u32, &str)] = &[
    (0, "under-voltage detected"),
    (1, "arm frequency capped"),
    (2, "currently throttled"),
    (3, "soft temperature limit active"),
    (16, "under-voltage has occurred"),
    (17, "arm frequency capping has occurred"),
    (18, "throttling has occurred"),
    (19, "soft temperature limit has occurred"),
];

pub fn throttled(text: &str) -> Option<ThrottleState> {
    let raw = vcgencmd_value(text)?;
    let bits = u32::from_str_radix(raw.trim_start_matches("0x"), 16).ok()?;
    let flags = THROTTLE_BITS
        .iter()
        .filter(|(bit, _)| bits & (1 << bit) != 0)
        .map(|(_, label)| *label)
        .collect();
    Some(ThrottleState { raw, flags })
}

pub fn device_tree_model(text: &str) -> Option<String> {
    let model = text.trim_end_matches('\0').trim();
    (!model.is_empty()).then(|| model.to_string())
}
