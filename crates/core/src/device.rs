use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::exec::CommandRunner;
use crate::model::{DeviceDescriptor, Requirement, TransportClass};
use crate::probe::Prober;

const SYSFS_SECTOR_BYTES: u64 = 512;

static LSBLK_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Z:-]+)="((?:[^"\\]|\\.)*)""#).expect("static lsblk pair pattern")
});

/// One raw row of block-device enumeration, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProbe {
    pub name: String,
    pub kind: String,
    pub size_bytes: u64,
    pub transport_hint: Option<String>,
    pub model: Option<String>,
}

pub fn lsblk_args() -> Vec<String> {
    ["-d", "-b", "-n", "-P", "-o", "NAME,TYPE,SIZE,TRAN,MODEL"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

/// Enumerate whole block devices, preferring `lsblk` and falling back to sysfs.
pub fn enumerate_devices(
    prober: &dyn Prober,
    runner: &dyn CommandRunner,
    sysfs_root: &Path,
) -> Vec<DeviceDescriptor> {
    if prober.probe(&Requirement::tool("lsblk")) {
        match runner.run("lsblk", &lsblk_args()) {
            Ok(output) if output.success() => {
                return classify_devices(parse_lsblk_pairs(&output.stdout));
            }
            Ok(output) => warn!(
                status = ?output.status,
                "lsblk enumeration failed; falling back to sysfs"
            ),
            Err(error) => warn!(%error, "lsblk enumeration failed; falling back to sysfs"),
        }
    }

    match probe_sysfs(sysfs_root) {
        Ok(probes) => classify_devices(probes),
        Err(error) => {
            warn!(
                %error,
                root = %sysfs_root.display(),
                "sysfs block enumeration failed; no devices classified"
            );
            Vec::new()
        }
    }
}

pub fn parse_lsblk_pairs(raw: &str) -> Vec<DeviceProbe> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut name = None;
            let mut kind = None;
            let mut size_bytes = 0;
            let mut transport_hint = None;
            let mut model = None;
            for capture in LSBLK_PAIR.captures_iter(line) {
                let value = unescape_lsblk(&capture[2]);
                match &capture[1] {
                    "NAME" => name = Some(value),
                    "TYPE" => kind = Some(value),
                    "SIZE" => size_bytes = value.trim().parse().unwrap_or(0),
                    "TRAN" => transport_hint = non_empty(value),
                    "MODEL" => model = non_empty(value),
                    _ => {}
                }
            }
            Some(DeviceProbe {
                name: name?,
                kind: kind.unwrap_or_else(|| "disk".to_string()),
                size_bytes,
                transport_hint,
                model,
            })
        })
        .collect()
}

/// Read `<sysfs_root>/block`, keeping entries backed by a physical device.
pub fn probe_sysfs(sysfs_root: &Path) -> io::Result<Vec<DeviceProbe>> {
    let mut probes = Vec::new();
    for entry in fs::read_dir(sysfs_root.join("block"))? {
        let entry = entry?;
        let path = entry.path();
        if !path.join("device").exists() {
            debug!(entry = %path.display(), "skipping virtual block device");
            continue;
        }
        // sysfs spells the `/` of names like `cciss/c0d0` as `!`.
        let name = entry.file_name().to_string_lossy().replace('!', "/");
        if is_optical(&name) {
            debug!(device = %name, "skipping optical drive");
            continue;
        }
        let sectors = fs::read_to_string(path.join("size"))
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let model = fs::read_to_string(path.join("device").join("model"))
            .ok()
            .and_then(|value| non_empty(value.trim().to_string()));
        let transport_hint = if name.starts_with("nvme") {
            Some("nvme".to_string())
        } else {
            None
        };
        probes.push(DeviceProbe {
            name,
            kind: "disk".to_string(),
            size_bytes: sectors.saturating_mul(SYSFS_SECTOR_BYTES),
            transport_hint,
            model,
        });
    }
    Ok(probes)
}

pub fn classify_devices(probes: Vec<DeviceProbe>) -> Vec<DeviceDescriptor> {
    let mut devices = probes
        .into_iter()
        .filter(|probe| probe.kind == "disk")
        .filter(|probe| {
            if probe.size_bytes == 0 {
                debug!(device = %probe.name, "dropping zero-capacity device");
                return false;
            }
            true
        })
        .map(|probe| DeviceDescriptor {
            path: format!("/dev/{}", probe.name),
            transport: classify_transport(&probe.name, probe.transport_hint.as_deref()),
            name: probe.name,
            size_bytes: probe.size_bytes,
            transport_hint: probe.transport_hint,
            model: probe.model,
        })
        .collect::<Vec<_>>();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

fn classify_transport(name: &str, transport_hint: Option<&str>) -> TransportClass {
    let name = name.to_lowercase();
    let hint = transport_hint.unwrap_or_default().to_lowercase();
    if name.starts_with("nvme") || contains_any(&hint, &["nvme"]) {
        TransportClass::Nvme
    } else {
        TransportClass::AtaScsi
    }
}

fn is_optical(name: &str) -> bool {
    name.strip_prefix("sr")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

fn unescape_lsblk(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(index) = rest.find("\\x") {
        out.push_str(&rest[..index]);
        let code = rest
            .get(index + 2..index + 4)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match code {
            Some(byte) => {
                out.push(byte as char);
                rest = &rest[index + 4..];
            }
            None => {
                out.push_str("\\x");
                rest = &rest[index + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn contains_any(value: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| value.contains(pattern))
}
