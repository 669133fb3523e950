use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::catalog::{build_catalog, referenced_tools, PLATFORM_MARKER};
use crate::device::enumerate_devices;
use crate::exec::CommandRunner;
use crate::model::{DeviceDescriptor, Requirement};
use crate::probe::Prober;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub host_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub elevated: bool,
    pub platform_marker: bool,
    pub tools: Vec<ToolStatus>,
    pub devices: Vec<DeviceDescriptor>,
    pub notes: Vec<String>,
}

pub fn collect_doctor_info(
    prober: &dyn Prober,
    runner: &dyn CommandRunner,
    sysfs_root: &Path,
) -> DoctorInfo {
    let devices = enumerate_devices(prober, runner, sysfs_root);
    let catalog = build_catalog(prober, &devices, Path::new("/"));
    let tools = referenced_tools(&catalog)
        .into_iter()
        .map(|name| ToolStatus {
            available: prober.probe(&Requirement::Tool(name.clone())),
            name,
        })
        .collect::<Vec<_>>();
    let elevated = prober.probe(&Requirement::Elevated);
    let platform_marker = prober.probe(&Requirement::file(PLATFORM_MARKER));

    let mut notes = vec![
        "Capture is read-only: tools are invoked and files are copied, nothing is modified."
            .to_string(),
    ];
    if !elevated {
        notes.push(
            "Not running with elevated privilege; privilege-gated tasks will be skipped or reduced."
                .to_string(),
        );
    }
    let missing = tools.iter().filter(|tool| !tool.available).count();
    if missing > 0 {
        notes.push(format!(
            "{missing} catalog tool(s) are not on PATH; their tasks will record warnings."
        ));
    }
    if devices.is_empty() {
        notes.push(
            "No block devices classified; per-device tasks will not be planned.".to_string(),
        );
    }

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        host_name: System::host_name(),
        os_version: System::long_os_version(),
        kernel_version: System::kernel_version(),
        elevated,
        platform_marker,
        tools,
        devices,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::collect_doctor_info;
    use crate::exec::{CommandOutput, CommandRunner, ExecError};
    use crate::model::Requirement;
    use crate::probe::Prober;

    struct NothingAvailable;

    impl Prober for NothingAvailable {
        fn probe(&self, _requirement: &Requirement) -> bool {
            false
        }
    }

    struct NoCommands;

    impl CommandRunner for NoCommands {
        fn run(&self, program: &str, _args: &[String]) -> Result<CommandOutput, ExecError> {
            Err(ExecError::Io {
                program: program.to_string(),
                message: "not available".to_string(),
            })
        }
    }

    #[test]
    fn bare_environment_reports_missing_tools_and_privilege() {
        let info = collect_doctor_info(
            &NothingAvailable,
            &NoCommands,
            Path::new("/nonexistent/sysfs"),
        );
        assert!(!info.elevated);
        assert!(!info.platform_marker);
        assert!(info.devices.is_empty());
        assert!(info.tools.iter().all(|tool| !tool.available));
        assert!(info.tools.iter().any(|tool| tool.name == "lspci"));
        assert!(info
            .notes
            .iter()
            .any(|note| note.contains("elevated privilege")));
    }
}
