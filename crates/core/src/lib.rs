pub mod artifact;
pub mod capture;
pub mod catalog;
pub mod device;
pub mod doctor;
pub mod exec;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod report;

pub use artifact::{Artifact, ArtifactTree, MANIFEST_FILE};
pub use capture::{task_id, CaptureOutcome, Orchestrator};
pub use catalog::{
    build_catalog, device_catalog, host_path, platform_catalog, referenced_tools,
    system_catalog, validate, CATALOG_VERSION, PLATFORM_MARKER,
};
pub use device::{classify_devices, enumerate_devices, parse_lsblk_pairs, DeviceProbe};
pub use doctor::{collect_doctor_info, DoctorInfo, ToolStatus};
pub use exec::{CommandOutput, CommandRunner, ExecError, LocalRunner};
pub use model::{
    Action, Alternative, CaptureResult, CaptureStatus, CaptureTask, DeviceDescriptor, Manifest,
    Requirement, TaskGroup, TransportClass, Warning, FAILURE_MARKER, MANIFEST_VERSION,
    UNAVAILABLE_PLACEHOLDER,
};
pub use pipeline::{
    default_output_name, load_manifest, resynthesize, run_inventory, write_manifest,
    CaptureOptions, InventoryRun,
};
pub use probe::{is_elevated, Prober, SystemProber};
pub use report::{human_bytes, synthesize, ReportDocument, ReportSection, RunInfo};
