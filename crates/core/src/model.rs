use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: &str = "1.0.0";

/// Fixed body written in place of real output when no alternative of a task could run.
pub const UNAVAILABLE_PLACEHOLDER: &str =
    "UNAVAILABLE: required tool, file, or privilege missing\n";

/// Leads an artifact body that holds sysdump's own error text instead of tool output.
pub const FAILURE_MARKER: &str = "FAILED: ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportClass {
    AtaScsi,
    Nvme,
}

impl fmt::Display for TransportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportClass::AtaScsi => f.write_str("ata/scsi"),
            TransportClass::Nvme => f.write_str("nvme"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub path: String,
    pub transport: TransportClass,
    pub size_bytes: u64,
    #[serde(default)]
    pub transport_hint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl DeviceDescriptor {
    /// Device name usable inside a flat output name (`cciss/c0d0` becomes `cciss!c0d0`).
    pub fn output_stem(&self) -> String {
        self.name.replace('/', "!")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Requirement {
    Tool(String),
    File(PathBuf),
    Elevated,
    Transport(TransportClass),
}

impl Requirement {
    pub fn tool(name: &str) -> Self {
        Requirement::Tool(name.to_string())
    }

    pub fn file(path: &str) -> Self {
        Requirement::File(PathBuf::from(path))
    }

    /// Phrase used when the requirement is unmet.
    pub fn describe_unmet(&self) -> String {
        match self {
            Requirement::Tool(name) => format!("tool `{name}` not found on PATH"),
            Requirement::File(path) => format!("{} not present or not readable", path.display()),
            Requirement::Elevated => "elevated privilege required".to_string(),
            Requirement::Transport(class) => format!("device transport is not {class}"),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Tool(name) => write!(f, "tool:{name}"),
            Requirement::File(path) => write!(f, "file:{}", path.display()),
            Requirement::Elevated => f.write_str("elevated"),
            Requirement::Transport(class) => write!(f, "transport:{class}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Action {
    Run { program: String, args: Vec<String> },
    CopyFile { source: PathBuf },
    CopyDir { source: PathBuf },
}

impl Action {
    pub fn run(program: &str, args: &[&str]) -> Self {
        Action::Run {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub fn copy_file(source: &str) -> Self {
        Action::CopyFile {
            source: PathBuf::from(source),
        }
    }

    pub fn copy_dir(source: &str) -> Self {
        Action::CopyDir {
            source: PathBuf::from(source),
        }
    }

    pub fn is_directory_copy(&self) -> bool {
        matches!(self, Action::CopyDir { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Run { program, args } if args.is_empty() => f.write_str(program),
            Action::Run { program, args } => write!(f, "{} {}", program, args.join(" ")),
            Action::CopyFile { source } => write!(f, "copy {}", source.display()),
            Action::CopyDir { source } => write!(f, "copy -r {}", source.display()),
        }
    }
}

/// One entry of a task's fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alternative {
    pub label: String,
    pub requires: Vec<Requirement>,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskGroup {
    System,
    Platform,
}

impl TaskGroup {
    /// Subdirectory of the artifact root holding this group's outputs.
    pub fn subtree(&self) -> Option<&'static str> {
        match self {
            TaskGroup::System => None,
            TaskGroup::Platform => Some("platform"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureTask {
    pub name: String,
    pub group: TaskGroup,
    #[serde(default)]
    pub device: Option<DeviceDescriptor>,
    pub alternatives: Vec<Alternative>,
}

impl CaptureTask {
    pub fn new(name: impl Into<String>, group: TaskGroup) -> Self {
        Self {
            name: name.into(),
            group,
            device: None,
            alternatives: Vec::new(),
        }
    }

    pub fn for_device(mut self, device: &DeviceDescriptor) -> Self {
        self.device = Some(device.clone());
        self
    }

    pub fn then(mut self, label: &str, requires: Vec<Requirement>, action: Action) -> Self {
        self.alternatives.push(Alternative {
            label: label.to_string(),
            requires,
            action,
        });
        self
    }

    pub fn writes_directory(&self) -> bool {
        self.alternatives
            .first()
            .is_some_and(|alternative| alternative.action.is_directory_copy())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Succeeded,
    FailedPrecondition,
    FailedExit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureResult {
    pub task: String,
    pub group: TaskGroup,
    pub status: CaptureStatus,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl CaptureResult {
    pub fn succeeded(&self) -> bool {
        self.status == CaptureStatus::Succeeded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub task: String,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.task, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub manifest_version: String,
    pub catalog_version: String,
    pub generated_at: String,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    pub results: Vec<CaptureResult>,
    pub warnings: Vec<Warning>,
}
