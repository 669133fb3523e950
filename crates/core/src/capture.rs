use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::artifact::ArtifactTree;
use crate::exec::CommandRunner;
use crate::model::{
    Action, Alternative, CaptureResult, CaptureStatus, CaptureTask, Requirement, Warning,
    FAILURE_MARKER,
};
use crate::probe::Prober;

/// Everything a capture pass produced. Handed read-only to the report synthesizer.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub tree: ArtifactTree,
    pub results: Vec<CaptureResult>,
    pub warnings: Vec<Warning>,
}

impl CaptureOutcome {
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|result| result.succeeded()).count()
    }
}

pub struct Orchestrator<'a> {
    prober: &'a dyn Prober,
    runner: &'a dyn CommandRunner,
}

/// What one executed alternative left behind.
enum Attempt {
    /// Text to be stored as `<name>.txt`.
    Output {
        body: Vec<u8>,
        exit_code: Option<i32>,
        failure: Option<String>,
    },
    /// A directory already written into the tree (possibly partially).
    Copied {
        artifact: Option<PathBuf>,
        failure: Option<String>,
    },
}

impl Attempt {
    fn failure(&self) -> Option<&str> {
        match self {
            Attempt::Output { failure, .. } | Attempt::Copied { failure, .. } => {
                failure.as_deref()
            }
        }
    }

    fn errored(message: String) -> Self {
        Attempt::Output {
            body: format!("{FAILURE_MARKER}{message}\n").into_bytes(),
            exit_code: None,
            failure: Some(message),
        }
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(prober: &'a dyn Prober, runner: &'a dyn CommandRunner) -> Self {
        Self { prober, runner }
    }

    /// Execute every task in catalog order. Never aborts on a task failure.
    pub fn run(&self, catalog: &[CaptureTask], mut tree: ArtifactTree) -> CaptureOutcome {
        let mut results = Vec::with_capacity(catalog.len());
        let mut warnings = Vec::new();
        let total = catalog.len();

        for (index, task) in catalog.iter().enumerate() {
            info!(task = %task.name, step = index + 1, total, "capturing");
            let result = self.capture_task(task, &mut tree, &mut warnings);
            info!(task = %task.name, status = ?result.status, "captured");
            results.push(result);
        }

        CaptureOutcome {
            tree,
            results,
            warnings,
        }
    }

    fn capture_task(
        &self,
        task: &CaptureTask,
        tree: &mut ArtifactTree,
        warnings: &mut Vec<Warning>,
    ) -> CaptureResult {
        let mut last_failure: Option<(&Alternative, Attempt)> = None;

        for alternative in &task.alternatives {
            if let Some(unmet) = self.first_unmet(task, alternative) {
                debug!(
                    task = %task.name,
                    variant = %alternative.label,
                    unmet = %unmet,
                    "alternative not runnable"
                );
                continue;
            }

            // A partial directory from an earlier alternative gives way to this one.
            if let Some((_, Attempt::Copied { .. })) = &last_failure {
                tree.discard(task.group, &task.name);
            }

            let attempt = self.perform(task, &alternative.action, tree);
            if attempt.failure().is_none() {
                return self.store_success(task, alternative, attempt, tree, warnings);
            }

            debug!(
                task = %task.name,
                variant = %alternative.label,
                "alternative failed; trying next"
            );
            last_failure = Some((alternative, attempt));
        }

        match last_failure {
            Some((alternative, attempt)) => {
                self.store_failure(task, alternative, attempt, tree, warnings)
            }
            None => self.skip(task, tree, warnings),
        }
    }

    fn store_success(
        &self,
        task: &CaptureTask,
        alternative: &Alternative,
        attempt: Attempt,
        tree: &mut ArtifactTree,
        warnings: &mut Vec<Warning>,
    ) -> CaptureResult {
        let (artifact, exit_code) = match attempt {
            Attempt::Copied { artifact, .. } => (artifact, None),
            Attempt::Output {
                body, exit_code, ..
            } => match tree.write_text(task.group, &task.name, &body) {
                Ok(path) => (Some(tree.relative(&path)), exit_code),
                Err(error) => {
                    let message = format!("captured output could not be stored: {error:#}");
                    record(warnings, task, &message);
                    return CaptureResult {
                        task: task.name.clone(),
                        group: task.group,
                        status: CaptureStatus::FailedExit,
                        artifact: None,
                        exit_code,
                        detail: Some(message),
                        variant: Some(alternative.label.clone()),
                    };
                }
            },
        };
        CaptureResult {
            task: task.name.clone(),
            group: task.group,
            status: CaptureStatus::Succeeded,
            artifact,
            exit_code,
            detail: None,
            variant: Some(alternative.label.clone()),
        }
    }

    fn store_failure(
        &self,
        task: &CaptureTask,
        alternative: &Alternative,
        attempt: Attempt,
        tree: &mut ArtifactTree,
        warnings: &mut Vec<Warning>,
    ) -> CaptureResult {
        let mut message = attempt.failure().unwrap_or_default().to_string();
        let (artifact, exit_code) = match attempt {
            Attempt::Copied { artifact, .. } => (artifact, None),
            // Partial output is kept as the artifact.
            Attempt::Output {
                body, exit_code, ..
            } => match tree.write_text(task.group, &task.name, &body) {
                Ok(path) => (Some(tree.relative(&path)), exit_code),
                Err(error) => {
                    message.push_str(&format!("; output not stored: {error:#}"));
                    (None, exit_code)
                }
            },
        };
        record(warnings, task, &message);
        CaptureResult {
            task: task.name.clone(),
            group: task.group,
            status: CaptureStatus::FailedExit,
            artifact,
            exit_code,
            detail: Some(message),
            variant: Some(alternative.label.clone()),
        }
    }

    fn skip(
        &self,
        task: &CaptureTask,
        tree: &mut ArtifactTree,
        warnings: &mut Vec<Warning>,
    ) -> CaptureResult {
        let reason = task
            .alternatives
            .first()
            .and_then(|primary| self.first_unmet(task, primary))
            .map(|unmet| unmet.describe_unmet())
            .unwrap_or_else(|| "no runnable alternative".to_string());
        let mut message = format!("skipped: {reason}");
        let artifact = match tree.write_placeholder(task.group, &task.name) {
            Ok(path) => Some(tree.relative(&path)),
            Err(error) => {
                message.push_str(&format!("; placeholder not stored: {error:#}"));
                None
            }
        };
        record(warnings, task, &message);
        CaptureResult {
            task: task.name.clone(),
            group: task.group,
            status: CaptureStatus::FailedPrecondition,
            artifact,
            exit_code: None,
            detail: Some(reason),
            variant: None,
        }
    }

    /// First requirement of `alternative` this host cannot satisfy for `task`, if any.
    pub fn first_unmet<'t>(
        &self,
        task: &CaptureTask,
        alternative: &'t Alternative,
    ) -> Option<&'t Requirement> {
        alternative.requires.iter().find(|requirement| match requirement {
            Requirement::Transport(class) => task
                .device
                .as_ref()
                .map_or(true, |device| &device.transport != class),
            other => !self.prober.probe(other),
        })
    }

    fn perform(&self, task: &CaptureTask, action: &Action, tree: &mut ArtifactTree) -> Attempt {
        match action {
            Action::Run { program, args } => match self.runner.run(program, args) {
                Ok(output) => {
                    let failure = if output.success() {
                        None
                    } else {
                        Some(match output.status {
                            Some(code) => format!("`{action}` exited with status {code}"),
                            None => format!("`{action}` was terminated by a signal"),
                        })
                    };
                    Attempt::Output {
                        body: output.combined_output().into_bytes(),
                        exit_code: output.status,
                        failure,
                    }
                }
                Err(error) => Attempt::errored(error.to_string()),
            },
            Action::CopyFile { source } => match fs::read(source) {
                Ok(body) => Attempt::Output {
                    body,
                    exit_code: None,
                    failure: None,
                },
                Err(error) => {
                    Attempt::errored(format!("failed to read {}: {error}", source.display()))
                }
            },
            // Written straight into the tree; a failed walk leaves what was copied so far.
            Action::CopyDir { source } => {
                let target = tree.dir_path(task.group, &task.name);
                match tree.copy_dir(task.group, &task.name, source) {
                    Ok((path, copied)) => {
                        debug!(task = %task.name, copied, "directory copied");
                        Attempt::Copied {
                            artifact: Some(tree.relative(&path)),
                            failure: None,
                        }
                    }
                    Err(error) => Attempt::Copied {
                        artifact: target.exists().then(|| tree.relative(&target)),
                        failure: Some(format!(
                            "copy of {} failed: {error:#}",
                            source.display()
                        )),
                    },
                }
            }
        }
    }
}

/// Identifier used in warnings: the output name, qualified by its subtree.
pub fn task_id(task: &CaptureTask) -> String {
    match task.group.subtree() {
        Some(subtree) => format!("{subtree}/{}", task.name),
        None => task.name.clone(),
    }
}

fn record(warnings: &mut Vec<Warning>, task: &CaptureTask, message: &str) {
    let warning = Warning {
        task: task_id(task),
        message: message.to_string(),
    };
    warn!(task = %warning.task, message = %warning.message, "capture warning");
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::Orchestrator;
    use crate::artifact::{Artifact, ArtifactTree};
    use crate::exec::{CommandOutput, CommandRunner, ExecError};
    use crate::model::{
        Action, CaptureStatus, CaptureTask, DeviceDescriptor, Requirement, TaskGroup,
        TransportClass, FAILURE_MARKER, UNAVAILABLE_PLACEHOLDER,
    };
    use crate::probe::Prober;

    struct FakeProber {
        tools: Vec<&'static str>,
        elevated: bool,
        files: Vec<PathBuf>,
    }

    impl FakeProber {
        fn with_files<P: AsRef<Path>>(files: &[P]) -> Self {
            Self {
                tools: vec![],
                elevated: false,
                files: files.iter().map(|path| path.as_ref().to_path_buf()).collect(),
            }
        }
    }

    impl Prober for FakeProber {
        fn probe(&self, requirement: &Requirement) -> bool {
            match requirement {
                Requirement::Tool(name) => self.tools.contains(&name.as_str()),
                Requirement::Elevated => self.elevated,
                Requirement::File(path) => self.files.contains(path),
                Requirement::Transport(_) => false,
            }
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        outputs: HashMap<String, CommandOutput>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn with(mut self, command: &str, status: i32, stdout: &str) -> Self {
            self.outputs.insert(
                command.to_string(),
                CommandOutput {
                    status: Some(status),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
            let line = if args.is_empty() {
                program.to_string()
            } else {
                format!("{} {}", program, args.join(" "))
            };
            self.calls.borrow_mut().push(line.clone());
            self.outputs.get(&line).cloned().ok_or_else(|| ExecError::Io {
                program: program.to_string(),
                message: "no canned output".to_string(),
            })
        }
    }

    fn tool_task(name: &str, program: &str) -> CaptureTask {
        CaptureTask::new(name, TaskGroup::System).then(
            program,
            vec![Requirement::tool(program)],
            Action::run(program, &[]),
        )
    }

    #[test]
    fn unmet_precondition_writes_placeholder_and_one_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber {
            tools: vec![],
            elevated: false,
            files: vec![],
        };
        let runner = FakeRunner::default();
        let outcome = Orchestrator::new(&prober, &runner).run(
            &[tool_task("lspci", "lspci")],
            ArtifactTree::create(dir.path()).expect("tree"),
        );

        assert_eq!(outcome.results[0].status, CaptureStatus::FailedPrecondition);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].task, "lspci");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lspci.txt")).expect("placeholder"),
            UNAVAILABLE_PLACEHOLDER
        );
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn nonzero_exit_keeps_partial_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber {
            tools: vec!["sensors"],
            elevated: false,
            files: vec![],
        };
        let runner = FakeRunner::default().with("sensors", 1, "Core 0: +40.0°C\n");
        let outcome = Orchestrator::new(&prober, &runner).run(
            &[tool_task("sensors", "sensors")],
            ArtifactTree::create(dir.path()).expect("tree"),
        );

        assert_eq!(outcome.results[0].status, CaptureStatus::FailedExit);
        assert_eq!(outcome.results[0].exit_code, Some(1));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(
            outcome.tree.read(TaskGroup::System, "sensors"),
            Artifact::Captured("Core 0: +40.0°C\n".to_string())
        );
    }

    #[test]
    fn reduced_variant_runs_without_privilege() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = DeviceDescriptor {
            name: "sda".to_string(),
            path: "/dev/sda".to_string(),
            transport: TransportClass::AtaScsi,
            size_bytes: 1,
            transport_hint: None,
            model: None,
        };
        let catalog = crate::catalog::device_catalog(&[device]);
        let prober = FakeProber {
            tools: vec!["hdparm"],
            elevated: false,
            files: vec![],
        };
        let runner = FakeRunner::default().with("hdparm -I /dev/sda", 0, "Model Number: X\n");
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&catalog, ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::Succeeded);
        assert_eq!(outcome.results[0].variant.as_deref(), Some("identity"));
        assert_eq!(runner.calls.borrow().as_slice(), ["hdparm -I /dev/sda"]);
        // smartctl is not installed: one warning for the health task only.
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].task, "disk-health-sda");
    }

    #[test]
    fn failed_primary_falls_through_to_next_alternative() {
        let dir = tempfile::tempdir().expect("tempdir");
        let task = CaptureTask::new("ip-addr", TaskGroup::System)
            .then(
                "ip",
                vec![Requirement::tool("ip")],
                Action::run("ip", &["-brief", "address"]),
            )
            .then(
                "ifconfig",
                vec![Requirement::tool("ifconfig")],
                Action::run("ifconfig", &["-a"]),
            );
        let prober = FakeProber {
            tools: vec!["ip", "ifconfig"],
            elevated: false,
            files: vec![],
        };
        let runner = FakeRunner::default()
            .with("ip -brief address", 255, "Object \"address\" is unknown\n")
            .with("ifconfig -a", 0, "eth0: flags=4163<UP>\n");
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&[task], ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::Succeeded);
        assert_eq!(outcome.results[0].variant.as_deref(), Some("ifconfig"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn spawn_error_is_recorded_as_exit_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber {
            tools: vec!["lsusb"],
            elevated: false,
            files: vec![],
        };
        let runner = FakeRunner::default();
        let outcome = Orchestrator::new(&prober, &runner).run(
            &[tool_task("lsusb", "lsusb")],
            ArtifactTree::create(dir.path()).expect("tree"),
        );

        assert_eq!(outcome.results[0].status, CaptureStatus::FailedExit);
        assert_eq!(outcome.results[0].exit_code, None);
        assert_eq!(outcome.warnings.len(), 1);
        // The error text is kept on disk but never reads back as tool output.
        match outcome.tree.read(TaskGroup::System, "lsusb") {
            Artifact::Failed(message) => assert!(message.contains("lsusb")),
            other => panic!("expected a failed artifact, got {other:?}"),
        }
        assert!(fs::read_to_string(dir.path().join("lsusb.txt"))
            .expect("error body")
            .starts_with(FAILURE_MARKER));
    }

    #[test]
    fn file_copy_stores_contents_and_keeps_read_errors() {
        let source = tempfile::tempdir().expect("source");
        let present = source.path().join("os-release");
        fs::write(&present, "ID=debian\n").expect("write");
        let vanished = source.path().join("cmdline");

        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber::with_files(&[&present, &vanished]);
        let runner = FakeRunner::default();
        let catalog = [
            CaptureTask::new("os-release", TaskGroup::System).then(
                "copy",
                vec![Requirement::File(present.clone())],
                Action::CopyFile {
                    source: present.clone(),
                },
            ),
            CaptureTask::new("cmdline", TaskGroup::System).then(
                "copy",
                vec![Requirement::File(vanished.clone())],
                Action::CopyFile {
                    source: vanished.clone(),
                },
            ),
        ];
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&catalog, ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::Succeeded);
        assert_eq!(
            outcome.results[0].artifact.as_deref(),
            Some(Path::new("os-release.txt"))
        );
        assert_eq!(
            outcome.tree.read(TaskGroup::System, "os-release"),
            Artifact::Captured("ID=debian\n".to_string())
        );

        assert_eq!(outcome.results[1].status, CaptureStatus::FailedExit);
        assert!(matches!(
            outcome.tree.read(TaskGroup::System, "cmdline"),
            Artifact::Failed(_)
        ));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].task, "cmdline");
    }

    #[test]
    fn directory_copy_lands_under_output_name() {
        let source = tempfile::tempdir().expect("source");
        fs::create_dir_all(source.path().join("nested")).expect("mkdir");
        fs::write(source.path().join("blacklist.conf"), "blacklist pcspkr\n").expect("a");
        fs::write(source.path().join("nested").join("b.conf"), "options b\n").expect("b");

        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber::with_files(&[source.path()]);
        let runner = FakeRunner::default();
        let task = CaptureTask::new("modprobe-d", TaskGroup::System).then(
            "copy",
            vec![Requirement::File(source.path().to_path_buf())],
            Action::CopyDir {
                source: source.path().to_path_buf(),
            },
        );
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&[task], ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::Succeeded);
        assert_eq!(
            outcome.results[0].artifact.as_deref(),
            Some(Path::new("modprobe-d"))
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("modprobe-d").join("nested").join("b.conf"))
                .expect("copied"),
            "options b\n"
        );
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn failed_directory_copy_keeps_partial_tree() {
        let missing = PathBuf::from("/nonexistent/sysdump/udev-rules");
        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber::with_files(&[&missing]);
        let runner = FakeRunner::default();
        let task = CaptureTask::new("udev-rules", TaskGroup::System).then(
            "copy",
            vec![Requirement::File(missing.clone())],
            Action::CopyDir { source: missing },
        );
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&[task], ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::FailedExit);
        assert_eq!(
            outcome.results[0].artifact.as_deref(),
            Some(Path::new("udev-rules"))
        );
        assert!(dir.path().join("udev-rules").is_dir());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].message.starts_with("copy of "));
    }

    #[test]
    fn failed_directory_copy_falls_through_to_next_alternative() {
        let missing = PathBuf::from("/nonexistent/sysdump/rules.d");
        let source = tempfile::tempdir().expect("source");
        let fallback = source.path().join("rules.conf");
        fs::write(&fallback, "KERNEL==\"sd*\"\n").expect("write");

        let dir = tempfile::tempdir().expect("tempdir");
        let prober = FakeProber::with_files(&[&missing, &fallback]);
        let runner = FakeRunner::default();
        let task = CaptureTask::new("udev-rules", TaskGroup::System)
            .then(
                "directory",
                vec![Requirement::File(missing.clone())],
                Action::CopyDir { source: missing },
            )
            .then(
                "single-file",
                vec![Requirement::File(fallback.clone())],
                Action::CopyFile { source: fallback },
            );
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&[task], ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::Succeeded);
        assert_eq!(outcome.results[0].variant.as_deref(), Some("single-file"));
        assert!(outcome.warnings.is_empty());
        assert!(!dir.path().join("udev-rules").exists());
        assert_eq!(
            outcome.tree.read(TaskGroup::System, "udev-rules"),
            Artifact::Captured("KERNEL==\"sd*\"\n".to_string())
        );
    }

    #[test]
    fn transport_requirement_is_checked_against_task_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        let task = CaptureTask::new("disk-bench-x", TaskGroup::System).then(
            "identity",
            vec![Requirement::Transport(TransportClass::AtaScsi)],
            Action::run("hdparm", &["-I", "/dev/x"]),
        );
        let prober = FakeProber {
            tools: vec![],
            elevated: true,
            files: vec![],
        };
        let runner = FakeRunner::default();
        let outcome = Orchestrator::new(&prober, &runner)
            .run(&[task], ArtifactTree::create(dir.path()).expect("tree"));

        assert_eq!(outcome.results[0].status, CaptureStatus::FailedPrecondition);
        assert!(runner.calls.borrow().is_empty());
    }
}
