use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::model::{CaptureResult, TaskGroup, FAILURE_MARKER, UNAVAILABLE_PLACEHOLDER};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Contents of one named artifact as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Missing,
    Unavailable,
    /// The capture failed before producing output; holds the recorded error.
    Failed(String),
    Captured(String),
}

impl Artifact {
    pub fn text(&self) -> Option<&str> {
        match self {
            Artifact::Captured(text) => Some(text),
            _ => None,
        }
    }
}

/// Directory of raw capture outputs, addressable by group and output name.
///
/// Readers only see artifacts recorded for the current run, so leftovers from an
/// earlier run into the same root never reach the report.
#[derive(Debug)]
pub struct ArtifactTree {
    root: PathBuf,
    written: HashSet<(TaskGroup, String)>,
}

impl ArtifactTree {
    /// Create (or reuse) the output root. Failure here is the one fatal error of a run.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output directory {}", root.display()))?;
        Ok(Self::open(root))
    }

    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            written: HashSet::new(),
        }
    }

    /// Reopen an earlier run's tree, exposing only the artifacts its results name.
    pub fn from_results(root: impl AsRef<Path>, results: &[CaptureResult]) -> Self {
        let mut tree = Self::open(root);
        tree.written = results
            .iter()
            .filter(|result| result.artifact.is_some())
            .map(|result| (result.group, result.task.clone()))
            .collect();
        tree
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_path(&self, group: TaskGroup, name: &str) -> PathBuf {
        self.group_dir(group).join(format!("{name}.txt"))
    }

    pub fn dir_path(&self, group: TaskGroup, name: &str) -> PathBuf {
        self.group_dir(group).join(name)
    }

    /// Path relative to the root, as recorded in the manifest.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    pub fn write_text(&mut self, group: TaskGroup, name: &str, content: &[u8]) -> Result<PathBuf> {
        self.claim(group, name)?;
        let path = self.text_path(group, name);
        ensure_parent(&path)?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write artifact {}", path.display()))?;
        Ok(path)
    }

    pub fn write_placeholder(&mut self, group: TaskGroup, name: &str) -> Result<PathBuf> {
        self.write_text(group, name, UNAVAILABLE_PLACEHOLDER.as_bytes())
    }

    /// Copy regular files below `source` into `<name>/`, keeping relative paths.
    /// Returns the artifact directory and the number of files copied.
    pub fn copy_dir(
        &mut self,
        group: TaskGroup,
        name: &str,
        source: &Path,
    ) -> Result<(PathBuf, usize)> {
        self.claim(group, name)?;
        let target = self.dir_path(group, name);
        fs::create_dir_all(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;

        let mut copied = 0;
        for entry in WalkDir::new(source).follow_links(false) {
            let entry =
                entry.with_context(|| format!("failed to walk {}", source.display()))?;
            let relative = entry.path().strip_prefix(source).with_context(|| {
                format!("{} escaped {}", entry.path().display(), source.display())
            })?;
            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&destination)
                    .with_context(|| format!("failed to create {}", destination.display()))?;
            } else if entry.file_type().is_file() {
                let bytes = fs::read(entry.path())
                    .with_context(|| format!("failed to read {}", entry.path().display()))?;
                ensure_parent(&destination)?;
                fs::write(&destination, bytes)
                    .with_context(|| format!("failed to write {}", destination.display()))?;
                copied += 1;
            }
        }
        Ok((target, copied))
    }

    /// Drop a partially copied directory so a later alternative can claim the name.
    pub fn discard(&mut self, group: TaskGroup, name: &str) {
        let target = self.dir_path(group, name);
        if let Err(error) = fs::remove_dir_all(&target) {
            debug!(%error, path = %target.display(), "partial directory not removed");
        }
        self.written.remove(&(group, name.to_string()));
    }

    pub fn read(&self, group: TaskGroup, name: &str) -> Artifact {
        if !self.written.contains(&(group, name.to_string())) {
            return Artifact::Missing;
        }
        read_artifact(&self.text_path(group, name))
    }

    /// Captured per-device artifacts whose name starts with `prefix`, keyed by device suffix.
    pub fn device_artifacts(&self, prefix: &str) -> Vec<(String, String)> {
        let mut found = self
            .written
            .iter()
            .filter(|(group, _)| *group == TaskGroup::System)
            .filter_map(|(group, name)| {
                let device = name.strip_prefix(prefix)?;
                match self.read(*group, name) {
                    Artifact::Captured(text) if !device.is_empty() => {
                        Some((device.to_string(), text))
                    }
                    _ => None,
                }
            })
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Whether this run recorded any artifact in `group`.
    pub fn has_group(&self, group: TaskGroup) -> bool {
        self.written.iter().any(|(written, _)| *written == group)
    }

    fn group_dir(&self, group: TaskGroup) -> PathBuf {
        match group.subtree() {
            Some(subtree) => self.root.join(subtree),
            None => self.root.clone(),
        }
    }

    fn claim(&mut self, group: TaskGroup, name: &str) -> Result<()> {
        if !self.written.insert((group, name.to_string())) {
            bail!("artifact `{name}` was already written in this run");
        }
        Ok(())
    }
}

fn read_artifact(path: &Path) -> Artifact {
    match fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).to_string();
            if text == UNAVAILABLE_PLACEHOLDER {
                Artifact::Unavailable
            } else if let Some(error) = text.strip_prefix(FAILURE_MARKER) {
                Artifact::Failed(error.trim_end().to_string())
            } else {
                Artifact::Captured(text)
            }
        }
        Err(_) => Artifact::Missing,
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use std::path::PathBuf;

    use super::{Artifact, ArtifactTree};
    use crate::model::{CaptureResult, CaptureStatus, TaskGroup, FAILURE_MARKER};

    #[test]
    fn placeholder_reads_back_as_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_placeholder(TaskGroup::System, "lspci").expect("placeholder");
        tree.write_text(TaskGroup::Platform, "throttled", b"throttled=0x0\n")
            .expect("text");

        assert_eq!(tree.read(TaskGroup::System, "lspci"), Artifact::Unavailable);
        assert_eq!(
            tree.read(TaskGroup::Platform, "throttled"),
            Artifact::Captured("throttled=0x0\n".to_string())
        );
        assert_eq!(tree.read(TaskGroup::System, "lsusb"), Artifact::Missing);
        assert!(dir.path().join("platform").join("throttled.txt").is_file());
    }

    #[test]
    fn names_are_write_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(TaskGroup::System, "uname", b"Linux").expect("first");
        assert!(tree.write_text(TaskGroup::System, "uname", b"again").is_err());
        // Same name in another group is a different artifact.
        tree.write_text(TaskGroup::Platform, "uname", b"ok").expect("other group");
    }

    #[test]
    fn directory_copy_preserves_structure() {
        let source = tempfile::tempdir().expect("source");
        fs::create_dir_all(source.path().join("nested")).expect("mkdir");
        fs::write(source.path().join("a.conf"), "options a").expect("a");
        fs::write(source.path().join("nested").join("b.conf"), "options b").expect("b");

        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        let (target, copied) = tree
            .copy_dir(TaskGroup::System, "modprobe-d", source.path())
            .expect("copy");
        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(target.join("nested").join("b.conf")).expect("read"),
            "options b"
        );
    }

    #[test]
    fn device_artifacts_skip_placeholders_and_sort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(TaskGroup::System, "disk-bench-sdb", b"b").expect("sdb");
        tree.write_text(TaskGroup::System, "disk-bench-sda", b"a").expect("sda");
        tree.write_placeholder(TaskGroup::System, "disk-bench-nvme0n1")
            .expect("nvme");
        tree.write_text(TaskGroup::System, "disk-health-sda", b"h").expect("health");

        let found = tree.device_artifacts("disk-bench-");
        assert_eq!(
            found,
            vec![
                ("sda".to_string(), "a".to_string()),
                ("sdb".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn error_bodies_read_back_as_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        let body = format!("{FAILURE_MARKER}failed to run `hostname`: not found\n");
        tree.write_text(TaskGroup::System, "hostname", body.as_bytes())
            .expect("text");

        let artifact = tree.read(TaskGroup::System, "hostname");
        assert_eq!(
            artifact,
            Artifact::Failed("failed to run `hostname`: not found".to_string())
        );
        assert_eq!(artifact.text(), None);
    }

    #[test]
    fn files_from_other_runs_are_not_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("disk-bench-sdz.txt"), "stale").expect("stale bench");
        fs::write(dir.path().join("uname.txt"), "Linux stale").expect("stale uname");
        fs::create_dir_all(dir.path().join("platform")).expect("mkdir");
        fs::write(dir.path().join("platform").join("model.txt"), "Pi").expect("stale model");

        let mut tree = ArtifactTree::create(dir.path()).expect("tree");
        tree.write_text(TaskGroup::System, "disk-bench-sda", b"a").expect("sda");

        assert_eq!(tree.read(TaskGroup::System, "uname"), Artifact::Missing);
        assert_eq!(
            tree.device_artifacts("disk-bench-"),
            vec![("sda".to_string(), "a".to_string())]
        );
        assert!(!tree.has_group(TaskGroup::Platform));

        let results = vec![CaptureResult {
            task: "uname".to_string(),
            group: TaskGroup::System,
            status: CaptureStatus::Succeeded,
            artifact: Some(PathBuf::from("uname.txt")),
            exit_code: Some(0),
            detail: None,
            variant: None,
        }];
        let reopened = ArtifactTree::from_results(dir.path(), &results);
        assert_eq!(
            reopened.read(TaskGroup::System, "uname"),
            Artifact::Captured("Linux stale".to_string())
        );
        assert!(reopened.device_artifacts("disk-bench-").is_empty());
        assert!(!reopened.has_group(TaskGroup::Platform));
    }
}
